use std::time::Duration;

use anyhow::Result;

use workspace_monitor::ingest::synthetic::frame_index;
use workspace_monitor::ingest::{FrameSource, RecordedConfig, RecordedSource};
use workspace_monitor::ManualClock;

fn stub_source(location: &str, clock: &ManualClock) -> RecordedSource {
    RecordedSource::new(RecordedConfig {
        path: location.to_string(),
        ..RecordedConfig::default()
    })
    .with_clock(clock.clone())
}

#[test]
fn fast_consumer_gets_every_frame_at_native_rate() -> Result<()> {
    let clock = ManualClock::new();
    let mut source = stub_source("stub://clip?fps=10&frames=5&size=16x8", &clock);
    source.start()?;

    let mut indices = Vec::new();
    while let Some(frame) = source.get_latest_frame()? {
        indices.push(frame_index(&frame).expect("stamped index"));
        assert_eq!(clock.elapsed(), Duration::from_millis(100) * indices.len() as u32);
    }

    assert_eq!(indices, vec![0, 1, 2, 3, 4]);
    let stats = source.stats();
    assert_eq!(stats.frames_delivered, 5);
    assert_eq!(stats.frames_dropped, 0);
    assert!(stats.exhausted);
    Ok(())
}

#[test]
fn slow_consumer_skips_to_the_newest_due_frame() -> Result<()> {
    let clock = ManualClock::new();
    let mut source = stub_source("stub://clip?fps=10&frames=100&size=16x8", &clock);
    source.start()?;

    clock.advance(Duration::from_millis(350));
    let first = source.get_latest_frame()?.expect("frame");
    assert_eq!(frame_index(&first), Some(2));

    clock.advance(Duration::from_millis(350));
    let second = source.get_latest_frame()?.expect("frame");
    assert_eq!(frame_index(&second), Some(5));

    let stats = source.stats();
    assert_eq!(stats.frames_read, 6);
    assert_eq!(stats.frames_dropped, 4);
    assert_eq!(clock.total_slept(), Duration::ZERO);
    Ok(())
}

#[test]
fn indices_never_repeat_or_go_backwards() -> Result<()> {
    let clock = ManualClock::new();
    let mut source = stub_source("stub://clip?fps=25&frames=60&size=16x8", &clock);
    source.start()?;

    let delays = [0u64, 5, 90, 13, 0, 41, 200, 7, 33];
    let mut previous: Option<u64> = None;
    let mut step = 0;
    while let Some(frame) = source.get_latest_frame()? {
        let index = frame_index(&frame).expect("stamped index");
        if let Some(prev) = previous {
            assert!(index > prev, "frame {} delivered after {}", index, prev);
        }
        previous = Some(index);
        clock.advance(Duration::from_millis(delays[step % delays.len()]));
        step += 1;
    }

    let stats = source.stats();
    assert_eq!(stats.frames_read, 60);
    assert_eq!(stats.frames_delivered + stats.frames_dropped, 60);
    Ok(())
}

#[test]
fn end_of_stream_is_sticky() -> Result<()> {
    let clock = ManualClock::new();
    let mut source = stub_source("stub://clip?fps=30&frames=2&size=16x8", &clock);
    source.start()?;

    assert!(source.get_latest_frame()?.is_some());
    assert!(source.get_latest_frame()?.is_some());
    for _ in 0..3 {
        assert!(source.get_latest_frame()?.is_none());
    }
    Ok(())
}

#[test]
fn unusable_frame_rate_falls_back() -> Result<()> {
    let clock = ManualClock::new();
    let mut source = RecordedSource::new(RecordedConfig {
        path: "stub://clip?fps=0&frames=3&size=16x8".into(),
        fallback_fps: 20.0,
    })
    .with_clock(clock.clone());
    source.start()?;
    assert_eq!(source.stats().fps, 20.0);

    source.get_latest_frame()?.expect("frame");
    assert_eq!(clock.total_slept(), Duration::from_millis(50));
    Ok(())
}

#[test]
fn unusable_fallback_fails_start() {
    let clock = ManualClock::new();
    let mut source = RecordedSource::new(RecordedConfig {
        path: "stub://clip?fps=-1".into(),
        fallback_fps: 0.0,
    })
    .with_clock(clock);
    assert!(source.start().is_err());
}
