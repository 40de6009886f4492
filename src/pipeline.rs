//! Driving loop: source -> monitor -> sink, until the stream ends.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};

use crate::ingest::FrameSource;
use crate::monitor::{WorkspaceMonitor, WorkspaceState};
use crate::transport::wire::encode_jpeg;

/// Consumer of workspace states.
pub trait StateSink {
    fn publish_state(&mut self, state: &WorkspaceState) -> Result<()>;
}

impl<S: StateSink + ?Sized> StateSink for &mut S {
    fn publish_state(&mut self, state: &WorkspaceState) -> Result<()> {
        (**self).publish_state(state)
    }
}

/// Counters for one run of the loop.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_processed: u64,
    /// Frames dropped because detection failed.
    pub frames_skipped: u64,
    pub states_published: u64,
    pub publish_failures: u64,
    pub intrusions_seen: u64,
}

/// Start `source` once, then process frames until it returns `None` or
/// `shutdown` is set.
///
/// Detection failures skip the frame; publish failures are logged and the
/// loop carries on. Only setup failures and source errors end the run early.
pub fn run(
    source: &mut dyn FrameSource,
    monitor: &mut WorkspaceMonitor,
    sink: &mut dyn StateSink,
    shutdown: &AtomicBool,
) -> Result<RunSummary> {
    source
        .start()
        .with_context(|| format!("start {}", source.describe()))?;
    log::info!("Streaming from {}", source.describe());

    let mut summary = RunSummary::default();
    while !shutdown.load(Ordering::SeqCst) {
        let Some(frame) = source.get_latest_frame()? else {
            log::info!("Video stream is over");
            break;
        };

        let state = match monitor.process(frame) {
            Ok(state) => state,
            Err(err) => {
                log::error!("Error processing frame: {:#}", err);
                summary.frames_skipped += 1;
                continue;
            }
        };
        summary.frames_processed += 1;
        summary.intrusions_seen += state.intrusions.len() as u64;

        if state.intrusions.is_empty() {
            log::info!("Processed workspace state: no intrusions");
        } else {
            log::info!(
                "Processed workspace state: {} intrusions {:?}",
                state.intrusions.len(),
                state.intrusion_names()
            );
        }

        match sink.publish_state(&state) {
            Ok(()) => {
                summary.states_published += 1;
                log::debug!("Published update to MQTT broker");
            }
            Err(err) => {
                summary.publish_failures += 1;
                log::error!("Failed to publish workspace state: {:#}", err);
            }
        }
    }

    if shutdown.load(Ordering::SeqCst) {
        log::info!("Shutdown requested, stopping");
    }
    Ok(summary)
}

/// Sink decorator that also writes each published frame as a JPEG file.
pub struct SnapshotSink<S> {
    inner: S,
    path: PathBuf,
}

impl<S: StateSink> SnapshotSink<S> {
    pub fn new(inner: S, path: impl Into<PathBuf>) -> Self {
        Self {
            inner,
            path: path.into(),
        }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl<S: StateSink> StateSink for SnapshotSink<S> {
    fn publish_state(&mut self, state: &WorkspaceState) -> Result<()> {
        self.inner.publish_state(state)?;
        let jpeg = encode_jpeg(&state.frame)?;
        write_replacing(&self.path, &jpeg)
            .with_context(|| format!("write snapshot '{}'", self.path.display()))
    }
}

/// Write to a sibling temp file and rename, so readers never see a torn image.
fn write_replacing(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::detect::{ScriptStep, ScriptedDetector, ScriptedObject};
    use crate::ingest::{RecordedConfig, RecordedSource};

    #[derive(Default)]
    struct Collect(Vec<WorkspaceState>);

    impl StateSink for Collect {
        fn publish_state(&mut self, state: &WorkspaceState) -> Result<()> {
            self.0.push(state.clone());
            Ok(())
        }
    }

    // The manual clock only moves when the source sleeps, so no frame is dropped.
    fn source(frames: u32) -> RecordedSource {
        RecordedSource::new(RecordedConfig {
            path: format!("stub://clip?fps=25&frames={}&size=16x8", frames),
            ..RecordedConfig::default()
        })
        .with_clock(ManualClock::new())
    }

    #[test]
    fn failed_detection_skips_the_frame() -> Result<()> {
        let detector = ScriptedDetector::new([
            ScriptStep::Fail("transient".into()),
            ScriptStep::Objects(vec![ScriptedObject::new("person", 0.9, (0, 0, 4, 4))]),
        ]);
        let mut monitor = WorkspaceMonitor::new(["person"], Box::new(detector))?;
        let mut sink = Collect::default();
        let summary = run(&mut source(3), &mut monitor, &mut sink, &AtomicBool::new(false))?;

        assert_eq!(summary.frames_skipped, 1);
        assert_eq!(summary.frames_processed, 2);
        assert_eq!(summary.states_published, 2);
        assert_eq!(summary.intrusions_seen, 1);
        assert_eq!(sink.0.len(), 2);
        Ok(())
    }

    #[test]
    fn shutdown_flag_stops_before_the_first_frame() -> Result<()> {
        let mut monitor = WorkspaceMonitor::new(["person"], Box::new(ScriptedDetector::default()))?;
        let mut sink = Collect::default();
        let summary = run(&mut source(10), &mut monitor, &mut sink, &AtomicBool::new(true))?;
        assert_eq!(summary, RunSummary::default());
        Ok(())
    }

    #[test]
    fn snapshot_sink_writes_a_jpeg() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("latest.jpg");
        let mut monitor = WorkspaceMonitor::new(["person"], Box::new(ScriptedDetector::default()))?;
        let mut sink = SnapshotSink::new(Collect::default(), &path);
        run(&mut source(2), &mut monitor, &mut sink, &AtomicBool::new(false))?;

        let bytes = std::fs::read(&path)?;
        assert_eq!(&bytes[..2], &[0xFF, 0xD8]);
        assert_eq!(sink.into_inner().0.len(), 2);
        Ok(())
    }
}
