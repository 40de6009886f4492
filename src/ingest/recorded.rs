//! Recorded frame source.
//!
//! Replays a media file at its native frame rate. A call that arrives early
//! sleeps until the next frame is due; a call that arrives late reads and
//! discards every frame whose slot has already passed, returning only the
//! newest. Frames are never queued and never repeated.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-file-ffmpeg")]
use super::file_ffmpeg::FfmpegReader;
use super::synthetic::{self, SyntheticReader};
use super::FrameSource;
use crate::clock::{Clock, SystemClock};
use crate::error::MonitorError;
use crate::frame::Frame;

/// Sequential decoder behind a recorded source.
pub trait FrameReader: Send {
    /// Native frame rate in frames per second, as reported by the container.
    fn fps(&self) -> f64;

    /// Next decoded frame, `Ok(None)` at end of input.
    fn read(&mut self) -> Result<Option<Frame>>;
}

#[derive(Clone, Debug)]
pub struct RecordedConfig {
    /// Local file path or `stub://` location.
    pub path: String,
    /// Used when the file reports a missing or nonsensical frame rate.
    pub fallback_fps: f64,
}

impl Default for RecordedConfig {
    fn default() -> Self {
        Self {
            path: String::new(),
            fallback_fps: 30.0,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecordedStats {
    pub frames_read: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub fps: f64,
    pub exhausted: bool,
}

struct Playback {
    reader: Box<dyn FrameReader>,
    interval: Duration,
    last_frame_at: Instant,
    exhausted: bool,
}

pub struct RecordedSource {
    config: RecordedConfig,
    clock: Box<dyn Clock>,
    preopened: Option<Box<dyn FrameReader>>,
    playback: Option<Playback>,
    stats: RecordedStats,
}

impl RecordedSource {
    pub fn new(config: RecordedConfig) -> Self {
        Self {
            config,
            clock: Box::new(SystemClock),
            preopened: None,
            playback: None,
            stats: RecordedStats::default(),
        }
    }

    /// Source over an already opened reader; `start()` adopts it.
    pub fn from_reader(reader: impl FrameReader + 'static, config: RecordedConfig) -> Self {
        let mut source = Self::new(config);
        source.preopened = Some(Box::new(reader));
        source
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    pub fn stats(&self) -> RecordedStats {
        self.stats.clone()
    }

    fn open_reader(&mut self) -> Result<Box<dyn FrameReader>> {
        if let Some(reader) = self.preopened.take() {
            return Ok(reader);
        }
        let path = &self.config.path;
        if synthetic::is_stub(path) {
            return Ok(Box::new(SyntheticReader::open(path)?));
        }
        if let Err(source) = std::fs::File::open(path) {
            return Err(MonitorError::Io {
                path: PathBuf::from(path),
                source,
            }
            .into());
        }
        #[cfg(feature = "ingest-file-ffmpeg")]
        {
            Ok(Box::new(FfmpegReader::open(path)?))
        }
        #[cfg(not(feature = "ingest-file-ffmpeg"))]
        {
            Err(anyhow!(
                "recorded playback of '{}' requires the ingest-file-ffmpeg feature",
                path
            ))
        }
    }

    fn effective_fps(&self, reported: f64) -> Result<f64> {
        if reported.is_finite() && reported > 0.0 {
            return Ok(reported);
        }
        let fallback = self.config.fallback_fps;
        if !(fallback.is_finite() && fallback > 0.0) {
            return Err(anyhow!(
                "'{}' reports no usable frame rate and fallback_fps {} is invalid",
                self.config.path,
                fallback
            ));
        }
        log::warn!(
            "RecordedSource: {} reports frame rate {}, using {} fps",
            self.config.path,
            reported,
            fallback
        );
        Ok(fallback)
    }
}

impl FrameSource for RecordedSource {
    fn start(&mut self) -> Result<()> {
        if self.playback.is_some() {
            return Err(MonitorError::IllegalState("recorded source already started".into()).into());
        }
        let reader = self.open_reader()?;
        let fps = self.effective_fps(reader.fps())?;
        self.stats = RecordedStats {
            fps,
            ..RecordedStats::default()
        };
        self.playback = Some(Playback {
            reader,
            interval: Duration::from_secs_f64(1.0 / fps),
            last_frame_at: self.clock.now(),
            exhausted: false,
        });
        log::info!("RecordedSource: playing {} at {:.2} fps", self.config.path, fps);
        Ok(())
    }

    fn get_latest_frame(&mut self) -> Result<Option<Frame>> {
        let playback = self.playback.as_mut().ok_or_else(|| {
            MonitorError::IllegalState("get_latest_frame called before start".into())
        })?;
        if playback.exhausted {
            return Ok(None);
        }

        let mut next_frame_at = playback.last_frame_at + playback.interval;
        let now = self.clock.now();
        if now < next_frame_at {
            self.clock.sleep(next_frame_at - now);
        }

        let mut latest = None;
        while self.clock.now() >= next_frame_at {
            match playback.reader.read() {
                Ok(Some(frame)) => {
                    self.stats.frames_read += 1;
                    if latest.replace(frame).is_some() {
                        self.stats.frames_dropped += 1;
                    }
                }
                Ok(None) => {
                    log::info!("RecordedSource: end of {}", self.config.path);
                    playback.exhausted = true;
                    break;
                }
                Err(err) => {
                    log::warn!("RecordedSource: read failed on {}: {:#}", self.config.path, err);
                    playback.exhausted = true;
                    break;
                }
            }
            next_frame_at += playback.interval;
        }

        playback.last_frame_at = self.clock.now();
        self.stats.exhausted = playback.exhausted;
        if latest.is_some() {
            self.stats.frames_delivered += 1;
        }
        Ok(latest)
    }

    fn describe(&self) -> String {
        format!("recorded:{}", self.config.path)
    }
}
