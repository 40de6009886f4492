//! Live frame source.
//!
//! A dedicated worker thread owns the room session and runs it on its own
//! current-thread tokio runtime. Frames flow one way, worker -> `FrameCell`,
//! and the caller pulls copies of whatever is newest. Whatever ends the
//! worker (clean close, timeout, error, panic) closes the cell, so a reader
//! sees `None` instead of stalling on a stale frame.
//!
//! Phases: `Uninitialized -> Connecting -> WaitingForTrack -> Streaming -> Ended`,
//! with `Failed` reachable from any phase before `Ended`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};

use super::bridge::{CloseOnDrop, FrameCell, WaitOutcome};
use super::normalize;
use super::session::{FrameSubscription, RoomConnector, RoomSession, TrackKind};
use super::FrameSource;
use crate::error::MonitorError;
use crate::frame::Frame;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone)]
pub struct LiveConfig {
    pub url: String,
    pub identity: String,
    pub room_name: String,
    pub track_name: String,
    /// Server credentials for minting join tokens (real rooms only).
    pub api_key: Option<String>,
    pub api_secret: Option<String>,
    /// Bound on joining the room and on the named track appearing.
    pub timeout: Duration,
    /// Re-check interval while waiting for the first frame.
    pub poll_interval: Duration,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            identity: String::new(),
            room_name: String::new(),
            track_name: String::new(),
            api_key: None,
            api_secret: None,
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl fmt::Debug for LiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveConfig")
            .field("url", &self.url)
            .field("identity", &self.identity)
            .field("room_name", &self.room_name)
            .field("track_name", &self.track_name)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("api_secret", &self.api_secret.as_ref().map(|_| "<redacted>"))
            .field("timeout", &self.timeout)
            .field("poll_interval", &self.poll_interval)
            .finish()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LivePhase {
    Uninitialized,
    Connecting,
    WaitingForTrack,
    Streaming,
    Ended,
    Failed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LiveStats {
    pub phase: LivePhase,
    pub frames_received: u64,
    /// Inbound frames that could not be converted and were skipped.
    pub frames_rejected: u64,
    pub track_name: Option<String>,
    pub track_sid: Option<String>,
}

impl Default for LiveStats {
    fn default() -> Self {
        Self {
            phase: LivePhase::Uninitialized,
            frames_received: 0,
            frames_rejected: 0,
            track_name: None,
            track_sid: None,
        }
    }
}

/// State shared between the caller and the worker thread.
#[derive(Default)]
struct Shared {
    cell: FrameCell,
    status: Mutex<Status>,
}

#[derive(Default)]
struct Status {
    stats: LiveStats,
    failure: Option<anyhow::Error>,
}

impl Shared {
    fn status(&self) -> MutexGuard<'_, Status> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: LivePhase) {
        let mut status = self.status();
        if !matches!(status.stats.phase, LivePhase::Ended | LivePhase::Failed) {
            status.stats.phase = phase;
        }
    }

    fn fail(&self, err: anyhow::Error) {
        let mut status = self.status();
        status.stats.phase = LivePhase::Failed;
        status.failure.get_or_insert(err);
    }
}

pub struct LiveSource<C: RoomConnector> {
    config: LiveConfig,
    connector: Option<C>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl<C: RoomConnector> LiveSource<C> {
    pub fn new(config: LiveConfig, connector: C) -> Self {
        Self {
            config,
            connector: Some(connector),
            shared: Arc::new(Shared::default()),
            worker: None,
        }
    }

    pub fn stats(&self) -> LiveStats {
        self.shared.status().stats.clone()
    }

    pub fn phase(&self) -> LivePhase {
        self.shared.status().stats.phase
    }

    fn probe_failure(&self) -> anyhow::Error {
        self.shared.status().failure.take().unwrap_or_else(|| {
            MonitorError::Session(format!(
                "stream on track '{}' ended before the first frame",
                self.config.track_name
            ))
            .into()
        })
    }
}

impl<C: RoomConnector> FrameSource for LiveSource<C> {
    fn start(&mut self) -> Result<()> {
        let connector = self
            .connector
            .take()
            .ok_or_else(|| MonitorError::IllegalState("live source already started".into()))?;

        self.shared.set_phase(LivePhase::Connecting);
        let shared = Arc::clone(&self.shared);
        let config = self.config.clone();
        let worker = std::thread::Builder::new()
            .name("live-source".into())
            .spawn(move || run_worker(connector, config, shared))
            .context("spawn live source worker")?;
        self.worker = Some(worker);

        // Readiness probe. The worker bounds joining and track discovery by
        // `timeout` each, so twice that is the outer limit.
        let deadline = Instant::now() + self.config.timeout * 2 + self.config.poll_interval;
        match self.shared.cell.wait_latest(self.config.poll_interval, Some(deadline)) {
            WaitOutcome::Frame(frame) => {
                log::info!(
                    "LiveSource: first frame on track '{}' ({}x{})",
                    self.config.track_name,
                    frame.width(),
                    frame.height()
                );
                Ok(())
            }
            WaitOutcome::Ended => Err(self.probe_failure()),
            WaitOutcome::TimedOut => {
                self.shared.cell.close();
                let err = MonitorError::timeout(
                    format!("waiting for the first frame on track '{}'", self.config.track_name),
                    self.config.timeout * 2,
                );
                self.shared.fail(anyhow!(err.to_string()));
                Err(err.into())
            }
        }
    }

    fn get_latest_frame(&mut self) -> Result<Option<Frame>> {
        if self.worker.is_none() {
            return Err(MonitorError::IllegalState("get_latest_frame called before start".into()).into());
        }
        loop {
            match self.shared.cell.wait_latest(self.config.poll_interval, None) {
                WaitOutcome::Frame(frame) => return Ok(Some(frame)),
                WaitOutcome::Ended => return Ok(None),
                WaitOutcome::TimedOut => log::debug!("LiveSource: waiting for frame..."),
            }
        }
    }

    fn describe(&self) -> String {
        format!("live:{}/{}", self.config.room_name, self.config.track_name)
    }
}

impl<C: RoomConnector> Drop for LiveSource<C> {
    fn drop(&mut self) {
        // The worker stops at its next frame once the cell is closed; it is
        // not joined because an idle session may never deliver one.
        self.shared.cell.close();
    }
}

fn run_worker<C: RoomConnector>(connector: C, config: LiveConfig, shared: Arc<Shared>) {
    let _close = CloseOnDrop(&shared.cell);
    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            shared.fail(anyhow!(err).context("create live session runtime"));
            return;
        }
    };

    match runtime.block_on(stream_session(&connector, &config, &shared)) {
        Ok(()) => {
            log::info!("LiveSource: stream on track '{}' ended", config.track_name);
            shared.set_phase(LivePhase::Ended);
        }
        Err(err) => {
            log::warn!("LiveSource: session failed: {:#}", err);
            shared.fail(err);
        }
    }
}

async fn stream_session<C: RoomConnector>(
    connector: &C,
    config: &LiveConfig,
    shared: &Shared,
) -> Result<()> {
    let token = connector
        .access_token(&config.room_name, &config.identity)
        .context("mint room access token")?;

    log::info!(
        "LiveSource: joining room '{}' with identity '{}'",
        config.room_name,
        config.identity
    );
    let mut session = tokio::time::timeout(config.timeout, connector.connect(&config.url, &token))
        .await
        .map_err(|_| {
            MonitorError::timeout(format!("joining room '{}'", config.room_name), config.timeout)
        })??;
    log::debug!("LiveSource: connected to room '{}'", session.room_name);

    shared.set_phase(LivePhase::WaitingForTrack);
    let adopted = tokio::time::timeout(config.timeout, adopt_track(&mut session, &config.track_name))
        .await
        .map_err(|_| {
            MonitorError::timeout(format!("waiting for track '{}'", config.track_name), config.timeout)
        })??;

    {
        let mut status = shared.status();
        status.stats.track_name = Some(adopted.name.clone());
        status.stats.track_sid = Some(adopted.sid.clone());
    }
    shared.set_phase(LivePhase::Streaming);

    let mut frames = adopted.frames.open();
    while let Some(event) = frames.next().await {
        match normalize::to_bgr(event.pixels, event.width, event.height) {
            Ok(frame) => {
                shared.status().stats.frames_received += 1;
                if !shared.cell.publish(frame) {
                    log::debug!("LiveSource: reader closed, leaving room '{}'", session.room_name);
                    break;
                }
            }
            Err(err) => {
                shared.status().stats.frames_rejected += 1;
                log::warn!("LiveSource: dropping unreadable frame: {:#}", err);
            }
        }
    }
    Ok(())
}

struct AdoptedTrack {
    sid: String,
    name: String,
    frames: FrameSubscription,
}

/// First video track named `track_name`; every other announcement is ignored.
async fn adopt_track(session: &mut RoomSession, track_name: &str) -> Result<AdoptedTrack> {
    while let Some(track) = session.tracks.recv().await {
        if track.kind != TrackKind::Video {
            log::debug!("LiveSource: ignoring non-video {}", track);
            continue;
        }
        if track.name != track_name {
            log::debug!("LiveSource: ignoring {} because it is not '{}'", track, track_name);
            continue;
        }
        let description = track.to_string();
        let Some(frames) = track.frames else {
            log::debug!("LiveSource: ignoring {} without a frame stream", description);
            continue;
        };
        log::info!("LiveSource: subscribed to {}", description);
        return Ok(AdoptedTrack {
            sid: track.sid,
            name: track.name,
            frames,
        });
    }
    Err(MonitorError::Session(format!(
        "room '{}' closed before track '{}' appeared",
        session.room_name, track_name
    ))
    .into())
}
