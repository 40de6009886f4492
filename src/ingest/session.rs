//! Room/track session capability.
//!
//! A `RoomConnector` joins a room and reports every track it gets subscribed
//! to as a `TrackAnnouncement`. Video announcements carry a `FrameSubscription`
//! that, once opened, yields the track's frame events. Connectors run on the
//! live source's worker runtime; nothing here touches the consumer thread.

use std::any::Any;
use std::fmt;
use std::future::Future;

use anyhow::Result;
use tokio::sync::{mpsc, watch};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Raw pixel payload of one inbound frame, in whatever layout the sender used.
#[derive(Clone, Debug)]
pub enum PixelData {
    Bgr24(Vec<u8>),
    Rgb24(Vec<u8>),
    Rgba32(Vec<u8>),
    I420 {
        y: Vec<u8>,
        u: Vec<u8>,
        v: Vec<u8>,
        stride_y: u32,
        stride_u: u32,
        stride_v: u32,
    },
}

/// One decoded frame event from a subscribed video track.
#[derive(Clone, Debug)]
pub struct VideoFrameEvent {
    pub width: u32,
    pub height: u32,
    pub timestamp_us: i64,
    pub pixels: PixelData,
}

/// Single-slot hand-off from a connector to the live worker. A frame sent
/// while the previous one is still pending replaces it.
pub fn frame_channel() -> (FrameSender, FrameStream) {
    let (tx, rx) = watch::channel(None);
    (FrameSender(tx), FrameStream(rx))
}

pub struct FrameSender(watch::Sender<Option<VideoFrameEvent>>);

impl FrameSender {
    /// Replace the pending frame. Returns false once the worker has gone.
    pub fn send(&self, event: VideoFrameEvent) -> bool {
        self.0.send(Some(event)).is_ok()
    }
}

pub struct FrameStream(watch::Receiver<Option<VideoFrameEvent>>);

impl FrameStream {
    /// Newest frame not yet seen, or `None` once the sender is dropped and
    /// the last frame has been taken.
    pub async fn next(&mut self) -> Option<VideoFrameEvent> {
        loop {
            self.0.changed().await.ok()?;
            if let Some(event) = self.0.borrow_and_update().clone() {
                return Some(event);
            }
        }
    }
}

/// Deferred start of a video track's frame flow.
pub struct FrameSubscription(Box<dyn FnOnce() -> FrameStream + Send>);

impl FrameSubscription {
    pub fn new(open: impl FnOnce() -> FrameStream + Send + 'static) -> Self {
        Self(Box::new(open))
    }

    /// Start the frame flow. Must be called from within the worker runtime.
    pub fn open(self) -> FrameStream {
        (self.0)()
    }
}

impl fmt::Debug for FrameSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("FrameSubscription")
    }
}

/// A track the session subscribed to.
#[derive(Debug)]
pub struct TrackAnnouncement {
    pub sid: String,
    pub name: String,
    pub kind: TrackKind,
    /// Present for video tracks only.
    pub frames: Option<FrameSubscription>,
}

impl fmt::Display for TrackAnnouncement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} track '{}' (sid: {})", self.kind, self.name, self.sid)
    }
}

/// A joined room. Dropping it leaves the room.
pub struct RoomSession {
    pub room_name: String,
    pub tracks: mpsc::UnboundedReceiver<TrackAnnouncement>,
    keepalive: Option<Box<dyn Any + Send>>,
}

impl RoomSession {
    pub fn new(room_name: impl Into<String>, tracks: mpsc::UnboundedReceiver<TrackAnnouncement>) -> Self {
        Self {
            room_name: room_name.into(),
            tracks,
            keepalive: None,
        }
    }

    /// Keep `handle` alive for as long as the session is.
    pub fn with_keepalive(mut self, handle: impl Any + Send) -> Self {
        self.keepalive = Some(Box::new(handle));
        self
    }

    pub fn has_keepalive(&self) -> bool {
        self.keepalive.is_some()
    }
}

/// Capability: mint a join credential and join a room.
pub trait RoomConnector: Send + 'static {
    /// Access credential for `room_name` as `identity`.
    fn access_token(&self, room_name: &str, identity: &str) -> Result<String>;

    /// Join the room at `url` with `token`.
    fn connect(
        &self,
        url: &str,
        token: &str,
    ) -> impl Future<Output = Result<RoomSession>> + Send;
}
