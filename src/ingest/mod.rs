//! Frame sources.
//!
//! Two variants sit behind the one `FrameSource` interface:
//! - Recorded media files, replayed at native rate (`recorded`)
//! - Live room tracks, bridged from an async session (`live`)
//!
//! `stub://` locations select synthetic backends for either variant. Real
//! files need the `ingest-file-ffmpeg` feature; real rooms need `live-livekit`.
//!
//! `get_latest_frame()` hands out owned copies. `None` means the stream is
//! over for good; there is no "nothing yet" answer.

pub mod bridge;
#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod live;
#[cfg(feature = "live-livekit")]
pub mod livekit;
pub(crate) mod normalize;
pub mod recorded;
pub mod session;
pub mod synthetic;
pub mod synthetic_room;

use anyhow::Result;
#[cfg(not(feature = "live-livekit"))]
use anyhow::anyhow;

use crate::frame::Frame;

pub use bridge::{FrameCell, LatestFrame};
pub use live::{LiveConfig, LivePhase, LiveSource, LiveStats};
pub use recorded::{FrameReader, RecordedConfig, RecordedSource, RecordedStats};
pub use session::RoomConnector;
pub use synthetic_room::StubRoomConnector;

/// Pull-based frame source.
pub trait FrameSource: Send {
    /// One-time setup. Either fully succeeds or fails; never half-initialized.
    fn start(&mut self) -> Result<()>;

    /// Block until a frame is available (`Some`) or the stream has ended (`None`).
    fn get_latest_frame(&mut self) -> Result<Option<Frame>>;

    /// Short human-readable label for logs.
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn start(&mut self) -> Result<()> {
        (**self).start()
    }

    fn get_latest_frame(&mut self) -> Result<Option<Frame>> {
        (**self).get_latest_frame()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Which source to build.
#[derive(Clone, Debug)]
pub enum SourceSpec {
    Recorded(RecordedConfig),
    Live(LiveConfig),
}

/// Build the source described by `spec`, picking the backend from its location.
pub fn open_source(spec: SourceSpec) -> Result<Box<dyn FrameSource>> {
    match spec {
        SourceSpec::Recorded(config) => Ok(Box::new(RecordedSource::new(config))),
        SourceSpec::Live(config) => {
            if synthetic::is_stub(&config.url) {
                return Ok(Box::new(LiveSource::new(config, StubRoomConnector)));
            }
            #[cfg(feature = "live-livekit")]
            {
                let connector = livekit::LiveKitConnector::new(
                    config.api_key.clone().unwrap_or_default(),
                    config.api_secret.clone().unwrap_or_default(),
                )?;
                Ok(Box::new(LiveSource::new(config, connector)))
            }
            #[cfg(not(feature = "live-livekit"))]
            {
                Err(anyhow!(
                    "live source '{}' requires the live-livekit feature",
                    config.url
                ))
            }
        }
    }
}
