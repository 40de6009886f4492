//! Workspace Monitor
//!
//! Watches a camera feed of a robot workcell and reports which tracked
//! objects are inside the frame.
//!
//! # Architecture
//!
//! ```text
//! FrameSource ──frame──> WorkspaceMonitor ──state──> StateSink (MQTT)
//!  (recorded | live)      (detector + filter)          {"value": {...}}
//! ```
//!
//! # Module Structure
//!
//! - `frame`: BGR frames, masks and bounding boxes
//! - `ingest`: Frame sources (recorded media, live rooms)
//! - `detect`: Object detectors and their registry
//! - `monitor`: Tracked-object filtering into workspace states
//! - `transport`: Wire message format and the MQTT publisher
//! - `pipeline`: The source -> monitor -> sink loop
//! - `config`: Layered file and environment configuration

pub mod clock;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod monitor;
pub mod pipeline;
pub mod stopwatch;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{MonitorConfig, SourceKind};
pub use detect::{Detection, Detector, DetectorRegistry};
pub use error::MonitorError;
pub use frame::{mask_to_bounding_box, normalize_bounding_box, BoundingBox, Frame, Mask};
pub use ingest::{
    open_source, FrameSource, LiveConfig, LiveSource, RecordedConfig, RecordedSource, SourceSpec,
};
pub use monitor::{WorkspaceMonitor, WorkspaceState};
pub use pipeline::{run, RunSummary, SnapshotSink, StateSink};
pub use transport::{MqttStatePublisher, PublisherConfig};
