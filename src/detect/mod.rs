//! Object detection capability.
//!
//! The monitor only sees the `Detector` trait. Backends here are a frame
//! differencing detector for demos and a scripted one for tests; model-based
//! detectors plug in through `DetectorRegistry::register`.

mod backends;
mod detector;
mod registry;

pub use backends::{
    MotionDetector, ScriptStep, ScriptedDetector, ScriptedObject, MOTION_CLASS,
};
pub use detector::{Detection, Detector};
pub use registry::DetectorRegistry;
