pub mod motion;
pub mod scripted;

pub use motion::{MotionDetector, MOTION_CLASS};
pub use scripted::{ScriptStep, ScriptedDetector, ScriptedObject};
