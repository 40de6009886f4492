use anyhow::Result;

use crate::frame::{Frame, Mask};

/// One object found in a frame.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    /// Same dimensions as the frame the detection was computed from.
    pub mask: Mask,
    pub class_name: String,
    /// In `[0, 1]`.
    pub confidence: f32,
}

impl Detection {
    pub fn new(mask: Mask, class_name: impl Into<String>, confidence: f32) -> Self {
        Self {
            mask,
            class_name: class_name.into(),
            confidence,
        }
    }
}

/// Object detector capability.
///
/// Errors are transient: the caller skips the frame and carries on.
pub trait Detector: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Detect objects in `frame`. Implementations must not keep the frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Every class this backend can emit, when the set is fixed.
    fn classes(&self) -> Option<&'static [&'static str]> {
        None
    }
}

impl<D: Detector + ?Sized> Detector for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }

    fn classes(&self) -> Option<&'static [&'static str]> {
        (**self).classes()
    }
}
