use std::collections::VecDeque;

use anyhow::{anyhow, Result};

use crate::detect::detector::{Detection, Detector};
use crate::frame::{Frame, Mask};

/// A rectangular object placed by a script, in pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct ScriptedObject {
    pub class_name: String,
    pub confidence: f32,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl ScriptedObject {
    pub fn new(class_name: impl Into<String>, confidence: f32, rect: (u32, u32, u32, u32)) -> Self {
        let (x, y, w, h) = rect;
        Self {
            class_name: class_name.into(),
            confidence,
            x,
            y,
            w,
            h,
        }
    }

    fn to_detection(&self, frame: &Frame) -> Detection {
        let (width, height) = frame.resolution();
        Detection::new(
            Mask::rectangle(width, height, self.x, self.y, self.w, self.h),
            self.class_name.clone(),
            self.confidence,
        )
    }
}

#[derive(Clone, Debug)]
pub enum ScriptStep {
    Objects(Vec<ScriptedObject>),
    Fail(String),
}

/// Deterministic detector that replays a script, one step per frame.
///
/// Masks are sized to each incoming frame. Once the script runs out, the
/// `after` objects are returned for every remaining frame.
#[derive(Clone, Debug, Default)]
pub struct ScriptedDetector {
    steps: VecDeque<ScriptStep>,
    after: Vec<ScriptedObject>,
    calls: u64,
}

impl ScriptedDetector {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            after: Vec::new(),
            calls: 0,
        }
    }

    /// Same objects on every frame.
    pub fn repeating(objects: Vec<ScriptedObject>) -> Self {
        Self {
            steps: VecDeque::new(),
            after: objects,
            calls: 0,
        }
    }

    pub fn then_repeat(mut self, objects: Vec<ScriptedObject>) -> Self {
        self.after = objects;
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Detector for ScriptedDetector {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        self.calls += 1;
        let objects = match self.steps.pop_front() {
            Some(ScriptStep::Fail(reason)) => return Err(anyhow!(reason)),
            Some(ScriptStep::Objects(objects)) => objects,
            None => self.after.clone(),
        };
        Ok(objects.iter().map(|o| o.to_detection(frame)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn script_is_replayed_in_order() {
        let frame = Frame::filled(20, 10, [0, 0, 0]);
        let mut detector = ScriptedDetector::new([
            ScriptStep::Objects(vec![ScriptedObject::new("person", 0.9, (1, 2, 3, 4))]),
            ScriptStep::Fail("model hiccup".into()),
        ]);

        let first = detector.detect(&frame).expect("first step");
        assert_eq!(first[0].mask.dimensions(), (20, 10));
        assert_eq!(first[0].mask.count(), 12);

        let err = detector.detect(&frame).unwrap_err();
        assert_eq!(err.to_string(), "model hiccup");

        assert!(detector.detect(&frame).expect("after script").is_empty());
        assert_eq!(detector.calls(), 3);
    }
}
