use anyhow::Result;

use crate::detect::detector::{Detection, Detector};
use crate::frame::{Frame, Mask, CHANNELS};

pub const MOTION_CLASS: &str = "motion";

/// Frame-differencing detector.
///
/// Reports one `"motion"` detection covering every pixel whose largest
/// per-channel change since the previous frame exceeds `threshold`.
pub struct MotionDetector {
    threshold: u8,
    min_changed_pixels: usize,
    previous: Option<Frame>,
}

impl MotionDetector {
    pub fn new(threshold: u8, min_changed_pixels: usize) -> Self {
        Self {
            threshold,
            min_changed_pixels: min_changed_pixels.max(1),
            previous: None,
        }
    }
}

impl Default for MotionDetector {
    fn default() -> Self {
        Self::new(25, 4)
    }
}

impl Detector for MotionDetector {
    fn classes(&self) -> Option<&'static [&'static str]> {
        Some(&[MOTION_CLASS])
    }

    fn name(&self) -> &'static str {
        "motion"
    }

    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let previous = self.previous.replace(frame.clone());
        let Some(previous) = previous else {
            return Ok(Vec::new());
        };
        if previous.resolution() != frame.resolution() {
            log::debug!(
                "MotionDetector: resolution changed {:?} -> {:?}, resetting",
                previous.resolution(),
                frame.resolution()
            );
            return Ok(Vec::new());
        }

        let (width, height) = frame.resolution();
        let mut mask = Mask::new(width, height);
        let pixels = frame.as_bgr().chunks_exact(CHANNELS);
        let before = previous.as_bgr().chunks_exact(CHANNELS);
        let mut changed = 0usize;
        for (index, (now, then)) in pixels.zip(before).enumerate() {
            let delta = now
                .iter()
                .zip(then)
                .map(|(a, b)| a.abs_diff(*b))
                .max()
                .unwrap_or(0);
            if delta > self.threshold {
                let x = (index % width as usize) as u32;
                let y = (index / width as usize) as u32;
                mask.set(x, y, true);
                changed += 1;
            }
        }

        if changed < self.min_changed_pixels {
            return Ok(Vec::new());
        }
        let total = (width as usize * height as usize).max(1);
        let confidence = (changed as f32 / total as f32).sqrt().clamp(0.0, 1.0);
        Ok(vec![Detection::new(mask, MOTION_CLASS, confidence)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motion_detector_finds_the_changed_region() -> Result<()> {
        let mut detector = MotionDetector::default();
        let still = Frame::filled(10, 10, [0, 0, 0]);
        assert!(detector.detect(&still)?.is_empty());
        assert!(detector.detect(&still)?.is_empty());

        let mut moved = still.clone();
        for y in 2..4 {
            for x in 5..8 {
                let offset = (y * 10 + x) * CHANNELS;
                moved.as_bgr_mut()[offset + 1] = 200;
            }
        }
        let found = detector.detect(&moved)?;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].class_name, MOTION_CLASS);
        assert_eq!(found[0].mask.count(), 6);
        assert!(found[0].confidence > 0.0 && found[0].confidence <= 1.0);

        let bbox = found[0].mask.bounding_box().expect("changed pixels");
        assert_eq!((bbox.x, bbox.y, bbox.w, bbox.h), (5.0, 2.0, 3.0, 2.0));
        Ok(())
    }

    #[test]
    fn small_changes_are_ignored() -> Result<()> {
        let mut detector = MotionDetector::new(25, 1);
        detector.detect(&Frame::filled(4, 4, [100, 100, 100]))?;
        assert!(detector.detect(&Frame::filled(4, 4, [110, 110, 110]))?.is_empty());
        Ok(())
    }
}
