//! Decoded frames, detection masks and bounding boxes.
//!
//! - `Frame`: owned BGR24 interleaved image buffer. Sources hand out copies, so
//!   a consumer never observes a buffer another thread is still writing.
//! - `Mask`: image-sized boolean occupancy map produced by a detector.
//! - `BoundingBox`: `(x, y, w, h)` in pixels or normalized to `[0, 1]`.

use std::fmt;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Bytes per pixel of the canonical frame layout (B, G, R).
pub const CHANNELS: usize = 3;

// ----------------------------------------------------------------------------
// Frame
// ----------------------------------------------------------------------------

/// Decoded image in BGR24 interleaved order, row-major, no padding.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
}

impl Frame {
    /// Wrap an existing BGR24 buffer. The length must be exactly `width * height * 3`.
    pub fn from_bgr(data: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = byte_len(width, height)?;
        if data.len() != expected {
            return Err(anyhow!(
                "BGR frame length mismatch: expected {}, got {}",
                expected,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Frame filled with a single BGR color.
    pub fn filled(width: u32, height: u32, bgr: [u8; 3]) -> Self {
        let pixels = width as usize * height as usize;
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&bgr);
        }
        Self {
            data,
            width,
            height,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// `(width, height)`.
    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn as_bgr(&self) -> &[u8] {
        &self.data
    }

    pub fn as_bgr_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_bgr(self) -> Vec<u8> {
        self.data
    }

    /// BGR triple at `(x, y)`, or `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
        ])
    }

    /// Copy of the pixels in RGB24 order, as image codecs expect.
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut rgb = Vec::with_capacity(self.data.len());
        for px in self.data.chunks_exact(CHANNELS) {
            rgb.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        rgb
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.data.len())
            .finish()
    }
}

pub(crate) fn byte_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(CHANNELS))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// Mask
// ----------------------------------------------------------------------------

/// Binary occupancy mask, `true` where the object covers the pixel.
#[derive(Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    /// All-false mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut bits = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                bits.push(f(x, y));
            }
        }
        Self {
            width,
            height,
            bits,
        }
    }

    /// Mask with a filled axis-aligned rectangle at `(x0, y0)` of size `w x h`.
    pub fn rectangle(width: u32, height: u32, x0: u32, y0: u32, w: u32, h: u32) -> Self {
        Self::from_fn(width, height, |x, y| {
            x >= x0 && x < x0.saturating_add(w) && y >= y0 && y < y0.saturating_add(h)
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn get(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        self.bits[y as usize * self.width as usize + x as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: bool) {
        if x < self.width && y < self.height {
            self.bits[y as usize * self.width as usize + x as usize] = value;
        }
    }

    /// Number of occupied pixels.
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|&b| b)
    }

    /// Pixel-space extent of all occupied pixels; `None` for an empty mask.
    pub fn bounding_box(&self) -> Option<BoundingBox> {
        mask_to_bounding_box(self)
    }
}

impl fmt::Debug for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mask")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("occupied", &self.count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// BoundingBox
// ----------------------------------------------------------------------------

/// `(x, y, w, h)`: top-left corner and dimensions.
///
/// Serializes as a four-element array, which is how the wire message carries it.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 4]", into = "[f64; 4]")]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl BoundingBox {
    pub fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// Scale pixel coordinates into `[0, 1]` relative to `(width, height)`.
    pub fn normalize(self, resolution: (u32, u32)) -> BoundingBox {
        normalize_bounding_box(self, resolution)
    }

    /// True when every component lies in `[0, 1]`.
    pub fn is_normalized(&self) -> bool {
        [self.x, self.y, self.w, self.h]
            .iter()
            .all(|v| (0.0..=1.0).contains(v))
    }
}

impl From<[f64; 4]> for BoundingBox {
    fn from([x, y, w, h]: [f64; 4]) -> Self {
        Self { x, y, w, h }
    }
}

impl From<BoundingBox> for [f64; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x, b.y, b.w, b.h]
    }
}

/// Axis-aligned extent of the occupied pixels, in pixel units.
///
/// The extent is inclusive: a single occupied pixel yields `w = h = 1`.
/// Returns `None` when no pixel is occupied.
pub fn mask_to_bounding_box(mask: &Mask) -> Option<BoundingBox> {
    let mut min_x = u32::MAX;
    let mut min_y = u32::MAX;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut any = false;

    let row_len = mask.width as usize;
    for y in 0..mask.height {
        let start = y as usize * row_len;
        let row = &mask.bits[start..start + row_len];
        for (x, &occupied) in row.iter().enumerate() {
            if !occupied {
                continue;
            }
            let x = x as u32;
            any = true;
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }
    }

    if !any {
        return None;
    }

    Some(BoundingBox {
        x: min_x as f64,
        y: min_y as f64,
        w: (max_x - min_x + 1) as f64,
        h: (max_y - min_y + 1) as f64,
    })
}

/// Divide a pixel-space box by `(width, height)`, clamped into `[0, 1]`.
pub fn normalize_bounding_box(bbox: BoundingBox, resolution: (u32, u32)) -> BoundingBox {
    let (width, height) = resolution;
    let width = f64::from(width.max(1));
    let height = f64::from(height.max(1));

    BoundingBox {
        x: clamp_unit(bbox.x / width),
        y: clamp_unit(bbox.y / height),
        w: clamp_unit(bbox.w / width),
        h: clamp_unit(bbox.h / height),
    }
}

fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    value.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_bgr_validates_length() {
        assert!(Frame::from_bgr(vec![0u8; 12], 2, 2).is_ok());
        let err = Frame::from_bgr(vec![0u8; 11], 2, 2).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn rgb_copy_swaps_channels() -> Result<()> {
        let frame = Frame::from_bgr(vec![1, 2, 3, 4, 5, 6], 2, 1)?;
        assert_eq!(frame.to_rgb(), vec![3, 2, 1, 6, 5, 4]);
        assert_eq!(frame.pixel(1, 0), Some([4, 5, 6]));
        assert_eq!(frame.pixel(2, 0), None);
        Ok(())
    }

    #[test]
    fn rectangle_mask_round_trips_through_bounding_box() {
        let mask = Mask::rectangle(64, 48, 10, 5, 20, 8);
        assert_eq!(mask.count(), 160);

        let bbox = mask.bounding_box().expect("non-empty mask");
        assert_eq!(bbox, BoundingBox::new(10.0, 5.0, 20.0, 8.0));

        let norm = bbox.normalize((64, 48));
        assert!((norm.x - 10.0 / 64.0).abs() < 1e-12);
        assert!((norm.y - 5.0 / 48.0).abs() < 1e-12);
        assert!((norm.w - 20.0 / 64.0).abs() < 1e-12);
        assert!((norm.h - 8.0 / 48.0).abs() < 1e-12);
    }

    #[test]
    fn empty_mask_has_no_bounding_box() {
        assert!(Mask::new(4, 4).bounding_box().is_none());
        assert!(Mask::new(4, 4).is_empty());
    }

    #[test]
    fn single_pixel_mask_has_unit_extent() {
        let mut mask = Mask::new(8, 8);
        mask.set(7, 7, true);
        assert_eq!(
            mask.bounding_box(),
            Some(BoundingBox::new(7.0, 7.0, 1.0, 1.0))
        );
    }

    #[test]
    fn normalization_clamps_out_of_range_boxes() {
        let wild = BoundingBox::new(-5.0, 30.0, 400.0, 2.0);
        let norm = normalize_bounding_box(wild, (100, 20));
        assert!(norm.is_normalized());
        assert_eq!(norm.x, 0.0);
        assert_eq!(norm.y, 1.0);
        assert_eq!(norm.w, 1.0);
    }

    #[test]
    fn bounding_box_serializes_as_array() -> Result<()> {
        let json = serde_json::to_string(&BoundingBox::new(0.5, 0.25, 0.125, 1.0))?;
        assert_eq!(json, "[0.5,0.25,0.125,1.0]");
        Ok(())
    }
}
