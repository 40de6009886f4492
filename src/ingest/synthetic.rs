//! Synthetic media for `stub://` locations.
//!
//! Recorded form: `stub://<name>?fps=<f>&frames=<n>&size=<W>x<H>`.
//! Every generated frame carries its zero-based index in its first eight
//! bytes (little endian), which `frame_index` reads back. The rest of the
//! image is a dark background with a bright block that slides one step per
//! frame, so frame differencing has something to find.

use anyhow::{anyhow, Context, Result};
use url::Url;

use super::recorded::FrameReader;
use crate::frame::{Frame, CHANNELS};

pub const DEFAULT_FPS: f64 = 30.0;
pub const DEFAULT_SIZE: (u32, u32) = (64, 48);

const INDEX_BYTES: usize = 8;
const BACKGROUND: [u8; 3] = [24, 24, 24];
const BLOCK: [u8; 3] = [40, 220, 250];

pub fn is_stub(location: &str) -> bool {
    location.starts_with("stub://")
}

/// Parsed `stub://` location.
#[derive(Clone, Debug)]
pub(crate) struct StubLocation {
    pub name: String,
    url: Url,
}

impl StubLocation {
    pub fn parse(location: &str) -> Result<Self> {
        let url = Url::parse(location).with_context(|| format!("invalid stub location '{}'", location))?;
        if url.scheme() != "stub" {
            return Err(anyhow!("'{}' is not a stub:// location", location));
        }
        let name = url.host_str().unwrap_or_default().to_string();
        Ok(Self { name, url })
    }

    pub fn param(&self, key: &str) -> Option<String> {
        self.url
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    pub fn parsed<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>> {
        match self.param(key) {
            None => Ok(None),
            Some(raw) => raw
                .parse::<T>()
                .map(Some)
                .map_err(|_| anyhow!("stub parameter '{}' has invalid value '{}'", key, raw)),
        }
    }

    pub fn fps(&self) -> Result<f64> {
        Ok(self.parsed::<f64>("fps")?.unwrap_or(DEFAULT_FPS))
    }

    pub fn frames(&self) -> Result<Option<u64>> {
        self.parsed::<u64>("frames")
    }

    pub fn size(&self) -> Result<(u32, u32)> {
        match self.param("size") {
            None => Ok(DEFAULT_SIZE),
            Some(raw) => parse_size(&raw),
        }
    }
}

/// `"640x480"` -> `(640, 480)`. Frames must be large enough to hold the index.
pub(crate) fn parse_size(raw: &str) -> Result<(u32, u32)> {
    let (w, h) = raw
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("size '{}' must look like <W>x<H>", raw))?;
    let width: u32 = w.trim().parse().map_err(|_| anyhow!("invalid width in '{}'", raw))?;
    let height: u32 = h.trim().parse().map_err(|_| anyhow!("invalid height in '{}'", raw))?;
    if (width as usize) * (height as usize) * CHANNELS < INDEX_BYTES {
        return Err(anyhow!("size '{}' is too small for a synthetic frame", raw));
    }
    Ok((width, height))
}

/// Deterministic test pattern for frame `index`.
pub fn pattern_frame(index: u64, width: u32, height: u32) -> Frame {
    let mut frame = Frame::filled(width, height, BACKGROUND);
    let side = (width.min(height) / 4).max(1);
    let travel = width.saturating_sub(side).max(1);
    let x0 = (index % u64::from(travel)) as u32;
    let y0 = height.saturating_sub(side) / 2;

    let row_len = width as usize * CHANNELS;
    let data = frame.as_bgr_mut();
    for y in y0..(y0 + side).min(height) {
        for x in x0..(x0 + side).min(width) {
            let offset = y as usize * row_len + x as usize * CHANNELS;
            data[offset..offset + CHANNELS].copy_from_slice(&BLOCK);
        }
    }
    stamp_index(data, index);
    frame
}

/// Index stamped into a synthetic frame, if it is large enough to carry one.
pub fn frame_index(frame: &Frame) -> Option<u64> {
    let head = frame.as_bgr().get(..INDEX_BYTES)?;
    let mut bytes = [0u8; INDEX_BYTES];
    bytes.copy_from_slice(head);
    Some(u64::from_le_bytes(bytes))
}

fn stamp_index(data: &mut [u8], index: u64) {
    if let Some(head) = data.get_mut(..INDEX_BYTES) {
        head.copy_from_slice(&index.to_le_bytes());
    }
}

/// `FrameReader` over generated frames.
pub struct SyntheticReader {
    name: String,
    fps: f64,
    total: Option<u64>,
    size: (u32, u32),
    produced: u64,
}

impl SyntheticReader {
    pub fn open(location: &str) -> Result<Self> {
        let stub = StubLocation::parse(location)?;
        Ok(Self {
            fps: stub.fps()?,
            total: stub.frames()?,
            size: stub.size()?,
            name: stub.name,
            produced: 0,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl FrameReader for SyntheticReader {
    fn fps(&self) -> f64 {
        self.fps
    }

    fn read(&mut self) -> Result<Option<Frame>> {
        if self.total.is_some_and(|total| self.produced >= total) {
            return Ok(None);
        }
        let frame = pattern_frame(self.produced, self.size.0, self.size.1);
        self.produced += 1;
        Ok(Some(frame))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_honours_query_parameters() -> Result<()> {
        let mut reader = SyntheticReader::open("stub://clip?fps=12.5&frames=2&size=16x8")?;
        assert_eq!(reader.name(), "clip");
        assert_eq!(reader.fps(), 12.5);

        let first = reader.read()?.expect("first frame");
        assert_eq!(first.resolution(), (16, 8));
        assert_eq!(frame_index(&first), Some(0));
        assert_eq!(reader.read()?.and_then(|f| frame_index(&f)), Some(1));
        assert!(reader.read()?.is_none());
        Ok(())
    }

    #[test]
    fn defaults_apply_without_query() -> Result<()> {
        let mut reader = SyntheticReader::open("stub://plain")?;
        assert_eq!(reader.fps(), DEFAULT_FPS);
        let frame = reader.read()?.expect("frame");
        assert_eq!(frame.resolution(), DEFAULT_SIZE);
        Ok(())
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        assert!(SyntheticReader::open("stub://x?fps=fast").is_err());
        assert!(SyntheticReader::open("stub://x?size=64").is_err());
        assert!(SyntheticReader::open("stub://x?size=1x1").is_err());
        assert!(SyntheticReader::open("file:///tmp/clip.mp4").is_err());
    }

    #[test]
    fn consecutive_patterns_differ_outside_the_index() {
        let a = pattern_frame(3, 32, 24);
        let b = pattern_frame(4, 32, 24);
        assert_ne!(a.as_bgr()[INDEX_BYTES..], b.as_bgr()[INDEX_BYTES..]);
        assert_eq!(frame_index(&b), Some(4));
    }
}
