use anyhow::{anyhow, Result};

use crate::frame::{byte_len, Frame};
use crate::ingest::session::PixelData;

/// Convert an inbound pixel buffer of any supported layout into a BGR24 frame.
pub(crate) fn to_bgr(pixels: PixelData, width: u32, height: u32) -> Result<Frame> {
    match pixels {
        PixelData::Bgr24(data) => Frame::from_bgr(data, width, height),
        PixelData::Rgb24(data) => {
            let mut data = data;
            expect_len("RGB", data.len(), byte_len(width, height)?)?;
            for px in data.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            Frame::from_bgr(data, width, height)
        }
        PixelData::Rgba32(data) => {
            let pixel_count = (width as usize)
                .checked_mul(height as usize)
                .ok_or_else(|| anyhow!("RGBA frame dimensions overflow"))?;
            expect_len("RGBA", data.len(), pixel_count * 4)?;
            let mut bgr = Vec::with_capacity(pixel_count * 3);
            for px in data.chunks_exact(4) {
                bgr.extend_from_slice(&[px[2], px[1], px[0]]);
            }
            Frame::from_bgr(bgr, width, height)
        }
        PixelData::I420 {
            y,
            u,
            v,
            stride_y,
            stride_u,
            stride_v,
        } => i420_to_bgr(
            Planes {
                y: &y,
                u: &u,
                v: &v,
                stride_y: stride_y as usize,
                stride_u: stride_u as usize,
                stride_v: stride_v as usize,
            },
            width,
            height,
        ),
    }
}

struct Planes<'a> {
    y: &'a [u8],
    u: &'a [u8],
    v: &'a [u8],
    stride_y: usize,
    stride_u: usize,
    stride_v: usize,
}

fn i420_to_bgr(planes: Planes<'_>, width: u32, height: u32) -> Result<Frame> {
    let w = width as usize;
    let h = height as usize;
    let chroma_w = w.div_ceil(2);
    let chroma_h = h.div_ceil(2);

    check_plane("Y", planes.y, planes.stride_y, w, h)?;
    check_plane("U", planes.u, planes.stride_u, chroma_w, chroma_h)?;
    check_plane("V", planes.v, planes.stride_v, chroma_w, chroma_h)?;

    let mut bgr = vec![0u8; byte_len(width, height)?];
    for j in 0..h {
        for i in 0..w {
            let y = planes.y[j * planes.stride_y + i] as f32;
            let u = planes.u[(j / 2) * planes.stride_u + i / 2] as f32 - 128.0;
            let v = planes.v[(j / 2) * planes.stride_v + i / 2] as f32 - 128.0;

            let r = y + 1.402_f32 * v;
            let g = y - 0.344_136_f32 * u - 0.714_136_f32 * v;
            let b = y + 1.772_f32 * u;

            let offset = (j * w + i) * 3;
            bgr[offset] = clamp_to_u8(b);
            bgr[offset + 1] = clamp_to_u8(g);
            bgr[offset + 2] = clamp_to_u8(r);
        }
    }

    Frame::from_bgr(bgr, width, height)
}

fn check_plane(name: &str, plane: &[u8], stride: usize, cols: usize, rows: usize) -> Result<()> {
    if rows == 0 || cols == 0 {
        return Ok(());
    }
    if stride < cols {
        return Err(anyhow!(
            "I420 {} stride {} is narrower than row width {}",
            name,
            stride,
            cols
        ));
    }
    let needed = (rows - 1) * stride + cols;
    if plane.len() < needed {
        return Err(anyhow!(
            "I420 {} plane too short: need {} bytes, got {}",
            name,
            needed,
            plane.len()
        ));
    }
    Ok(())
}

fn expect_len(layout: &str, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(anyhow!(
            "{} frame length mismatch: expected {}, got {}",
            layout,
            expected,
            actual
        ));
    }
    Ok(())
}

fn clamp_to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
