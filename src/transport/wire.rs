//! Workspace state wire format.
//!
//! ```text
//! { "value": {
//!     "timestamp": "2024-05-01T12:00:00.123456Z",
//!     "frame": { "mime": "image/jpeg", "data": "<base64>" },
//!     "resolution": [W, H],
//!     "intrusions": [ { "class_name": "person", "confidence": 0.91, "box": [x, y, w, h] } ]
//! } }
//! ```
//!
//! Boxes are always normalized to `[0, 1]`.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use image::codecs::jpeg::JpegEncoder;
use image::ExtendedColorType;
use serde::{Deserialize, Serialize, Serializer};

use crate::frame::{mask_to_bounding_box, normalize_bounding_box, BoundingBox, Frame};
use crate::monitor::WorkspaceState;

pub const JPEG_MIME: &str = "image/jpeg";
pub const JPEG_QUALITY: u8 = 75;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoxDetection {
    pub class_name: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EncodedFrame {
    pub mime: String,
    pub data: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(serialize_with = "rfc3339_micros")]
    pub timestamp: DateTime<Utc>,
    pub frame: EncodedFrame,
    pub resolution: (u32, u32),
    pub intrusions: Vec<BoxDetection>,
}

/// Single-key wrapper the consumers expect around every message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub value: T,
}

fn rfc3339_micros<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Micros, true))
}

/// JPEG-compress `frame` and wrap the base64 text with its MIME type.
pub fn encode_frame_base64_jpeg(frame: &Frame) -> Result<EncodedFrame> {
    let jpeg = encode_jpeg(frame)?;
    Ok(EncodedFrame {
        mime: JPEG_MIME.to_string(),
        data: BASE64.encode(jpeg),
    })
}

/// Raw JPEG bytes for `frame`.
pub fn encode_jpeg(frame: &Frame) -> Result<Vec<u8>> {
    let rgb = frame.to_rgb();
    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, JPEG_QUALITY)
        .encode(&rgb, frame.width(), frame.height(), ExtendedColorType::Rgb8)
        .context("encode frame as JPEG")?;
    Ok(jpeg)
}

/// Normalized box detections for every intrusion with a non-empty mask.
pub fn box_detections(state: &WorkspaceState) -> Vec<BoxDetection> {
    let resolution = state.frame.resolution();
    state
        .intrusions
        .iter()
        .filter_map(|detection| {
            let Some(bbox) = mask_to_bounding_box(&detection.mask) else {
                log::debug!("Skipping '{}' detection with an empty mask", detection.class_name);
                return None;
            };
            Some(BoxDetection {
                class_name: detection.class_name.clone(),
                confidence: wire_confidence(detection.confidence),
                bbox: normalize_bounding_box(bbox, resolution),
            })
        })
        .collect()
}

/// Confidence clamped to `[0, 1]`; NaN and infinities become 0.
fn wire_confidence(confidence: f32) -> f32 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub fn build_message(state: &WorkspaceState) -> Result<WireMessage> {
    Ok(WireMessage {
        timestamp: state.timestamp,
        frame: encode_frame_base64_jpeg(&state.frame)?,
        resolution: state.frame.resolution(),
        intrusions: box_detections(state),
    })
}

/// Serialized `{"value": message}` payload.
pub fn to_payload(message: &WireMessage) -> Result<Vec<u8>> {
    serde_json::to_vec(&Envelope { value: message }).context("serialize workspace state")
}
