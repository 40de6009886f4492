//! In-process room for `stub://` live locations.
//!
//! `stub://<room>?tracks=<name>[:audio],...&fps=<f>&frames=<n>&size=<W>x<H>&format=<rgb|i420>&delay_ms=<d>`
//!
//! Tracks are announced in order once `delay_ms` has passed. Video tracks
//! stream `pattern_frame`s at `fps`; without `frames` they never end. Adding
//! `reject=1` makes the join itself fail.

use std::future::Future;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc;

use super::session::{
    frame_channel, FrameSender, FrameSubscription, PixelData, RoomConnector, RoomSession,
    TrackAnnouncement, TrackKind, VideoFrameEvent,
};
use super::synthetic::{pattern_frame, StubLocation};
use crate::error::MonitorError;
use crate::frame::Frame;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WireFormat {
    Rgb,
    I420,
}

#[derive(Clone, Debug)]
struct StubTrack {
    name: String,
    kind: TrackKind,
}

#[derive(Clone, Debug)]
struct StubRoom {
    name: String,
    tracks: Vec<StubTrack>,
    fps: f64,
    frames: Option<u64>,
    size: (u32, u32),
    format: WireFormat,
    delay: Duration,
    reject: bool,
}

impl StubRoom {
    fn parse(location: &str) -> Result<Self> {
        let stub = StubLocation::parse(location)?;
        let tracks = match stub.param("tracks") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(parse_track)
                .collect::<Result<Vec<_>>>()?,
            None => vec![StubTrack {
                name: "camera".to_string(),
                kind: TrackKind::Video,
            }],
        };
        let format = match stub.param("format").as_deref() {
            None | Some("rgb") => WireFormat::Rgb,
            Some("i420") => WireFormat::I420,
            Some(other) => return Err(anyhow!("unsupported stub pixel format '{}'", other)),
        };
        let fps = stub.fps()?;
        if !(fps.is_finite() && fps > 0.0) {
            return Err(anyhow!("stub room fps must be positive, got {}", fps));
        }
        Ok(Self {
            tracks,
            fps,
            frames: stub.frames()?,
            size: stub.size()?,
            format,
            delay: Duration::from_millis(stub.parsed::<u64>("delay_ms")?.unwrap_or(0)),
            reject: stub.parsed::<u8>("reject")?.unwrap_or(0) != 0,
            name: stub.name,
        })
    }
}

fn parse_track(entry: &str) -> Result<StubTrack> {
    let (name, kind) = match entry.split_once(':') {
        None => (entry, TrackKind::Video),
        Some((name, "video")) => (name, TrackKind::Video),
        Some((name, "audio")) => (name, TrackKind::Audio),
        Some((_, other)) => return Err(anyhow!("unknown stub track kind '{}'", other)),
    };
    Ok(StubTrack {
        name: name.to_string(),
        kind,
    })
}

/// `RoomConnector` for `stub://` rooms.
#[derive(Clone, Copy, Debug, Default)]
pub struct StubRoomConnector;

impl RoomConnector for StubRoomConnector {
    fn access_token(&self, room_name: &str, identity: &str) -> Result<String> {
        Ok(format!("stub-token:{}:{}", room_name, identity))
    }

    fn connect(&self, url: &str, token: &str) -> impl Future<Output = Result<RoomSession>> + Send {
        let room = StubRoom::parse(url);
        let has_token = !token.is_empty();
        async move {
            let room = room?;
            if !has_token {
                return Err(MonitorError::Session("empty access token".into()).into());
            }
            if room.reject {
                return Err(MonitorError::Session(format!("room '{}' rejected the join", room.name)).into());
            }

            let (announce_tx, announce_rx) = mpsc::unbounded_channel();
            let name = room.name.clone();
            tokio::spawn(announce_tracks(room, announce_tx));
            Ok(RoomSession::new(name, announce_rx))
        }
    }
}

async fn announce_tracks(room: StubRoom, tx: mpsc::UnboundedSender<TrackAnnouncement>) {
    if !room.delay.is_zero() {
        tokio::time::sleep(room.delay).await;
    }
    for (index, track) in room.tracks.iter().enumerate() {
        let frames = (track.kind == TrackKind::Video).then(|| {
            let room = room.clone();
            FrameSubscription::new(move || {
                let (frame_tx, frame_rx) = frame_channel();
                tokio::spawn(stream_frames(room, frame_tx));
                frame_rx
            })
        });
        let announcement = TrackAnnouncement {
            sid: format!("TR_stub{}", index),
            name: track.name.clone(),
            kind: track.kind,
            frames,
        };
        if tx.send(announcement).is_err() {
            return;
        }
    }
    // Hold the announcement channel open for the life of the session.
    tx.closed().await;
}

async fn stream_frames(room: StubRoom, tx: FrameSender) {
    let period = Duration::from_secs_f64(1.0 / room.fps);
    let mut ticker = tokio::time::interval(period);
    let (width, height) = room.size;
    let mut index = 0u64;
    loop {
        if room.frames.is_some_and(|total| index >= total) {
            return;
        }
        ticker.tick().await;
        let frame = pattern_frame(index, width, height);
        let event = VideoFrameEvent {
            width,
            height,
            timestamp_us: (index as f64 * 1_000_000.0 / room.fps) as i64,
            pixels: encode(&frame, room.format),
        };
        if !tx.send(event) {
            return;
        }
        index += 1;
    }
}

fn encode(frame: &Frame, format: WireFormat) -> PixelData {
    match format {
        WireFormat::Rgb => PixelData::Rgb24(frame.to_rgb()),
        WireFormat::I420 => bgr_to_i420(frame),
    }
}

/// BT.601 full-range, chroma sampled from the top-left pixel of each 2x2 block.
fn bgr_to_i420(frame: &Frame) -> PixelData {
    let (w, h) = (frame.width() as usize, frame.height() as usize);
    let (cw, ch) = (w.div_ceil(2), h.div_ceil(2));
    let data = frame.as_bgr();
    let mut y = vec![0u8; w * h];
    let mut u = vec![0u8; cw * ch];
    let mut v = vec![0u8; cw * ch];

    for j in 0..h {
        for i in 0..w {
            let px = &data[(j * w + i) * 3..(j * w + i) * 3 + 3];
            let (b, g, r) = (px[0] as f32, px[1] as f32, px[2] as f32);
            y[j * w + i] = to_u8(0.299 * r + 0.587 * g + 0.114 * b);
            if j % 2 == 0 && i % 2 == 0 {
                let c = (j / 2) * cw + i / 2;
                u[c] = to_u8(-0.168_736 * r - 0.331_264 * g + 0.5 * b + 128.0);
                v[c] = to_u8(0.5 * r - 0.418_688 * g - 0.081_312 * b + 128.0);
            }
        }
    }

    PixelData::I420 {
        y,
        u,
        v,
        stride_y: w as u32,
        stride_u: cw as u32,
        stride_v: cw as u32,
    }
}

fn to_u8(value: f32) -> u8 {
    value.round().clamp(0.0, 255.0) as u8
}
