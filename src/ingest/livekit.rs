//! LiveKit room connector.
//!
//! Joins a LiveKit room, turns `TrackSubscribed` events into
//! `TrackAnnouncement`s and forwards each adopted video track's frames as
//! I420 buffers. Join tokens are signed locally with the server API key.

use std::future::Future;

use anyhow::{anyhow, Context, Result};
use futures_util::StreamExt;
use livekit::prelude::{RemoteTrack, Room, RoomEvent, RoomOptions};
use livekit::webrtc::prelude::VideoBuffer;
use livekit::webrtc::video_stream::native::NativeVideoStream;
use livekit_api::access_token::{AccessToken, VideoGrants};
use tokio::sync::mpsc;

use super::session::{
    frame_channel, FrameSender, FrameSubscription, PixelData, RoomConnector, RoomSession,
    TrackAnnouncement, TrackKind, VideoFrameEvent,
};

pub struct LiveKitConnector {
    api_key: String,
    api_secret: String,
}

impl LiveKitConnector {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        let api_secret = api_secret.into();
        if api_key.is_empty() || api_secret.is_empty() {
            return Err(anyhow!("LiveKit API key and secret are required"));
        }
        Ok(Self {
            api_key,
            api_secret,
        })
    }
}

impl RoomConnector for LiveKitConnector {
    fn access_token(&self, room_name: &str, identity: &str) -> Result<String> {
        AccessToken::with_api_key(&self.api_key, &self.api_secret)
            .with_identity(identity)
            .with_grants(VideoGrants {
                room_join: true,
                room: room_name.to_string(),
                ..Default::default()
            })
            .to_jwt()
            .context("sign LiveKit access token")
    }

    fn connect(&self, url: &str, token: &str) -> impl Future<Output = Result<RoomSession>> + Send {
        let url = url.to_string();
        let token = token.to_string();
        async move {
            let (room, events) = Room::connect(&url, &token, RoomOptions::default())
                .await
                .with_context(|| format!("connect to LiveKit at {}", url))?;
            let room_name = room.name();
            let (tx, rx) = mpsc::unbounded_channel();
            tokio::spawn(forward_tracks(events, tx));
            Ok(RoomSession::new(room_name, rx).with_keepalive(room))
        }
    }
}

async fn forward_tracks(
    mut events: mpsc::UnboundedReceiver<RoomEvent>,
    tx: mpsc::UnboundedSender<TrackAnnouncement>,
) {
    while let Some(event) = events.recv().await {
        let announcement = match event {
            RoomEvent::TrackSubscribed { track, .. } => match track {
                RemoteTrack::Audio(audio) => TrackAnnouncement {
                    sid: audio.sid().to_string(),
                    name: audio.name(),
                    kind: TrackKind::Audio,
                    frames: None,
                },
                RemoteTrack::Video(video) => {
                    let sid = video.sid().to_string();
                    let name = video.name();
                    let rtc_track = video.rtc_track();
                    TrackAnnouncement {
                        sid,
                        name,
                        kind: TrackKind::Video,
                        frames: Some(FrameSubscription::new(move || {
                            let (frame_tx, frame_rx) = frame_channel();
                            let stream = NativeVideoStream::new(rtc_track);
                            tokio::spawn(forward_frames(stream, frame_tx));
                            frame_rx
                        })),
                    }
                }
            },
            RoomEvent::Disconnected { reason } => {
                log::info!("LiveKit: disconnected from room ({:?})", reason);
                return;
            }
            _ => continue,
        };
        if tx.send(announcement).is_err() {
            return;
        }
    }
}

async fn forward_frames(mut stream: NativeVideoStream, tx: FrameSender) {
    while let Some(frame) = stream.next().await {
        let i420 = frame.buffer.to_i420();
        let (y, u, v) = i420.data();
        let (stride_y, stride_u, stride_v) = i420.strides();
        let event = VideoFrameEvent {
            width: i420.width(),
            height: i420.height(),
            timestamp_us: frame.timestamp_us,
            pixels: PixelData::I420 {
                y: y.to_vec(),
                u: u.to_vec(),
                v: v.to_vec(),
                stride_y,
                stride_u,
                stride_v,
            },
        };
        if !tx.send(event) {
            return;
        }
    }
}
