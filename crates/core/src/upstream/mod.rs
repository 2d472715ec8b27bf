//! The conferencing-room side of the bridge.
//!
//! Joining a room, negotiating media security, and decrypting RTP all live
//! behind [`RoomConnector`]. The gateway only sees:
//!
//! - a [`Room`] handle holding the joined connection and an event channel,
//! - [`RoomEvent::TrackSubscribed`] carrying a [`RemoteTrack`] whose
//!   [`TrackReader`] yields decoded RTP packets,
//! - a [`KeyframeRequester`] to ask the sender for a fresh keyframe.
//!
//! Track arrival is delivered as a message rather than a callback, so the
//! stream's own control thread decides whether to start a relay.
//!
//! Two connectors are provided:
//!
//! | Connector | Module | Use |
//! |-----------|--------|-----|
//! | [`ChannelConnector`](channel::ChannelConnector) | [`channel`] | In-process rooms fed by the embedding application |
//! | [`UdpConnector`](udp::UdpConnector) | [`udp`] | Plain RTP pushed to a per-session UDP socket |

pub mod channel;
pub mod udp;

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use crate::error::Result;
use crate::media::rtp::RtpPacket;

/// Parameters for joining a room as the egress participant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRequest {
    pub room_name: String,
    /// Participant identity the gateway joins as.
    pub identity: String,
    /// Name of the published track the gateway wants to subscribe to.
    pub track_name: String,
}

/// Kind of a published track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackKind {
    Audio,
    Video,
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Source of decoded RTP packets for one subscribed track.
pub trait TrackReader: Send {
    /// Wait up to `timeout` for the next packet.
    ///
    /// Returns `Ok(None)` when the timeout elapsed with nothing to read and
    /// `Err` once the track is closed or has failed. Callers poll in a loop
    /// and check their own cancellation between calls.
    fn read_rtp(&mut self, timeout: Duration) -> Result<Option<RtpPacket>>;
}

/// One-way loss-recovery signal back to the track's sender.
pub trait KeyframeRequester: Send + Sync {
    /// Ask the sender of `media_ssrc` to emit a full reference frame.
    fn request_keyframe(&self, media_ssrc: u32) -> Result<()>;
}

/// A track the gateway has been subscribed to.
pub struct RemoteTrack {
    pub name: String,
    pub kind: TrackKind,
    /// MIME type of the codec (e.g. `video/H264`).
    pub mime_type: String,
    pub clock_rate: u32,
    pub ssrc: u32,
    pub reader: Box<dyn TrackReader>,
    pub feedback: Arc<dyn KeyframeRequester>,
}

impl RemoteTrack {
    /// Whether the relay can carry this track (H.264 video).
    pub fn is_h264_video(&self) -> bool {
        self.kind == TrackKind::Video && self.mime_type.eq_ignore_ascii_case("video/h264")
    }
}

impl fmt::Debug for RemoteTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteTrack")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("mime_type", &self.mime_type)
            .field("clock_rate", &self.clock_rate)
            .field("ssrc", &format_args!("{:#010X}", self.ssrc))
            .finish_non_exhaustive()
    }
}

/// Events delivered by a joined room.
#[derive(Debug)]
pub enum RoomEvent {
    TrackSubscribed(RemoteTrack),
    /// The room connection ended from the remote side.
    Disconnected,
}

/// Ownership of a joined room connection.
pub trait RoomConnection: Send {
    /// Leave the room and release its resources.
    fn disconnect(&mut self) -> Result<()>;
}

/// A successfully joined room.
pub struct Room {
    pub connection: Box<dyn RoomConnection>,
    pub events: Receiver<RoomEvent>,
}

/// Joins rooms on behalf of streams.
pub trait RoomConnector: Send + Sync {
    /// Join `request.room_name` as `request.identity`.
    ///
    /// Returns [`EgressError::UpstreamJoin`](crate::EgressError::UpstreamJoin)
    /// when the room cannot be reached or the join is refused.
    fn join(&self, request: &JoinRequest) -> Result<Room>;

    /// Check that the room service is reachable. Used by the health endpoint.
    fn probe(&self) -> Result<String> {
        Ok("ok".to_string())
    }
}
