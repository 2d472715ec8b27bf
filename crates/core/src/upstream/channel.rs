//! In-process rooms.
//!
//! The embedding application opens a room, publishes tracks into it, and
//! pushes RTP packets through a [`TrackPublisher`]. A stream joining the
//! room receives the tracks exactly as it would from a remote service.
//!
//! ```
//! use egress::upstream::channel::ChannelConnector;
//! use egress::upstream::{JoinRequest, RoomConnector};
//!
//! let connector = ChannelConnector::new();
//! let room = connector.open_room("demo");
//! let _track = room.publish_h264("cam1", 0x1234).unwrap();
//!
//! let joined = connector.join(&JoinRequest {
//!     room_name: "demo".into(),
//!     identity: "egress-demo-cam1".into(),
//!     track_name: "cam1".into(),
//! });
//! assert!(joined.is_ok());
//! assert_eq!(room.participant().as_deref(), Some("egress-demo-cam1"));
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    JoinRequest, KeyframeRequester, RemoteTrack, Room, RoomConnection, RoomConnector, RoomEvent,
    TrackKind, TrackReader,
};
use crate::error::{EgressError, Result};
use crate::media::rtp::RtpPacket;

struct RoomState {
    name: String,
    events_tx: Sender<RoomEvent>,
    events_rx: Mutex<Option<Receiver<RoomEvent>>>,
    participant: Mutex<Option<String>>,
    fail_disconnect: AtomicBool,
}

/// Connector over rooms that live in this process.
#[derive(Clone, Default)]
pub struct ChannelConnector {
    rooms: Arc<Mutex<HashMap<String, Arc<RoomState>>>>,
    refuse_joins: Arc<AtomicBool>,
}

impl ChannelConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a room so it can be joined. Reopening replaces the previous room.
    pub fn open_room(&self, name: &str) -> ChannelRoom {
        let (events_tx, events_rx) = mpsc::channel();
        let state = Arc::new(RoomState {
            name: name.to_string(),
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
            participant: Mutex::new(None),
            fail_disconnect: AtomicBool::new(false),
        });
        self.rooms.lock().insert(name.to_string(), state.clone());
        tracing::debug!(room = name, "channel room opened");
        ChannelRoom { state }
    }

    /// Close a room. Later joins fail; an existing participant sees
    /// [`RoomEvent::Disconnected`].
    pub fn close_room(&self, name: &str) {
        if let Some(state) = self.rooms.lock().remove(name) {
            let _ = state.events_tx.send(RoomEvent::Disconnected);
            tracing::debug!(room = name, "channel room closed");
        }
    }

    /// Refuse every join, as an unreachable room service would.
    pub fn set_refuse_joins(&self, refuse: bool) {
        self.refuse_joins.store(refuse, Ordering::SeqCst);
    }
}

impl RoomConnector for ChannelConnector {
    fn join(&self, request: &JoinRequest) -> Result<Room> {
        if self.refuse_joins.load(Ordering::SeqCst) {
            return Err(EgressError::UpstreamJoin("room service unavailable".into()));
        }

        let state = self
            .rooms
            .lock()
            .get(&request.room_name)
            .cloned()
            .ok_or_else(|| {
                EgressError::UpstreamJoin(format!("room {} does not exist", request.room_name))
            })?;

        let events = state.events_rx.lock().take().ok_or_else(|| {
            EgressError::UpstreamJoin(format!("room {} already joined", request.room_name))
        })?;

        *state.participant.lock() = Some(request.identity.clone());
        tracing::debug!(room = %request.room_name, identity = %request.identity, "channel room joined");

        Ok(Room {
            connection: Box::new(ChannelConnection { state }),
            events,
        })
    }

    fn probe(&self) -> Result<String> {
        if self.refuse_joins.load(Ordering::SeqCst) {
            return Err(EgressError::UpstreamJoin("room service unavailable".into()));
        }
        Ok(format!("{} rooms open", self.rooms.lock().len()))
    }
}

/// Publishing side of an in-process room.
#[derive(Clone)]
pub struct ChannelRoom {
    state: Arc<RoomState>,
}

impl ChannelRoom {
    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Identity of the participant currently joined, if any.
    pub fn participant(&self) -> Option<String> {
        self.state.participant.lock().clone()
    }

    /// Publish a track. The joined participant (now or later) receives a
    /// [`RoomEvent::TrackSubscribed`] for it.
    pub fn publish_track(
        &self,
        name: &str,
        kind: TrackKind,
        mime_type: &str,
        ssrc: u32,
    ) -> Result<TrackPublisher> {
        let (packets_tx, packets_rx) = mpsc::channel();
        let keyframe_requests = Arc::new(AtomicU64::new(0));

        let track = RemoteTrack {
            name: name.to_string(),
            kind,
            mime_type: mime_type.to_string(),
            clock_rate: 90000,
            ssrc,
            reader: Box::new(ChannelTrackReader { rx: packets_rx }),
            feedback: Arc::new(ChannelFeedback {
                requests: keyframe_requests.clone(),
            }),
        };

        self.state
            .events_tx
            .send(RoomEvent::TrackSubscribed(track))
            .map_err(|_| EgressError::UpstreamJoin(format!("room {} is gone", self.state.name)))?;

        Ok(TrackPublisher {
            tx: packets_tx,
            keyframe_requests,
        })
    }

    /// Publish an H.264 video track.
    pub fn publish_h264(&self, name: &str, ssrc: u32) -> Result<TrackPublisher> {
        self.publish_track(name, TrackKind::Video, "video/H264", ssrc)
    }

    /// Make the next disconnect of this room report a failure.
    pub fn fail_disconnect(&self) {
        self.state.fail_disconnect.store(true, Ordering::SeqCst);
    }
}

/// Pushes packets into a published track. Dropping it closes the track.
pub struct TrackPublisher {
    tx: Sender<RtpPacket>,
    keyframe_requests: Arc<AtomicU64>,
}

impl TrackPublisher {
    /// Fails once the subscriber has stopped reading the track.
    pub fn send(&self, packet: RtpPacket) -> Result<()> {
        self.tx
            .send(packet)
            .map_err(|_| EgressError::RelayTerminated("track reader dropped".into()))
    }

    /// Number of keyframe requests received from the subscriber.
    pub fn keyframe_requests(&self) -> u64 {
        self.keyframe_requests.load(Ordering::SeqCst)
    }
}

struct ChannelTrackReader {
    rx: Receiver<RtpPacket>,
}

impl TrackReader for ChannelTrackReader {
    fn read_rtp(&mut self, timeout: Duration) -> Result<Option<RtpPacket>> {
        match self.rx.recv_timeout(timeout) {
            Ok(packet) => Ok(Some(packet)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => {
                Err(EgressError::RelayTerminated("track unpublished".into()))
            }
        }
    }
}

struct ChannelFeedback {
    requests: Arc<AtomicU64>,
}

impl KeyframeRequester for ChannelFeedback {
    fn request_keyframe(&self, media_ssrc: u32) -> Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tracing::trace!(ssrc = format_args!("{:#010X}", media_ssrc), "keyframe requested");
        Ok(())
    }
}

struct ChannelConnection {
    state: Arc<RoomState>,
}

impl RoomConnection for ChannelConnection {
    fn disconnect(&mut self) -> Result<()> {
        let identity = self.state.participant.lock().take();
        tracing::debug!(room = %self.state.name, ?identity, "channel room left");
        if self.state.fail_disconnect.load(Ordering::SeqCst) {
            return Err(EgressError::Teardown(format!(
                "room {} did not acknowledge leave",
                self.state.name
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(room: &str) -> JoinRequest {
        JoinRequest {
            room_name: room.into(),
            identity: format!("egress-{room}-cam1"),
            track_name: "cam1".into(),
        }
    }

    #[test]
    fn join_unknown_room_fails() {
        let connector = ChannelConnector::new();
        let err = connector.join(&request("nowhere")).err().unwrap();
        assert!(matches!(err, EgressError::UpstreamJoin(_)));
    }

    #[test]
    fn second_join_is_refused() {
        let connector = ChannelConnector::new();
        connector.open_room("demo");
        assert!(connector.join(&request("demo")).is_ok());
        assert!(connector.join(&request("demo")).is_err());
    }

    #[test]
    fn refused_joins() {
        let connector = ChannelConnector::new();
        connector.open_room("demo");
        connector.set_refuse_joins(true);
        assert!(connector.join(&request("demo")).is_err());
        assert!(connector.probe().is_err());
    }

    #[test]
    fn published_track_is_delivered_and_readable() {
        let connector = ChannelConnector::new();
        let room = connector.open_room("demo");
        let publisher = room.publish_h264("cam1", 0x42).unwrap();
        let joined = connector.join(&request("demo")).unwrap();

        let event = joined.events.recv_timeout(Duration::from_secs(1)).unwrap();
        let RoomEvent::TrackSubscribed(mut track) = event else {
            panic!("expected track subscription");
        };
        assert!(track.is_h264_video());
        assert_eq!(track.name, "cam1");

        publisher.send(RtpPacket::new(96, 7, 0, 0x42)).unwrap();
        let packet = track
            .reader
            .read_rtp(Duration::from_secs(1))
            .unwrap()
            .unwrap();
        assert_eq!(packet.sequence_number, 7);
        assert!(
            track
                .reader
                .read_rtp(Duration::from_millis(10))
                .unwrap()
                .is_none()
        );

        track.feedback.request_keyframe(0x42).unwrap();
        assert_eq!(publisher.keyframe_requests(), 1);

        drop(publisher);
        assert!(track.reader.read_rtp(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn disconnect_clears_participant() {
        let connector = ChannelConnector::new();
        let room = connector.open_room("demo");
        let mut joined = connector.join(&request("demo")).unwrap();
        assert!(room.participant().is_some());
        joined.connection.disconnect().unwrap();
        assert!(room.participant().is_none());
    }
}
