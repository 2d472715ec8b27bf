//! RTP over plain UDP.
//!
//! Each join binds a fresh UDP socket and immediately reports one H.264
//! video track named after the requested track. Whatever pushes RTP to
//! that socket (an SFU egress, `ffmpeg -f rtp`, a GStreamer `udpsink`)
//! becomes the upstream sender. Keyframe requests are answered with an
//! RTCP PLI (RFC 4585 §6.3.1) to the address the last packet came from.
//!
//! The bound address is logged at `info` when the join completes.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{
    JoinRequest, KeyframeRequester, RemoteTrack, Room, RoomConnection, RoomConnector, RoomEvent,
    TrackKind, TrackReader,
};
use crate::error::{EgressError, Result};
use crate::media::rtcp;
use crate::media::rtp::RtpPacket;

const MAX_DATAGRAM: usize = 65536;

/// Connector that accepts RTP on an ephemeral UDP port per session.
pub struct UdpConnector {
    bind_host: String,
    /// Ingest address per joined identity, removed on disconnect.
    bound: Arc<Mutex<HashMap<String, SocketAddr>>>,
}

impl UdpConnector {
    /// `bind_host` is the local interface ingest sockets bind to.
    pub fn new(bind_host: &str) -> Self {
        Self {
            bind_host: bind_host.to_string(),
            bound: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Address RTP must be sent to for the participant joined as `identity`.
    pub fn ingest_addr(&self, identity: &str) -> Option<SocketAddr> {
        self.bound.lock().get(identity).copied()
    }
}

impl RoomConnector for UdpConnector {
    fn join(&self, request: &JoinRequest) -> Result<Room> {
        let socket = UdpSocket::bind((self.bind_host.as_str(), 0))
            .map_err(|e| EgressError::UpstreamJoin(format!("bind ingest socket: {e}")))?;
        let local_addr = socket.local_addr()?;
        let feedback_socket = socket.try_clone()?;

        let closed = Arc::new(AtomicBool::new(false));
        let peer = Arc::new(Mutex::new(None));

        let track = RemoteTrack {
            name: request.track_name.clone(),
            kind: TrackKind::Video,
            mime_type: "video/H264".to_string(),
            clock_rate: 90000,
            ssrc: 0,
            reader: Box::new(UdpTrackReader {
                socket,
                peer: peer.clone(),
                closed: closed.clone(),
                buf: vec![0u8; MAX_DATAGRAM],
            }),
            feedback: Arc::new(UdpFeedback {
                socket: feedback_socket,
                peer,
                sender_ssrc: rand::random::<u32>(),
            }),
        };

        let (events_tx, events) = mpsc::channel();
        // The receiver is returned below, so this send cannot fail.
        let _ = events_tx.send(RoomEvent::TrackSubscribed(track));

        self.bound.lock().insert(request.identity.clone(), local_addr);
        tracing::info!(
            room = %request.room_name,
            identity = %request.identity,
            track = %request.track_name,
            ingest = %local_addr,
            "UDP ingest bound"
        );

        Ok(Room {
            connection: Box::new(UdpConnection {
                closed,
                local_addr,
                identity: request.identity.clone(),
                bound: self.bound.clone(),
            }),
            events,
        })
    }

    fn probe(&self) -> Result<String> {
        Ok(format!("udp ingest on {}", self.bind_host))
    }
}

struct UdpTrackReader {
    socket: UdpSocket,
    peer: Arc<Mutex<Option<SocketAddr>>>,
    closed: Arc<AtomicBool>,
    buf: Vec<u8>,
}

impl TrackReader for UdpTrackReader {
    fn read_rtp(&mut self, timeout: Duration) -> Result<Option<RtpPacket>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EgressError::RelayTerminated("ingest socket closed".into()));
        }

        self.socket
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;

        let (len, from) = match self.socket.recv_from(&mut self.buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        // RTCP multiplexed on the same port (RFC 5761 §4): PT 192–223.
        if len >= 2 && (192..=223).contains(&self.buf[1]) {
            tracing::trace!(%from, len, "ignoring RTCP on ingest socket");
            return Ok(None);
        }

        match RtpPacket::parse(&self.buf[..len]) {
            Ok(packet) => {
                *self.peer.lock() = Some(from);
                Ok(Some(packet))
            }
            Err(e) => {
                tracing::trace!(%from, len, error = %e, "dropping unparseable datagram");
                Ok(None)
            }
        }
    }
}

struct UdpFeedback {
    socket: UdpSocket,
    peer: Arc<Mutex<Option<SocketAddr>>>,
    sender_ssrc: u32,
}

impl KeyframeRequester for UdpFeedback {
    fn request_keyframe(&self, media_ssrc: u32) -> Result<()> {
        let Some(peer) = *self.peer.lock() else {
            tracing::debug!("keyframe request before any packet arrived; nothing to notify");
            return Ok(());
        };
        let pli = rtcp::picture_loss_indication(self.sender_ssrc, media_ssrc);
        self.socket.send_to(&pli, peer)?;
        tracing::debug!(%peer, ssrc = format_args!("{:#010X}", media_ssrc), "PLI sent");
        Ok(())
    }
}

struct UdpConnection {
    closed: Arc<AtomicBool>,
    local_addr: SocketAddr,
    identity: String,
    bound: Arc<Mutex<HashMap<String, SocketAddr>>>,
}

impl RoomConnection for UdpConnection {
    fn disconnect(&mut self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.bound.lock().remove(&self.identity);
        tracing::info!(ingest = %self.local_addr, "UDP ingest released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDENTITY: &str = "egress-demo-cam1";

    fn join(connector: &UdpConnector) -> (Room, RemoteTrack) {
        let room = connector
            .join(&JoinRequest {
                room_name: "demo".into(),
                identity: IDENTITY.into(),
                track_name: "cam1".into(),
            })
            .unwrap();
        let RoomEvent::TrackSubscribed(track) = room.events.try_recv().unwrap() else {
            panic!("expected track subscription");
        };
        (room, track)
    }

    #[test]
    fn join_reports_h264_track_named_after_request() {
        let connector = UdpConnector::new("127.0.0.1");
        let (_room, track) = join(&connector);
        assert!(track.is_h264_video());
        assert_eq!(track.name, "cam1");
        assert!(connector.ingest_addr(IDENTITY).is_some());
    }

    #[test]
    fn reads_rtp_and_answers_pli_to_sender() {
        let connector = UdpConnector::new("127.0.0.1");
        let (_room, mut track) = join(&connector);
        let ingest = connector.ingest_addr(IDENTITY).unwrap();

        assert!(
            track
                .reader
                .read_rtp(Duration::from_millis(10))
                .unwrap()
                .is_none()
        );

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();
        let packet = RtpPacket::new(96, 11, 3000, 0x1234).with_payload(vec![0x65, 0x01]);
        sender.send_to(&packet.to_bytes(), ingest).unwrap();

        let received = track
            .reader
            .read_rtp(Duration::from_secs(2))
            .unwrap()
            .unwrap();
        assert_eq!(received, packet);

        track.feedback.request_keyframe(0x1234).unwrap();
        let mut buf = [0u8; 64];
        let (len, _) = sender.recv_from(&mut buf).unwrap();
        assert_eq!(len, 12);
        assert_eq!(buf[1], rtcp::PT_PSFB);
        assert_eq!(u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]), 0x1234);
    }

    #[test]
    fn rtcp_on_ingest_is_skipped() {
        let connector = UdpConnector::new("127.0.0.1");
        let (_room, mut track) = join(&connector);
        let ingest = connector.ingest_addr(IDENTITY).unwrap();

        let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
        sender
            .send_to(&rtcp::picture_loss_indication(1, 2), ingest)
            .unwrap();
        assert!(
            track
                .reader
                .read_rtp(Duration::from_secs(1))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn disconnect_closes_reader() {
        let connector = UdpConnector::new("127.0.0.1");
        let (mut room, mut track) = join(&connector);
        room.connection.disconnect().unwrap();
        assert!(track.reader.read_rtp(Duration::from_millis(10)).is_err());
        assert!(connector.ingest_addr(IDENTITY).is_none());
    }
}
