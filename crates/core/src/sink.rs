//! Fan-out point between one relay and its RTSP viewers.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};

use crate::error::{EgressError, Result};
use crate::media::MediaDescription;
use crate::media::h264::H264Payload;
use crate::media::rtp::RtpPacket;

/// Delivers serialized RTP to one destination.
pub trait PacketWriter: Send + Sync {
    fn write_packet(&self, packet: &[u8]) -> Result<()>;

    /// Address packets end up at. Writers sharing a destination (viewers of
    /// the same multicast group) are written to once per packet.
    fn destination(&self) -> SocketAddr;
}

/// Sequence number and timestamp of the last forwarded packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkPosition {
    pub sequence_number: u16,
    pub timestamp: u32,
}

type Viewers = HashMap<String, Arc<dyn PacketWriter>>;

/// Per-stream media output read by the RTSP server.
///
/// Created once the upstream join succeeds, with a [`MediaDescription`]
/// that never changes. The relay is the only writer; RTSP sessions attach
/// and detach as viewers. Attaching swaps in a new viewer map, so
/// [`forward`](Self::forward) only ever holds the lock for a pointer copy.
pub struct MediaSink {
    sid: String,
    description: MediaDescription,
    closed: AtomicBool,
    viewers: RwLock<Arc<Viewers>>,
    forwarded: AtomicU64,
    keyframe_seen: AtomicBool,
    position: Mutex<Option<SinkPosition>>,
}

impl MediaSink {
    pub fn new(sid: &str, description: MediaDescription) -> Self {
        Self {
            sid: sid.to_string(),
            description,
            closed: AtomicBool::new(false),
            viewers: RwLock::new(Arc::new(HashMap::new())),
            forwarded: AtomicU64::new(0),
            keyframe_seen: AtomicBool::new(false),
            position: Mutex::new(None),
        }
    }

    pub fn sid(&self) -> &str {
        &self.sid
    }

    pub fn description(&self) -> &MediaDescription {
        &self.description
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Forward one ordered packet to every attached viewer.
    ///
    /// The payload type is rewritten to the advertised one; sequence number
    /// and timestamp pass through. A failing viewer does not affect others.
    pub fn forward(&self, mut packet: RtpPacket) -> Result<()> {
        if self.is_closed() {
            return Err(EgressError::SinkClosed(self.sid.clone()));
        }

        packet.payload_type = self.description.payload_type;
        if !self.keyframe_seen.load(Ordering::Relaxed) && H264Payload::is_keyframe(&packet.payload)
        {
            self.keyframe_seen.store(true, Ordering::Relaxed);
            tracing::debug!(sid = %self.sid, seq = packet.sequence_number, "first keyframe");
        }
        *self.position.lock() = Some(SinkPosition {
            sequence_number: packet.sequence_number,
            timestamp: packet.timestamp,
        });
        self.forwarded.fetch_add(1, Ordering::Relaxed);

        let viewers = self.viewers.read().clone();
        if viewers.is_empty() {
            return Ok(());
        }

        let bytes = packet.to_bytes();
        let mut sent: Vec<SocketAddr> = Vec::with_capacity(viewers.len());
        for (session_id, writer) in viewers.iter() {
            let destination = writer.destination();
            if sent.contains(&destination) {
                continue;
            }
            sent.push(destination);
            if let Err(e) = writer.write_packet(&bytes) {
                tracing::trace!(sid = %self.sid, session_id, %destination, error = %e, "viewer write failed");
            }
        }
        Ok(())
    }

    /// Start delivering packets to `writer` for RTSP session `session_id`.
    pub fn attach(&self, session_id: &str, writer: Arc<dyn PacketWriter>) -> Result<()> {
        if self.is_closed() {
            return Err(EgressError::SinkClosed(self.sid.clone()));
        }
        let destination = writer.destination();
        let mut viewers = self.viewers.write();
        let mut next = Viewers::clone(&viewers);
        next.insert(session_id.to_string(), writer);
        *viewers = Arc::new(next);
        tracing::info!(sid = %self.sid, session_id, %destination, "viewer attached");
        Ok(())
    }

    /// Stop delivering to `session_id`. Returns whether it was attached.
    pub fn detach(&self, session_id: &str) -> bool {
        let mut viewers = self.viewers.write();
        if !viewers.contains_key(session_id) {
            return false;
        }
        let mut next = Viewers::clone(&viewers);
        next.remove(session_id);
        *viewers = Arc::new(next);
        tracing::info!(sid = %self.sid, session_id, "viewer detached");
        true
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.read().len()
    }

    pub fn packets_forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Whether an IDR or SPS has passed through, i.e. viewers can decode.
    pub fn keyframe_seen(&self) -> bool {
        self.keyframe_seen.load(Ordering::Relaxed)
    }

    pub fn position(&self) -> Option<SinkPosition> {
        *self.position.lock()
    }

    /// Close the sink and drop all viewers. Fails if already closed.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(EgressError::SinkClosed(self.sid.clone()));
        }
        *self.viewers.write() = Arc::new(HashMap::new());
        tracing::debug!(sid = %self.sid, forwarded = self.packets_forwarded(), "media sink closed");
        Ok(())
    }
}

impl std::fmt::Debug for MediaSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaSink")
            .field("sid", &self.sid)
            .field("closed", &self.is_closed())
            .field("viewers", &self.viewer_count())
            .field("forwarded", &self.packets_forwarded())
            .finish()
    }
}
