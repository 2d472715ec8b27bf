//! Per-stream packet reconstruction.
//!
//! Upstream RTP arrives out of order, with gaps, at whatever pace the
//! network delivers it. The relay turns that into an ordered packet
//! sequence for the [`MediaSink`]:
//!
//! ```text
//!  TrackReader ──► JitterBuffer ──► MediaSink ──► viewers
//!                      │
//!                      └─ forced gap ──► KeyframeRequester (PLI)
//! ```
//!
//! ## Reordering
//!
//! [`JitterBuffer`] keys packets by an extended (64-bit, unwrapped)
//! sequence number. Every push releases the contiguous run starting at the
//! next expected sequence. When more than the watermark of packets are
//! held back by a gap, the gap is skipped: the missing packets are counted
//! as lost and buffered packets are released anyway. Bounded latency wins
//! over waiting for one packet that may never come.
//!
//! ## Loss recovery
//!
//! Each forced gap corrupts the decoder's reference chain, so the relay
//! asks the sender for a keyframe exactly once per forced gap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::EgressError;
use crate::media::rtp::RtpPacket;
use crate::sink::MediaSink;
use crate::upstream::{KeyframeRequester, RemoteTrack, TrackReader};

/// Maximum packets held back by a gap before it is skipped (~1s of H.264).
pub const MAX_LATE_PACKETS: usize = 500;

/// Packets further behind the expected sequence than this are not late
/// reordering but a possible sender restart (RFC 3550 A.1 `MAX_MISORDER`).
pub const MAX_MISORDER: u64 = 100;

/// How long a single upstream read may block before cancellation is re-checked.
pub const READ_POLL: Duration = Duration::from_millis(100);

/// Counters kept by a [`JitterBuffer`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JitterStats {
    pub received: u64,
    pub released: u64,
    /// Packets that arrived after their slot was already released or skipped.
    pub late: u64,
    pub duplicates: u64,
    /// Sequence numbers skipped by forced gaps.
    pub lost: u64,
    pub forced_gaps: u64,
}

/// Output of one [`JitterBuffer::push`].
#[derive(Debug, Default)]
pub struct Released {
    /// Packets now in order, ready to forward.
    pub packets: Vec<RtpPacket>,
    /// Number of gaps skipped while producing `packets`.
    pub forced_gaps: usize,
}

/// Bounded reorder buffer for one RTP source.
#[derive(Debug)]
pub struct JitterBuffer {
    watermark: usize,
    packets: BTreeMap<u64, RtpPacket>,
    /// Extended sequence number expected next.
    next: Option<u64>,
    /// Highest extended sequence number seen, used to unwrap 16-bit values.
    highest: Option<u64>,
    ssrc: Option<u32>,
    /// A packet far behind `next`, kept until its successor confirms a restart.
    restart: Option<RtpPacket>,
    stats: JitterStats,
}

impl JitterBuffer {
    pub fn new(watermark: usize) -> Self {
        Self {
            watermark: watermark.max(1),
            packets: BTreeMap::new(),
            next: None,
            highest: None,
            ssrc: None,
            restart: None,
            stats: JitterStats::default(),
        }
    }

    pub fn stats(&self) -> JitterStats {
        self.stats
    }

    /// Number of packets currently held back.
    pub fn pending(&self) -> usize {
        self.packets.len()
    }

    /// Map a 16-bit sequence number onto the 64-bit extended space, taking
    /// the shortest distance from the highest value seen so far.
    fn extend(&mut self, seq: u16) -> u64 {
        let ext = match self.highest {
            // Start well above zero so early backwards steps cannot underflow.
            None => (1u64 << 32) | seq as u64,
            Some(highest) => {
                let delta = seq.wrapping_sub(highest as u16) as i16;
                highest.wrapping_add_signed(delta as i64)
            }
        };
        if self.highest.is_none_or(|h| ext > h) {
            self.highest = Some(ext);
        }
        ext
    }

    /// Forget all ordering state. Used when the sender restarts, with a new
    /// SSRC or with a sequence jump far into the past.
    fn reset(&mut self) {
        self.stats.lost += self.packets.len() as u64;
        self.packets.clear();
        self.next = None;
        self.highest = None;
        self.restart = None;
    }

    fn release_contiguous(&mut self, out: &mut Released) {
        while let Some(next) = self.next {
            let Some(packet) = self.packets.remove(&next) else {
                break;
            };
            out.packets.push(packet);
            self.next = Some(next + 1);
            self.stats.released += 1;
        }
    }

    /// Insert a packet and release everything that is now in order.
    pub fn push(&mut self, packet: RtpPacket) -> Released {
        let mut out = Released::default();
        self.stats.received += 1;

        if self.ssrc.is_some_and(|ssrc| ssrc != packet.ssrc) {
            tracing::debug!(
                old = ?self.ssrc,
                new = packet.ssrc,
                dropped = self.packets.len(),
                "SSRC changed, resetting jitter buffer"
            );
            self.reset();
        }
        self.ssrc = Some(packet.ssrc);

        self.insert(packet, &mut out);
        out
    }

    fn insert(&mut self, packet: RtpPacket, out: &mut Released) {
        let ext = self.extend(packet.sequence_number);
        match self.next {
            Some(next) if next.saturating_sub(ext) > MAX_MISORDER => {
                // Two consecutive packets this far back mean the sender
                // restarted its sequence; a lone one is a stray.
                match self.restart.take() {
                    Some(candidate)
                        if candidate.sequence_number.wrapping_add(1) == packet.sequence_number =>
                    {
                        tracing::debug!(
                            seq = candidate.sequence_number,
                            dropped = self.packets.len(),
                            "sequence restarted, resetting jitter buffer"
                        );
                        self.stats.late -= 1;
                        self.reset();
                        self.insert(candidate, out);
                        self.insert(packet, out);
                    }
                    _ => {
                        self.stats.late += 1;
                        tracing::trace!(seq = packet.sequence_number, "stray packet held");
                        self.restart = Some(packet);
                    }
                }
                return;
            }
            Some(next) if ext < next => {
                self.stats.late += 1;
                tracing::trace!(seq = packet.sequence_number, "late packet dropped");
                return;
            }
            Some(_) => {}
            None => self.next = Some(ext),
        }
        self.restart = None;

        if self.packets.contains_key(&ext) {
            self.stats.duplicates += 1;
            return;
        }
        self.packets.insert(ext, packet);
        self.release_contiguous(out);

        while self.packets.len() > self.watermark {
            let Some(&first) = self.packets.keys().next() else {
                break;
            };
            let skipped = first - self.next.unwrap_or(first);
            self.stats.lost += skipped;
            self.stats.forced_gaps += 1;
            out.forced_gaps += 1;
            tracing::debug!(
                skipped,
                resume_seq = first as u16,
                pending = self.packets.len(),
                "forcing past sequence gap"
            );
            self.next = Some(first);
            self.release_contiguous(out);
        }
    }
}

impl Default for JitterBuffer {
    fn default() -> Self {
        Self::new(MAX_LATE_PACKETS)
    }
}

/// Why a relay loop ended.
#[derive(Debug)]
pub enum RelayExit {
    /// The owning stream was stopped.
    Cancelled,
    /// The upstream track closed or failed.
    Upstream(EgressError),
    /// The sink was closed underneath the relay.
    SinkClosed,
}

/// Reads one upstream track and forwards ordered packets into a sink.
pub struct JitterRelay {
    sid: String,
    reader: Box<dyn TrackReader>,
    feedback: Arc<dyn KeyframeRequester>,
    ssrc: u32,
    buffer: JitterBuffer,
    sink: Arc<MediaSink>,
    cancelled: Arc<AtomicBool>,
}

impl JitterRelay {
    pub fn new(
        sid: &str,
        track: RemoteTrack,
        sink: Arc<MediaSink>,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self::with_watermark(sid, track, sink, cancelled, MAX_LATE_PACKETS)
    }

    pub fn with_watermark(
        sid: &str,
        track: RemoteTrack,
        sink: Arc<MediaSink>,
        cancelled: Arc<AtomicBool>,
        watermark: usize,
    ) -> Self {
        Self {
            sid: sid.to_string(),
            reader: track.reader,
            feedback: track.feedback,
            ssrc: track.ssrc,
            buffer: JitterBuffer::new(watermark),
            sink,
            cancelled,
        }
    }

    /// Run until cancelled, the upstream read fails, or the sink closes.
    ///
    /// Read errors are not retried. Nothing is written to the sink once
    /// cancellation has been observed.
    pub fn run(mut self) -> RelayExit {
        tracing::info!(sid = %self.sid, "relay started");

        let exit = loop {
            if self.cancelled.load(Ordering::SeqCst) {
                break RelayExit::Cancelled;
            }

            let packet = match self.reader.read_rtp(READ_POLL) {
                Ok(Some(packet)) => packet,
                Ok(None) => continue,
                Err(e) => break RelayExit::Upstream(e),
            };

            self.ssrc = packet.ssrc;
            let released = self.buffer.push(packet);

            if self.cancelled.load(Ordering::SeqCst) {
                break RelayExit::Cancelled;
            }

            if let Err(e) = released
                .packets
                .into_iter()
                .try_for_each(|p| self.sink.forward(p))
            {
                tracing::debug!(sid = %self.sid, error = %e, "sink rejected packet");
                break RelayExit::SinkClosed;
            }

            for _ in 0..released.forced_gaps {
                match self.feedback.request_keyframe(self.ssrc) {
                    Ok(()) => tracing::debug!(sid = %self.sid, "keyframe requested after loss"),
                    Err(e) => {
                        tracing::warn!(sid = %self.sid, error = %e, "keyframe request failed")
                    }
                }
            }
        };

        let stats = self.buffer.stats();
        tracing::info!(
            sid = %self.sid,
            reason = ?exit,
            received = stats.received,
            released = stats.released,
            lost = stats.lost,
            late = stats.late,
            forced_gaps = stats.forced_gaps,
            "relay finished"
        );
        exit
    }
}
