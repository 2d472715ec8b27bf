//! Media formats carried through the gateway.
//!
//! The gateway relays RTP without re-encoding. This module provides what
//! the relay and the RTSP layer need to do that:
//!
//! - [`rtp::RtpPacket`]: parse and serialize RTP packets (RFC 3550).
//! - [`rtcp`]: feedback messages sent upstream (PLI, RFC 4585).
//! - [`h264::H264Payload`]: keyframe detection in H.264 payloads (RFC 6184).
//! - [`MediaDescription`]: the fixed codec description advertised in SDP.
//!
//! ## Supported codecs
//!
//! | Codec | Module | RFC | Status |
//! |-------|--------|-----|--------|
//! | H.264 | [`h264`] | [RFC 6184](https://tools.ietf.org/html/rfc6184) | Implemented |

pub mod h264;
pub mod rtcp;
pub mod rtp;

/// Dynamic RTP payload type advertised for H.264 (RFC 3551 §6).
pub const H264_PAYLOAD_TYPE: u8 = 96;

/// Control URL of the single video track, relative to the stream URL.
pub const TRACK_CONTROL: &str = "track1";

/// Codec and format metadata for a sink's single video track.
///
/// Fixed when the sink is created and never mutated afterwards. Relayed
/// packets have their payload type rewritten to [`payload_type`](Self::payload_type)
/// so they match what DESCRIBE advertised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescription {
    /// Codec name for `a=rtpmap` (e.g. `"H264"`).
    pub codec: &'static str,
    pub payload_type: u8,
    /// RTP clock rate in Hz. Video uses 90 kHz per RFC 3551 §4.
    pub clock_rate: u32,
    /// H.264 packetization mode (RFC 6184 §6.2); 1 allows STAP-A and FU-A.
    pub packetization_mode: u8,
    /// Track control URL relative to the `Content-Base`.
    pub control: &'static str,
}

impl MediaDescription {
    /// The one profile this gateway serves: H.264, non-interleaved mode.
    pub fn h264() -> Self {
        Self {
            codec: "H264",
            payload_type: H264_PAYLOAD_TYPE,
            clock_rate: 90000,
            packetization_mode: 1,
            control: TRACK_CONTROL,
        }
    }

    /// SDP media-level attribute lines, per RFC 6184 §8.2.1.
    ///
    /// Order matters: `a=rtpmap` defines the payload type and must precede
    /// `a=fmtp` which references it.
    pub fn sdp_attributes(&self) -> Vec<String> {
        vec![
            format!(
                "a=rtpmap:{} {}/{}",
                self.payload_type, self.codec, self.clock_rate
            ),
            format!(
                "a=fmtp:{} packetization-mode={}",
                self.payload_type, self.packetization_mode
            ),
            format!("a=control:{}", self.control),
        ]
    }
}

impl Default for MediaDescription {
    fn default() -> Self {
        Self::h264()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn h264_attributes_in_order() {
        let attrs = MediaDescription::h264().sdp_attributes();
        assert_eq!(
            attrs,
            vec![
                "a=rtpmap:96 H264/90000".to_string(),
                "a=fmtp:96 packetization-mode=1".to_string(),
                "a=control:track1".to_string(),
            ]
        );
    }
}
