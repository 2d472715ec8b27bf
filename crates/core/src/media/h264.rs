/// H.264 RTP payload inspection (RFC 6184).
///
/// The relay never re-encodes: packets are forwarded with their payload
/// untouched. It only needs to know whether a payload starts a keyframe,
/// so the sink can report when a viewer could begin decoding.
///
/// An RTP payload carries one of three structures (RFC 6184 §5.2):
///
/// - **Single NAL Unit** (types 1–23): the payload is one NAL.
/// - **STAP-A** (type 24): aggregated NALs, each prefixed by a 16-bit size.
///
///   ```text
///   [STAP-A hdr][size:16][NAL][size:16][NAL]...
///   ```
///
/// - **FU-A** (type 28): a fragment of one NAL. The 2-byte prefix carries
///   the original NAL type and start/end bits:
///
///   ```text
///   FU indicator:  [F|NRI|Type=28]
///   FU header:     [S|E|R|NAL_Type]
///   ```
pub struct H264Payload;

/// Coded slice of an IDR picture.
pub const NAL_IDR: u8 = 5;
/// Sequence parameter set.
pub const NAL_SPS: u8 = 7;
/// Picture parameter set.
pub const NAL_PPS: u8 = 8;
/// Single-time aggregation packet.
pub const NAL_STAP_A: u8 = 24;
/// Fragmentation unit.
pub const NAL_FU_A: u8 = 28;

impl H264Payload {
    /// NAL unit types that begin in this payload.
    ///
    /// FU-A fragments only report their type on the start fragment; middle
    /// and end fragments report nothing because no NAL starts there.
    pub fn nal_types(payload: &[u8]) -> Vec<u8> {
        let Some(&first) = payload.first() else {
            return Vec::new();
        };

        match first & 0x1f {
            NAL_STAP_A => {
                let mut types = Vec::new();
                let mut offset = 1usize;
                while offset + 2 < payload.len() {
                    let size = u16::from_be_bytes([payload[offset], payload[offset + 1]]) as usize;
                    offset += 2;
                    if size == 0 || offset + size > payload.len() {
                        break;
                    }
                    types.push(payload[offset] & 0x1f);
                    offset += size;
                }
                types
            }
            NAL_FU_A => match payload.get(1) {
                Some(fu_header) if fu_header & 0x80 != 0 => vec![fu_header & 0x1f],
                _ => Vec::new(),
            },
            nal_type => vec![nal_type],
        }
    }

    /// Whether this payload begins an IDR picture or its parameter sets.
    pub fn is_keyframe(payload: &[u8]) -> bool {
        Self::nal_types(payload)
            .iter()
            .any(|&t| t == NAL_IDR || t == NAL_SPS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_nal_idr_is_keyframe() {
        assert!(H264Payload::is_keyframe(&[0x65, 0x88, 0x84]));
    }

    #[test]
    fn single_nal_non_idr_slice() {
        assert!(!H264Payload::is_keyframe(&[0x41, 0x9a, 0x00]));
        assert_eq!(H264Payload::nal_types(&[0x41, 0x9a]), vec![1]);
    }

    #[test]
    fn stap_a_with_sps_pps() {
        let payload = [
            0x78, // STAP-A, NRI=3
            0x00, 0x04, 0x67, 0x42, 0x00, 0x1e, // SPS
            0x00, 0x04, 0x68, 0xce, 0x38, 0x80, // PPS
        ];
        assert_eq!(H264Payload::nal_types(&payload), vec![NAL_SPS, NAL_PPS]);
        assert!(H264Payload::is_keyframe(&payload));
    }

    #[test]
    fn stap_a_truncated_stops_cleanly() {
        let payload = [0x78, 0x00, 0x10, 0x67];
        assert!(H264Payload::nal_types(&payload).is_empty());
    }

    #[test]
    fn fu_a_start_fragment_of_idr() {
        // FU indicator NRI=3 type=28, FU header S=1 type=5
        assert!(H264Payload::is_keyframe(&[0x7c, 0x85, 0xAA]));
    }

    #[test]
    fn fu_a_middle_fragment_reports_nothing() {
        assert!(H264Payload::nal_types(&[0x7c, 0x05, 0xAA]).is_empty());
        assert!(!H264Payload::is_keyframe(&[0x7c, 0x45, 0xAA]));
    }

    #[test]
    fn empty_payload() {
        assert!(H264Payload::nal_types(&[]).is_empty());
    }
}
