//! RTCP feedback messages sent back to the upstream sender.
//!
//! Only the Picture Loss Indication is needed: it asks the sender to emit a
//! fresh keyframe after the relay gave up waiting for a lost packet.

/// RTCP packet type for payload-specific feedback (RFC 4585 §6.1).
pub const PT_PSFB: u8 = 206;

/// Feedback message type for PLI (RFC 4585 §6.3.1).
pub const FMT_PLI: u8 = 1;

/// Build a Picture Loss Indication (RFC 4585 §6.3.1).
///
/// ```text
///  0                   1                   2                   3
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P| FMT=1   |    PT=206     |          length=2             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  SSRC of packet sender                        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                  SSRC of media source                         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
pub fn picture_loss_indication(sender_ssrc: u32, media_ssrc: u32) -> [u8; 12] {
    let mut buf = [0u8; 12];
    buf[0] = (2 << 6) | FMT_PLI;
    buf[1] = PT_PSFB;
    // Length in 32-bit words minus one.
    buf[2..4].copy_from_slice(&2u16.to_be_bytes());
    buf[4..8].copy_from_slice(&sender_ssrc.to_be_bytes());
    buf[8..12].copy_from_slice(&media_ssrc.to_be_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pli_layout() {
        let pli = picture_loss_indication(0x11111111, 0x22222222);
        assert_eq!(pli[0], 0x81);
        assert_eq!(pli[1], 206);
        assert_eq!(u16::from_be_bytes([pli[2], pli[3]]), 2);
        assert_eq!(u32::from_be_bytes([pli[4], pli[5], pli[6], pli[7]]), 0x11111111);
        assert_eq!(u32::from_be_bytes([pli[8], pli[9], pli[10], pli[11]]), 0x22222222);
    }
}
