use crate::error::{EgressError, Result};

/// Size of the RTP fixed header (RFC 3550 §5.1).
pub const FIXED_HEADER_LEN: usize = 12;

/// A parsed RTP packet (RFC 3550 §5.1).
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|X|  CC   |M|     PT      |       Sequence Number         |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                           Timestamp                           |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                             SSRC                              |
/// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// |                    CSRC list (CC x 32 bits)                   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |      defined by profile       |            length             |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                 header extension (if X = 1)                   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
///
/// Packets received from the upstream room are parsed into this struct so
/// the relay can order them by sequence number and inspect the payload.
/// Padding is stripped on parse and never re-emitted; the header extension
/// is preserved verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    /// Marker bit. For H.264, set on the last packet of an access unit (RFC 6184 §5.1).
    pub marker: bool,
    /// RTP payload type (7-bit, RFC 3551).
    pub payload_type: u8,
    /// 16-bit wrapping sequence number.
    pub sequence_number: u16,
    /// Media clock timestamp (90 kHz for video).
    pub timestamp: u32,
    /// Synchronization source identifier (RFC 3550 §8.1).
    pub ssrc: u32,
    pub csrc: Vec<u32>,
    /// Header extension as `(profile, data)`; `data` length is a multiple of 4.
    pub extension: Option<(u16, Vec<u8>)>,
    pub payload: Vec<u8>,
}

impl RtpPacket {
    /// Build a packet with no CSRCs and no header extension.
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            marker: false,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc: Vec::new(),
            extension: None,
            payload: Vec::new(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_marker(mut self, marker: bool) -> Self {
        self.marker = marker;
        self
    }

    /// Parse an RTP packet from wire bytes.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < FIXED_HEADER_LEN {
            return Err(EgressError::InvalidPacket("shorter than RTP fixed header"));
        }
        if buf[0] >> 6 != 2 {
            return Err(EgressError::InvalidPacket("unsupported RTP version"));
        }

        let padding = buf[0] & 0x20 != 0;
        let has_extension = buf[0] & 0x10 != 0;
        let csrc_count = (buf[0] & 0x0f) as usize;
        let marker = buf[1] & 0x80 != 0;
        let payload_type = buf[1] & 0x7f;
        let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let mut offset = FIXED_HEADER_LEN;
        if buf.len() < offset + csrc_count * 4 {
            return Err(EgressError::InvalidPacket("truncated CSRC list"));
        }
        let csrc = buf[offset..offset + csrc_count * 4]
            .chunks_exact(4)
            .map(|c| u32::from_be_bytes([c[0], c[1], c[2], c[3]]))
            .collect();
        offset += csrc_count * 4;

        let extension = if has_extension {
            if buf.len() < offset + 4 {
                return Err(EgressError::InvalidPacket("truncated extension header"));
            }
            let profile = u16::from_be_bytes([buf[offset], buf[offset + 1]]);
            let words = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]) as usize;
            offset += 4;
            if buf.len() < offset + words * 4 {
                return Err(EgressError::InvalidPacket("truncated extension data"));
            }
            let data = buf[offset..offset + words * 4].to_vec();
            offset += words * 4;
            Some((profile, data))
        } else {
            None
        };

        let mut end = buf.len();
        if padding {
            let pad = buf[end - 1] as usize;
            if pad == 0 || offset + pad > end {
                return Err(EgressError::InvalidPacket("invalid padding length"));
            }
            end -= pad;
        }

        Ok(Self {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
            csrc,
            extension,
            payload: buf[offset..end].to_vec(),
        })
    }

    /// Serialize to wire bytes. Version is always 2 and padding is never set.
    pub fn to_bytes(&self) -> Vec<u8> {
        let ext_len = self
            .extension
            .as_ref()
            .map_or(0, |(_, data)| 4 + data.len());
        let mut out =
            Vec::with_capacity(FIXED_HEADER_LEN + self.csrc.len() * 4 + ext_len + self.payload.len());

        let mut first_byte: u8 = 2 << 6;
        if self.extension.is_some() {
            first_byte |= 0x10;
        }
        first_byte |= (self.csrc.len() as u8) & 0x0f;

        out.push(first_byte);
        out.push(((self.marker as u8) << 7) | (self.payload_type & 0x7f));
        out.extend_from_slice(&self.sequence_number.to_be_bytes());
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out.extend_from_slice(&self.ssrc.to_be_bytes());
        for csrc in self.csrc.iter().take(15) {
            out.extend_from_slice(&csrc.to_be_bytes());
        }
        if let Some((profile, data)) = &self.extension {
            out.extend_from_slice(&profile.to_be_bytes());
            out.extend_from_slice(&((data.len() / 4) as u16).to_be_bytes());
            out.extend_from_slice(data);
        }
        out.extend_from_slice(&self.payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_packet() -> RtpPacket {
        RtpPacket::new(96, 1000, 90_000, 0xAABBCCDD).with_payload(vec![0x65, 0x88, 0x84])
    }

    #[test]
    fn version_is_2() {
        let buf = make_packet().to_bytes();
        assert_eq!(buf[0] >> 6, 2);
    }

    #[test]
    fn marker_bit() {
        let no_marker = make_packet().to_bytes();
        assert_eq!(no_marker[1] & 0x80, 0);

        let with_marker = make_packet().with_marker(true).to_bytes();
        assert_eq!(with_marker[1] & 0x80, 0x80);
    }

    #[test]
    fn header_fields_written() {
        let buf = make_packet().to_bytes();
        assert_eq!(buf[1] & 0x7f, 96);
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), 1000);
        assert_eq!(u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]), 90_000);
        assert_eq!(
            u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            0xAABBCCDD
        );
        assert_eq!(&buf[12..], &[0x65, 0x88, 0x84]);
    }

    #[test]
    fn parse_written_packet() {
        let packet = make_packet().with_marker(true);
        let parsed = RtpPacket::parse(&packet.to_bytes()).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn parse_keeps_extension_and_csrc() {
        let mut packet = make_packet();
        packet.csrc = vec![0x01020304];
        packet.extension = Some((0xBEDE, vec![0x10, 0xAA, 0x00, 0x00]));
        let parsed = RtpPacket::parse(&packet.to_bytes()).unwrap();
        assert_eq!(parsed.csrc, vec![0x01020304]);
        assert_eq!(parsed.extension, Some((0xBEDE, vec![0x10, 0xAA, 0x00, 0x00])));
        assert_eq!(parsed.payload, vec![0x65, 0x88, 0x84]);
    }

    #[test]
    fn parse_strips_padding() {
        let mut buf = make_packet().to_bytes();
        buf[0] |= 0x20;
        buf.extend_from_slice(&[0, 0, 3]);
        let parsed = RtpPacket::parse(&buf).unwrap();
        assert_eq!(parsed.payload, vec![0x65, 0x88, 0x84]);
    }

    #[test]
    fn parse_rejects_short_buffer() {
        assert!(RtpPacket::parse(&[0x80, 0x60, 0x00]).is_err());
    }

    #[test]
    fn parse_rejects_wrong_version() {
        let mut buf = make_packet().to_bytes();
        buf[0] = 0x40;
        assert!(RtpPacket::parse(&buf).is_err());
    }

    #[test]
    fn parse_rejects_truncated_csrc() {
        let mut buf = make_packet().to_bytes();
        buf[0] |= 0x0f;
        assert!(RtpPacket::parse(&buf).is_err());
    }
}
