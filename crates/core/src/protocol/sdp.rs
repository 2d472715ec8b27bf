//! SDP generation for DESCRIBE (RFC 4566).
//!
//! ```text
//! v=0
//! o=<user> <sess-id> <sess-ver> IN IP4 <addr>
//! s=<session-name>
//! c=IN IP4 <addr>
//! t=0 0
//! a=tool:rtsp-egress
//! a=sendonly
//! a=range:npt=0-
//! m=video 0 RTP/AVP 96
//! a=rtpmap:96 H264/90000
//! a=fmtp:96 packetization-mode=1
//! a=control:track1
//! ```
//!
//! Origin and session fields come from [`ServerConfig`](crate::ServerConfig);
//! the media section comes from the sink's [`MediaDescription`].

use crate::media::MediaDescription;

/// Session-level SDP fields.
#[derive(Debug, Clone)]
pub struct SdpSession<'a> {
    pub ip: &'a str,
    pub session_id: &'a str,
    pub session_version: &'a str,
    pub username: &'a str,
    pub session_name: &'a str,
}

/// Describe one live video track. The stream has no duration, so the range
/// is open-ended.
pub fn generate_sdp(session: &SdpSession<'_>, media: &MediaDescription) -> String {
    let mut sdp = vec![
        "v=0".to_string(),
        format!(
            "o={} {} {} IN IP4 {}",
            session.username, session.session_id, session.session_version, session.ip
        ),
        format!("s={}", session.session_name),
        format!("c=IN IP4 {}", session.ip),
        "t=0 0".to_string(),
        "a=tool:rtsp-egress".to_string(),
        "a=sendonly".to_string(),
        "a=range:npt=0-".to_string(),
        format!("m=video 0 RTP/AVP {}", media.payload_type),
    ];
    sdp.extend(media.sdp_attributes());

    tracing::trace!(sdp = %sdp.join("\\r\\n"), "generated SDP");

    format!("{}\r\n", sdp.join("\r\n"))
}
