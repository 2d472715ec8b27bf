//! Network transport for RTSP signaling and RTP delivery.
//!
//! - [`tcp`]: RTSP request/response signaling, one thread per connection.
//! - [`udp`]: the shared RTP and RTCP sockets all viewers are served from.
//! - [`multicast`]: per-stream multicast group selection.
//!
//! Interleaved RTP over the RTSP connection (RFC 2326 §10.12) is not offered;
//! SETUP answers such requests with 461.

pub mod multicast;
pub mod tcp;
pub mod udp;

pub use multicast::MulticastAllocator;
pub use udp::{UdpPacketWriter, UdpTransport};
