//! RTSP signaling (RFC 2326).
//!
//! Parses requests, routes methods against the stream registry, builds
//! responses, and generates SDP.
//!
//! ```text
//! DESCRIBE rtsp://gateway:8554/demo/cam1 RTSP/1.0\r\n
//! CSeq: 2\r\n
//! Accept: application/sdp\r\n
//! \r\n
//! ```
//!
//! A stream is addressed by its sid as the URI path. The single track is
//! `<sid>/track1`.
//!
//! | Method | RFC section | Effect |
//! |--------|-------------|--------|
//! | OPTIONS | §10.1 | Lists methods |
//! | DESCRIBE | §10.2 | SDP for the stream's sink |
//! | SETUP | §10.4 | Creates a viewer session (unicast UDP or multicast) |
//! | PLAY | §10.5 | Attaches the session to the sink |
//! | PAUSE | §10.6 | Detaches it |
//! | TEARDOWN | §10.7 | Detaches and destroys it |
//! | GET_PARAMETER | §10.8 | Keepalive |

pub mod handler;
pub mod request;
pub mod response;
pub mod sdp;

pub use handler::MethodHandler;
pub use request::RtspRequest;
pub use response::RtspResponse;
