//! RTSP egress gateway.
//!
//! Joins a conferencing room as a hidden participant, subscribes to one
//! H.264 video track, and serves it to ordinary RTSP players.
//!
//! ```text
//!  HTTP control plane ──► SessionControl ──► StreamRegistry ◄── RTSP Server
//!                                                 │                  │
//!                                              Stream               viewers
//!                                                 │                  ▲
//!  RoomConnector ──► RemoteTrack ──► JitterRelay ─┴──► MediaSink ────┘
//! ```
//!
//! - [`upstream`]: the room side, behind [`RoomConnector`](upstream::RoomConnector).
//! - [`relay`]: reorders packets and requests keyframes after forced loss.
//! - [`sink`]: fans ordered packets out to RTSP viewers.
//! - [`stream`], [`registry`], [`control`]: session lifecycle.
//! - [`protocol`], [`client`], [`transport`], [`server`]: the RTSP front end.
//! - [`api`]: the HTTP control plane and health endpoint.

pub mod api;
pub mod client;
pub mod control;
pub mod error;
pub mod media;
pub mod protocol;
pub mod registry;
pub mod relay;
pub mod server;
pub mod sink;
pub mod stream;
pub mod transport;
pub mod upstream;

pub use control::SessionControl;
pub use error::{EgressError, Result};
pub use registry::StreamRegistry;
pub use server::{Server, ServerConfig, Viewer};
pub use stream::{Session, Stream, StreamState};
