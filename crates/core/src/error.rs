//! Error types for the egress gateway.

use std::fmt;

/// Errors that can occur anywhere in the egress stack.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Control plane**: [`Validation`](Self::Validation),
///   [`AlreadyExists`](Self::AlreadyExists), [`NotFound`](Self::NotFound).
/// - **Upstream**: [`UpstreamJoin`](Self::UpstreamJoin),
///   [`RelayTerminated`](Self::RelayTerminated).
/// - **Teardown**: [`Teardown`](Self::Teardown), [`SinkClosed`](Self::SinkClosed).
/// - **Protocol**: [`Parse`](Self::Parse), [`InvalidPacket`](Self::InvalidPacket).
/// - **Transport**: [`Io`](Self::Io).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning), [`InvalidConfig`](Self::InvalidConfig).
#[derive(Debug, thiserror::Error)]
pub enum EgressError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A required field was missing or malformed. Raised before any state changes.
    #[error("{0}")]
    Validation(String),

    /// A stream with this sid is already registered.
    #[error("stream with sid {0} already exists")]
    AlreadyExists(String),

    /// No live stream is registered under this sid.
    #[error("stream with sid {0} not found")]
    NotFound(String),

    /// The upstream room could not be joined.
    #[error("failed to join upstream room: {0}")]
    UpstreamJoin(String),

    /// The upstream packet source stopped producing packets.
    #[error("relay terminated: {0}")]
    RelayTerminated(String),

    /// Disconnect or sink close failed while stopping a stream.
    #[error("teardown incomplete: {0}")]
    Teardown(String),

    /// The media sink has been closed and accepts no more packets or readers.
    #[error("media sink closed for stream {0}")]
    SinkClosed(String),

    /// An RTP/RTCP packet could not be parsed.
    #[error("invalid packet: {0}")]
    InvalidPacket(&'static str),

    /// Failed to parse an RTSP request message (RFC 2326 §6).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// A configuration value could not be used.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidHeader => write!(f, "invalid header"),
        }
    }
}

/// Convenience alias for `Result<T, EgressError>`.
pub type Result<T> = std::result::Result<T, EgressError>;
