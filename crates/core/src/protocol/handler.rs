use std::net::SocketAddr;
use std::sync::Arc;

use crate::client::{ClientSession, ClientState, Transport, TransportHeader};
use crate::media::TRACK_CONTROL;
use crate::protocol::request::RtspRequest;
use crate::protocol::response::RtspResponse;
use crate::protocol::sdp::{self, SdpSession};
use crate::server::ServerContext;
use crate::sink::MediaSink;
use crate::stream::Stream;

const PUBLIC_METHODS: &str = "OPTIONS, DESCRIBE, SETUP, PLAY, PAUSE, TEARDOWN, GET_PARAMETER";

/// Path of an RTSP URI with scheme, authority, query, and surrounding
/// slashes removed, so `rtsp://gw:8554/demo/cam1/?x=1` becomes `demo/cam1`.
pub fn uri_path(uri: &str) -> &str {
    let path = match uri
        .strip_prefix("rtsp://")
        .or_else(|| uri.strip_prefix("rtsps://"))
    {
        Some(rest) => rest.find('/').map_or("", |i| &rest[i..]),
        None => uri,
    };
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.trim_matches('/')
}

/// Handles RTSP requests for one TCP connection.
///
/// Streams are looked up in the registry on every request; a stream that
/// exists but has no open sink (still joining, or stopped) is reported as
/// not found. Sessions created on this connection are remembered so they
/// can be released when it drops.
pub struct MethodHandler {
    context: ServerContext,
    client_addr: SocketAddr,
    session_ids: Vec<String>,
}

impl MethodHandler {
    pub fn new(context: ServerContext, client_addr: SocketAddr) -> Self {
        MethodHandler {
            context,
            client_addr,
            session_ids: Vec::new(),
        }
    }

    pub fn session_ids(&self) -> &[String] {
        &self.session_ids
    }

    pub fn handle(&mut self, request: &RtspRequest) -> RtspResponse {
        let cseq = request.cseq().unwrap_or("0");

        match request.method.as_str() {
            "OPTIONS" => self.handle_options(cseq),
            "DESCRIBE" => self.handle_describe(cseq, &request.uri),
            "SETUP" => self.handle_setup(cseq, request),
            "PLAY" => self.handle_play(cseq, request),
            "PAUSE" => self.handle_pause(cseq, request),
            "TEARDOWN" => self.handle_teardown(cseq, request),
            "GET_PARAMETER" => self.handle_get_parameter(cseq, request),
            _ => {
                tracing::warn!(method = %request.method, %cseq, "unsupported RTSP method");
                RtspResponse::not_implemented()
                    .add_header("CSeq", cseq)
                    .add_header("Public", PUBLIC_METHODS)
            }
        }
    }

    /// Detach and forget every session created on this connection.
    pub fn release_sessions(&mut self) -> usize {
        let ids = std::mem::take(&mut self.session_ids);
        let removed = self.context.clients.remove_sessions(&ids);
        for session in &removed {
            self.detach(session);
        }
        removed.len()
    }

    /// Resolve a request URI to a stream with an open sink. The exact path
    /// is tried first, then the path without its track control suffix.
    fn resolve(&self, uri: &str) -> Option<(Arc<Stream>, Arc<MediaSink>)> {
        let path = uri_path(uri);
        let registry = &self.context.registry;
        let stream = registry.get(path).or_else(|| {
            path.strip_suffix(TRACK_CONTROL)
                .and_then(|p| p.strip_suffix('/'))
                .and_then(|sid| registry.get(sid))
        })?;
        let sink = stream.media_sink()?;
        Some((stream, sink))
    }

    fn detach(&self, session: &ClientSession) {
        if let Some(sink) = self
            .context
            .registry
            .get(&session.sid)
            .and_then(|stream| stream.media_sink())
        {
            sink.detach(&session.id);
        }
    }

    fn handle_options(&self, cseq: &str) -> RtspResponse {
        tracing::debug!(%cseq, "OPTIONS");
        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Public", PUBLIC_METHODS)
    }

    /// Host for SDP: configured public host, else the URI's host, else the
    /// client's own address.
    fn advertised_host(&self, uri: &str) -> String {
        if let Some(host) = &self.context.config.public_host {
            return host.clone();
        }

        if let Some(after_scheme) = uri
            .strip_prefix("rtsp://")
            .or_else(|| uri.strip_prefix("rtsps://"))
        {
            let host = after_scheme
                .split('/')
                .next()
                .and_then(|host_port| host_port.split(':').next())
                .unwrap_or("")
                .trim();
            if !host.is_empty() {
                return host.to_string();
            }
        }
        self.client_addr.ip().to_string()
    }

    fn handle_describe(&self, cseq: &str, uri: &str) -> RtspResponse {
        tracing::debug!(%cseq, uri, "DESCRIBE");

        let Some((stream, sink)) = self.resolve(uri) else {
            tracing::warn!(uri, "DESCRIBE for unknown stream");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };

        let host = self.advertised_host(uri);
        let config = &self.context.config;
        let body = sdp::generate_sdp(
            &SdpSession {
                ip: &host,
                session_id: &config.sdp_session_id,
                session_version: &config.sdp_session_version,
                username: &config.sdp_username,
                session_name: config.sdp_session_name.as_deref().unwrap_or(stream.sid()),
            },
            sink.description(),
        );

        // Trailing slash so "track1" resolves under the sid, not beside it.
        let content_base = format!("{}/", uri.trim_end_matches('/'));

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Content-Type", "application/sdp")
            .add_header("Content-Base", &content_base)
            .with_body(body)
    }

    fn handle_setup(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some((stream, sink)) = self.resolve(&request.uri) else {
            tracing::warn!(uri = %request.uri, "SETUP for unknown stream");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };

        let Some(transport_header) = request.get_header("Transport") else {
            tracing::warn!(%cseq, "SETUP missing Transport header");
            return RtspResponse::bad_request().add_header("CSeq", cseq);
        };

        let Some(requested) = TransportHeader::parse(transport_header) else {
            tracing::warn!(%cseq, transport_header, "SETUP with unsupported transport");
            return RtspResponse::unsupported_transport().add_header("CSeq", cseq);
        };

        if requested.interleaved {
            tracing::warn!(%cseq, transport = %transport_header, "client requested interleaved transport");
            return RtspResponse::unsupported_transport()
                .add_header("CSeq", cseq)
                .add_header(
                    "Unsupported",
                    "RTP/AVP/TCP (interleaved) not supported; use RTP/AVP over UDP, e.g. ffplay -rtsp_transport udp <url>",
                );
        }

        let transport = if requested.multicast {
            self.context.multicast.transport_for(stream.sid())
        } else {
            let udp = &self.context.udp;
            match Transport::unicast(
                self.client_addr.ip(),
                &requested,
                (udp.rtp_port(), udp.rtcp_port()),
            ) {
                Some(transport) => transport,
                None => {
                    tracing::warn!(%cseq, transport_header, "unicast SETUP without client_port");
                    return RtspResponse::bad_request().add_header("CSeq", cseq);
                }
            }
        };

        let session = match request.session_id() {
            Some(id) => match self.context.clients.get_session(id) {
                Some(session) if session.sid == stream.sid() => session,
                Some(session) => {
                    tracing::warn!(session_id = %session.id, bound = %session.sid, requested = %stream.sid(), "SETUP across streams");
                    return RtspResponse::new(459, "Aggregate Operation Not Allowed")
                        .add_header("CSeq", cseq);
                }
                None => {
                    return RtspResponse::session_not_found().add_header("CSeq", cseq);
                }
            },
            None => {
                let session = self.context.clients.create_session(stream.sid());
                self.session_ids.push(session.id.clone());
                session
            }
        };

        session.set_transport(transport.clone());
        if session.is_playing()
            && let Err(e) = sink.attach(
                &session.id,
                Arc::new(self.context.udp.writer(transport.rtp_destination())),
            )
        {
            tracing::warn!(session_id = %session.id, error = %e, "re-SETUP while stream closing");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        }

        tracing::info!(
            session_id = %session.id,
            sid = %stream.sid(),
            destination = %transport.rtp_destination(),
            multicast = transport.is_multicast(),
            "session set up"
        );

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Transport", &transport.header_value())
            .add_header("Session", &session.session_header_value())
    }

    fn handle_play(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some((stream, sink)) = self.resolve(&request.uri) else {
            tracing::warn!(uri = %request.uri, "PLAY for unknown stream");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        };

        let Some(session_id) = request.session_id() else {
            tracing::warn!(%cseq, "PLAY missing Session header");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };
        let Some(session) = self.context.clients.get_session(session_id) else {
            tracing::warn!(session_id, "PLAY for unknown session");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };
        if stream.sid() != session.sid {
            return RtspResponse::new(459, "Aggregate Operation Not Allowed")
                .add_header("CSeq", cseq);
        }

        let Some(transport) = session.get_transport() else {
            return RtspResponse::method_not_valid().add_header("CSeq", cseq);
        };

        let writer = Arc::new(self.context.udp.writer(transport.rtp_destination()));
        if let Err(e) = sink.attach(&session.id, writer) {
            tracing::warn!(session_id, error = %e, "PLAY on closing stream");
            return RtspResponse::not_found().add_header("CSeq", cseq);
        }
        session.set_state(ClientState::Playing);
        tracing::info!(session_id, sid = %stream.sid(), keyframe_seen = sink.keyframe_seen(), "session playing");

        let mut response = RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.session_header_value())
            .add_header("Range", "npt=0.000-");

        if let Some(position) = sink.position() {
            let base = request.uri.trim_end_matches('/');
            let track_url = if base.ends_with(&format!("/{TRACK_CONTROL}")) {
                base.to_string()
            } else {
                format!("{base}/{TRACK_CONTROL}")
            };
            response = response.add_header(
                "RTP-Info",
                &format!(
                    "url={};seq={};rtptime={}",
                    track_url,
                    position.sequence_number.wrapping_add(1),
                    position.timestamp
                ),
            );
        }

        response
    }

    fn handle_pause(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session) = request
            .session_id()
            .and_then(|id| self.context.clients.get_session(id))
        else {
            tracing::warn!(%cseq, "PAUSE without a known session");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        self.detach(&session);
        session.set_state(ClientState::Paused);
        tracing::info!(session_id = %session.id, "session paused");

        RtspResponse::ok()
            .add_header("CSeq", cseq)
            .add_header("Session", &session.session_header_value())
    }

    fn handle_teardown(&mut self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        let Some(session) = request
            .session_id()
            .and_then(|id| self.context.clients.remove_session(id))
        else {
            tracing::warn!(%cseq, "TEARDOWN without a known session");
            return RtspResponse::session_not_found().add_header("CSeq", cseq);
        };

        self.detach(&session);
        self.session_ids.retain(|id| id != &session.id);
        tracing::info!(session_id = %session.id, "session terminated via TEARDOWN");
        RtspResponse::ok().add_header("CSeq", cseq)
    }

    /// Keepalive used by VLC and ffmpeg (RFC 2326 §10.8).
    fn handle_get_parameter(&self, cseq: &str, request: &RtspRequest) -> RtspResponse {
        tracing::trace!(%cseq, "GET_PARAMETER keepalive");

        let mut response = RtspResponse::ok().add_header("CSeq", cseq);
        if let Some(session) = request
            .session_id()
            .and_then(|id| self.context.clients.get_session(id))
        {
            response = response.add_header("Session", &session.session_header_value());
        }
        response
    }
}
