use std::net::{SocketAddr, TcpListener};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::client::ClientManager;
use crate::error::{EgressError, Result};
use crate::registry::StreamRegistry;
use crate::transport::tcp;
use crate::transport::{MulticastAllocator, UdpTransport};

/// RTSP server configuration.
///
/// Ports set to 0 bind ephemerally; the bound port is what SETUP advertises.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// RTSP listen address, e.g. `0.0.0.0:8554`. Its host part is also
    /// where the RTP/RTCP sockets bind.
    pub rtsp_addr: String,
    pub rtp_port: u16,
    pub rtcp_port: u16,
    /// CIDR range multicast groups are drawn from.
    pub multicast_ip_range: String,
    pub multicast_rtp_port: u16,
    pub multicast_rtcp_port: u16,
    pub multicast_ttl: u32,
    /// Host advertised in SDP `o=` and `c=` lines. When `None`, taken from
    /// the request URI, falling back to the client's address.
    pub public_host: Option<String>,
    pub sdp_username: String,
    pub sdp_session_id: String,
    pub sdp_session_version: String,
    /// SDP `s=` line. Defaults to the stream's sid.
    pub sdp_session_name: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            rtsp_addr: "0.0.0.0:8554".to_string(),
            rtp_port: 8000,
            rtcp_port: 8001,
            multicast_ip_range: "224.1.0.0/16".to_string(),
            multicast_rtp_port: 8002,
            multicast_rtcp_port: 8003,
            multicast_ttl: 16,
            public_host: None,
            sdp_username: "-".to_string(),
            sdp_session_id: "0".to_string(),
            sdp_session_version: "0".to_string(),
            sdp_session_name: None,
        }
    }
}

impl ServerConfig {
    /// Host part of [`rtsp_addr`](Self::rtsp_addr).
    pub fn bind_host(&self) -> &str {
        self.rtsp_addr
            .rsplit_once(':')
            .map(|(host, _)| host.trim_start_matches('[').trim_end_matches(']'))
            .filter(|host| !host.is_empty())
            .unwrap_or("0.0.0.0")
    }
}

/// Everything a connection handler needs, shared across connections.
#[derive(Clone)]
pub struct ServerContext {
    pub registry: StreamRegistry,
    pub clients: ClientManager,
    pub udp: Arc<UdpTransport>,
    pub multicast: Arc<MulticastAllocator>,
    pub config: Arc<ServerConfig>,
}

impl ServerContext {
    /// Validate `config` and bind the media sockets.
    pub fn new(registry: StreamRegistry, config: ServerConfig) -> Result<Self> {
        let multicast = MulticastAllocator::new(
            &config.multicast_ip_range,
            config.multicast_rtp_port,
            config.multicast_rtcp_port,
            config.multicast_ttl,
        )?;
        let udp = UdpTransport::bind(
            config.bind_host(),
            config.rtp_port,
            config.rtcp_port,
            config.multicast_ttl,
        )?;
        Ok(Self {
            registry,
            clients: ClientManager::new(),
            udp: Arc::new(udp),
            multicast: Arc::new(multicast),
            config: Arc::new(config),
        })
    }
}

/// RTSP front end over a [`StreamRegistry`].
///
/// Streams are added and removed through the registry (normally by the
/// control plane); the server only resolves request paths against it.
pub struct Server {
    registry: StreamRegistry,
    config: ServerConfig,
    running: Arc<AtomicBool>,
    context: Option<ServerContext>,
    local_addr: Option<SocketAddr>,
    threads: Vec<JoinHandle<()>>,
}

impl Server {
    pub fn new(registry: StreamRegistry) -> Self {
        Self::with_config(registry, ServerConfig::default())
    }

    pub fn with_config(registry: StreamRegistry, config: ServerConfig) -> Self {
        Self {
            registry,
            config,
            running: Arc::new(AtomicBool::new(false)),
            context: None,
            local_addr: None,
            threads: Vec::new(),
        }
    }

    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(EgressError::AlreadyRunning);
        }

        let context = ServerContext::new(self.registry.clone(), self.config.clone())?;

        let listener = TcpListener::bind(&self.config.rtsp_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;

        self.running.store(true, Ordering::SeqCst);

        self.threads
            .push(context.udp.spawn_rtcp_drain(self.running.clone())?);

        let running = self.running.clone();
        let accept_context = context.clone();
        let accept = thread::Builder::new()
            .name("rtsp-accept".to_string())
            .spawn(move || tcp::accept_loop(listener, accept_context, running));
        match accept {
            Ok(handle) => self.threads.push(handle),
            Err(e) => {
                self.stop();
                return Err(e.into());
            }
        }

        tracing::info!(
            addr = %local_addr,
            rtp_port = context.udp.rtp_port(),
            rtcp_port = context.udp.rtcp_port(),
            multicast = %self.config.multicast_ip_range,
            "RTSP server listening"
        );

        self.local_addr = Some(local_addr);
        self.context = Some(context);
        Ok(())
    }

    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        tracing::info!("server stopping");
        for handle in self.threads.drain(..) {
            let _ = handle.join();
        }
        self.context = None;
        self.local_addr = None;
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Address the RTSP listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.local_addr.ok_or(EgressError::NotStarted)
    }

    /// `(rtp, rtcp)` ports viewers receive unicast media from.
    pub fn media_ports(&self) -> Result<(u16, u16)> {
        let context = self.context.as_ref().ok_or(EgressError::NotStarted)?;
        Ok((context.udp.rtp_port(), context.udp.rtcp_port()))
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Viewers currently in PLAY.
    pub fn get_viewers(&self) -> Vec<Viewer> {
        let Some(context) = &self.context else {
            return Vec::new();
        };
        context
            .clients
            .get_playing_sessions()
            .iter()
            .filter_map(|session| {
                session.get_transport().map(|transport| Viewer {
                    session_id: session.id.clone(),
                    sid: session.sid.clone(),
                    destination: transport.rtp_destination(),
                    multicast: transport.is_multicast(),
                })
            })
            .collect()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.stop();
    }
}

/// A viewer in PLAY state.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub session_id: String,
    pub sid: String,
    /// Where its RTP goes: the client, or the stream's multicast group.
    pub destination: SocketAddr,
    pub multicast: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig {
            rtsp_addr: "127.0.0.1:0".to_string(),
            rtp_port: 0,
            rtcp_port: 0,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn bind_host_from_rtsp_addr() {
        assert_eq!(ServerConfig::default().bind_host(), "0.0.0.0");
        let config = ServerConfig {
            rtsp_addr: "[::1]:8554".to_string(),
            ..ServerConfig::default()
        };
        assert_eq!(config.bind_host(), "::1");
    }

    #[test]
    fn start_reports_bound_ports_and_stops() {
        let mut server = Server::with_config(StreamRegistry::new(), local_config());
        assert!(matches!(server.local_addr(), Err(EgressError::NotStarted)));

        server.start().unwrap();
        assert!(server.is_running());
        assert_ne!(server.local_addr().unwrap().port(), 0);
        let (rtp, rtcp) = server.media_ports().unwrap();
        assert!(rtp != 0 && rtcp != 0);
        assert!(matches!(server.start(), Err(EgressError::AlreadyRunning)));

        server.stop();
        assert!(!server.is_running());
        assert!(server.get_viewers().is_empty());
    }

    #[test]
    fn bad_multicast_range_fails_start() {
        let config = ServerConfig {
            multicast_ip_range: "192.168.0.0/16".to_string(),
            ..local_config()
        };
        let mut server = Server::with_config(StreamRegistry::new(), config);
        assert!(matches!(server.start(), Err(EgressError::InvalidConfig(_))));
        assert!(!server.is_running());
    }
}
