use std::io::ErrorKind;
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::error::Result;
use crate::sink::PacketWriter;

/// The server's RTP and RTCP sockets.
///
/// Every viewer of every stream is served from the one RTP socket, so the
/// `server_port` advertised in SETUP is always the same pair. Port 0 binds
/// an ephemeral port; [`rtp_port`](Self::rtp_port) reports the real one.
///
/// This layer only knows addresses. Sessions and sinks resolve to a
/// [`UdpPacketWriter`] before anything is sent.
pub struct UdpTransport {
    rtp: Arc<UdpSocket>,
    rtcp: Arc<UdpSocket>,
}

impl UdpTransport {
    pub fn bind(host: &str, rtp_port: u16, rtcp_port: u16, multicast_ttl: u32) -> Result<Self> {
        let rtp = UdpSocket::bind((host, rtp_port))?;
        if let Err(e) = rtp.set_multicast_ttl_v4(multicast_ttl) {
            tracing::debug!(error = %e, "multicast TTL not applied");
        }
        let rtcp = UdpSocket::bind((host, rtcp_port))?;
        tracing::debug!(
            rtp = %rtp.local_addr()?,
            rtcp = %rtcp.local_addr()?,
            "UDP media sockets bound"
        );
        Ok(Self {
            rtp: Arc::new(rtp),
            rtcp: Arc::new(rtcp),
        })
    }

    pub fn rtp_port(&self) -> u16 {
        self.rtp.local_addr().map(|a| a.port()).unwrap_or_default()
    }

    pub fn rtcp_port(&self) -> u16 {
        self.rtcp.local_addr().map(|a| a.port()).unwrap_or_default()
    }

    pub fn send_to(&self, payload: &[u8], addr: SocketAddr) -> Result<usize> {
        Ok(self.rtp.send_to(payload, addr)?)
    }

    /// A writer delivering RTP to `destination` from the shared socket.
    pub fn writer(&self, destination: SocketAddr) -> UdpPacketWriter {
        UdpPacketWriter {
            socket: self.rtp.clone(),
            destination,
        }
    }

    /// Read and discard viewer RTCP (receiver reports) until `running` clears.
    pub fn spawn_rtcp_drain(&self, running: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let socket = self.rtcp.clone();
        socket.set_read_timeout(Some(Duration::from_millis(100)))?;
        let handle = thread::Builder::new()
            .name("rtcp-drain".to_string())
            .spawn(move || {
                let mut buf = [0u8; 1500];
                while running.load(Ordering::SeqCst) {
                    match socket.recv_from(&mut buf) {
                        Ok((len, from)) => tracing::trace!(%from, len, "viewer RTCP"),
                        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
                        Err(e) => {
                            tracing::debug!(error = %e, "RTCP socket error");
                            thread::sleep(Duration::from_millis(100));
                        }
                    }
                }
                tracing::debug!("RTCP drain exited");
            })?;
        Ok(handle)
    }
}

/// Sends to one destination through the shared RTP socket.
#[derive(Debug, Clone)]
pub struct UdpPacketWriter {
    socket: Arc<UdpSocket>,
    destination: SocketAddr,
}

impl PacketWriter for UdpPacketWriter {
    fn write_packet(&self, packet: &[u8]) -> Result<()> {
        self.socket.send_to(packet, self.destination)?;
        Ok(())
    }

    fn destination(&self) -> SocketAddr {
        self.destination
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_ports_are_reported() {
        let transport = UdpTransport::bind("127.0.0.1", 0, 0, 16).unwrap();
        assert_ne!(transport.rtp_port(), 0);
        assert_ne!(transport.rtcp_port(), 0);
        assert_ne!(transport.rtp_port(), transport.rtcp_port());
    }

    #[test]
    fn writer_delivers_to_destination() {
        let transport = UdpTransport::bind("127.0.0.1", 0, 0, 16).unwrap();
        let viewer = UdpSocket::bind("127.0.0.1:0").unwrap();
        viewer
            .set_read_timeout(Some(Duration::from_secs(2)))
            .unwrap();

        let writer = transport.writer(viewer.local_addr().unwrap());
        writer.write_packet(b"\x80\x60rtp").unwrap();

        let mut buf = [0u8; 16];
        let (len, from) = viewer.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"\x80\x60rtp");
        assert_eq!(from.port(), transport.rtp_port());
    }
}
