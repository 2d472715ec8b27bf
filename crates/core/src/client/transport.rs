use std::net::{IpAddr, SocketAddr};

/// Where and how RTP for one RTSP session is delivered.
///
/// ```text
/// unicast:    RTP/AVP;unicast;client_port=5000-5001;server_port=8000-8001
/// multicast:  RTP/AVP;multicast;destination=224.1.3.7;port=8002-8003;ttl=16
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    Unicast {
        /// `client_ip:client_rtp_port`.
        rtp_destination: SocketAddr,
        client_rtcp_port: u16,
        server_rtp_port: u16,
        server_rtcp_port: u16,
    },
    Multicast {
        /// `group:rtp_port`.
        rtp_destination: SocketAddr,
        rtcp_port: u16,
        ttl: u32,
    },
}

impl Transport {
    /// Address RTP packets are sent to.
    pub fn rtp_destination(&self) -> SocketAddr {
        match self {
            Self::Unicast {
                rtp_destination, ..
            }
            | Self::Multicast {
                rtp_destination, ..
            } => *rtp_destination,
        }
    }

    pub fn is_multicast(&self) -> bool {
        matches!(self, Self::Multicast { .. })
    }

    /// Value of the `Transport` header in the SETUP response.
    pub fn header_value(&self) -> String {
        match self {
            Self::Unicast {
                rtp_destination,
                client_rtcp_port,
                server_rtp_port,
                server_rtcp_port,
            } => format!(
                "RTP/AVP;unicast;client_port={}-{};server_port={}-{}",
                rtp_destination.port(),
                client_rtcp_port,
                server_rtp_port,
                server_rtcp_port
            ),
            Self::Multicast {
                rtp_destination,
                rtcp_port,
                ttl,
            } => format!(
                "RTP/AVP;multicast;destination={};port={}-{};ttl={}",
                rtp_destination.ip(),
                rtp_destination.port(),
                rtcp_port,
                ttl
            ),
        }
    }

    /// Unicast delivery to `client_ip`; `None` without a `client_port`.
    pub fn unicast(
        client_ip: IpAddr,
        header: &TransportHeader,
        server_ports: (u16, u16),
    ) -> Option<Self> {
        let (rtp, rtcp) = header.client_ports?;
        Some(Self::Unicast {
            rtp_destination: SocketAddr::new(client_ip, rtp),
            client_rtcp_port: rtcp,
            server_rtp_port: server_ports.0,
            server_rtcp_port: server_ports.1,
        })
    }
}

/// The parts of a client's `Transport` header (RFC 2326 §12.39) the server acts on.
///
/// Only the first transport spec in a comma-separated list is considered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportHeader {
    pub multicast: bool,
    /// `RTP/AVP/TCP` or an `interleaved=` parameter was requested.
    pub interleaved: bool,
    /// `client_port=RTP-RTCP`; a single port implies RTCP on the next one.
    pub client_ports: Option<(u16, u16)>,
}

impl TransportHeader {
    /// ```
    /// use egress::client::transport::TransportHeader;
    ///
    /// let th = TransportHeader::parse("RTP/AVP;unicast;client_port=8000-8001").unwrap();
    /// assert_eq!(th.client_ports, Some((8000, 8001)));
    /// assert!(!th.multicast);
    ///
    /// assert!(TransportHeader::parse("RAW/RAW/UDP;unicast").is_none());
    /// ```
    pub fn parse(header: &str) -> Option<Self> {
        let spec = header.split(',').next()?.trim();
        let mut params = spec.split(';').map(str::trim);

        let profile = params.next()?;
        let interleaved_profile = match profile.to_ascii_uppercase().as_str() {
            "RTP/AVP" | "RTP/AVP/UDP" => false,
            "RTP/AVP/TCP" => true,
            _ => return None,
        };

        let mut parsed = TransportHeader {
            multicast: false,
            interleaved: interleaved_profile,
            client_ports: None,
        };

        for param in params {
            if param.eq_ignore_ascii_case("multicast") {
                parsed.multicast = true;
            } else if param.eq_ignore_ascii_case("unicast") {
                parsed.multicast = false;
            } else if param.starts_with("interleaved=") {
                parsed.interleaved = true;
            } else if let Some(ports) = param.strip_prefix("client_port=") {
                parsed.client_ports = Some(parse_port_range(ports)?);
            }
        }

        Some(parsed)
    }
}

fn parse_port_range(ports: &str) -> Option<(u16, u16)> {
    match ports.split_once('-') {
        Some((rtp, rtcp)) => Some((rtp.trim().parse().ok()?, rtcp.trim().parse().ok()?)),
        None => {
            let rtp: u16 = ports.trim().parse().ok()?;
            Some((rtp, rtp.checked_add(1)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unicast_with_port_pair() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        assert_eq!(th.client_ports, Some((5000, 5001)));
        assert!(!th.multicast && !th.interleaved);
    }

    #[test]
    fn single_client_port() {
        let th = TransportHeader::parse("RTP/AVP/UDP;unicast;client_port=6000").unwrap();
        assert_eq!(th.client_ports, Some((6000, 6001)));
    }

    #[test]
    fn multicast_request() {
        let th = TransportHeader::parse("RTP/AVP;multicast;port=9000-9001").unwrap();
        assert!(th.multicast);
        assert_eq!(th.client_ports, None);
    }

    #[test]
    fn interleaved_is_flagged() {
        let tcp = TransportHeader::parse("RTP/AVP/TCP;unicast;interleaved=0-1").unwrap();
        assert!(tcp.interleaved);
        let udp = TransportHeader::parse("RTP/AVP;unicast;interleaved=0-1").unwrap();
        assert!(udp.interleaved);
    }

    #[test]
    fn first_of_several_specs_wins() {
        let th =
            TransportHeader::parse("RTP/AVP;multicast, RTP/AVP;unicast;client_port=4588-4589")
                .unwrap();
        assert!(th.multicast);
    }

    #[test]
    fn response_header_values() {
        let th = TransportHeader::parse("RTP/AVP;unicast;client_port=5000-5001").unwrap();
        let unicast = Transport::unicast("10.0.0.9".parse().unwrap(), &th, (8000, 8001)).unwrap();
        assert_eq!(
            unicast.header_value(),
            "RTP/AVP;unicast;client_port=5000-5001;server_port=8000-8001"
        );
        assert_eq!(
            unicast.rtp_destination(),
            "10.0.0.9:5000".parse::<SocketAddr>().unwrap()
        );

        let multicast = Transport::Multicast {
            rtp_destination: "224.1.3.7:8002".parse().unwrap(),
            rtcp_port: 8003,
            ttl: 16,
        };
        assert_eq!(
            multicast.header_value(),
            "RTP/AVP;multicast;destination=224.1.3.7;port=8002-8003;ttl=16"
        );
    }
}
