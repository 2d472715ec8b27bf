use std::hash::{DefaultHasher, Hash, Hasher};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};

use ipnet::Ipv4Net;

use crate::client::Transport;
use crate::error::{EgressError, Result};

/// Picks the multicast group a stream is delivered to.
///
/// The group is a pure function of the sid, so every multicast viewer of a
/// stream lands on the same group and the sink sends each packet once.
#[derive(Debug, Clone)]
pub struct MulticastAllocator {
    range: Ipv4Net,
    rtp_port: u16,
    rtcp_port: u16,
    ttl: u32,
}

impl MulticastAllocator {
    pub fn new(range: &str, rtp_port: u16, rtcp_port: u16, ttl: u32) -> Result<Self> {
        let range: Ipv4Net = range
            .parse()
            .map_err(|e| EgressError::InvalidConfig(format!("multicast range {range}: {e}")))?;
        if !range.network().is_multicast() {
            return Err(EgressError::InvalidConfig(format!(
                "multicast range {range} is not in 224.0.0.0/4"
            )));
        }
        Ok(Self {
            range: range.trunc(),
            rtp_port,
            rtcp_port,
            ttl,
        })
    }

    /// Group address for `sid`. Skips the network address when the range
    /// has room to.
    pub fn group_for(&self, sid: &str) -> Ipv4Addr {
        let network = u32::from(self.range.network());
        let size = 1u64 << (32 - self.range.prefix_len());
        if size <= 2 {
            return self.range.network();
        }

        let mut hasher = DefaultHasher::new();
        sid.hash(&mut hasher);
        let offset = 1 + hasher.finish() % (size - 2);
        Ipv4Addr::from(network + offset as u32)
    }

    pub fn transport_for(&self, sid: &str) -> Transport {
        Transport::Multicast {
            rtp_destination: SocketAddr::V4(SocketAddrV4::new(self.group_for(sid), self.rtp_port)),
            rtcp_port: self.rtcp_port,
            ttl: self.ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_is_stable_and_in_range() {
        let allocator = MulticastAllocator::new("224.1.0.0/16", 8002, 8003, 16).unwrap();
        let range: Ipv4Net = "224.1.0.0/16".parse().unwrap();

        let a = allocator.group_for("demo/cam1");
        assert_eq!(a, allocator.group_for("demo/cam1"));
        assert!(range.contains(&a));
        assert_ne!(a, range.network());

        let transport = allocator.transport_for("demo/cam1");
        assert!(transport.is_multicast());
        assert_eq!(transport.rtp_destination().port(), 8002);
    }

    #[test]
    fn tiny_range_uses_network_address() {
        let allocator = MulticastAllocator::new("239.0.0.5/32", 9000, 9001, 1).unwrap();
        assert_eq!(allocator.group_for("x"), Ipv4Addr::new(239, 0, 0, 5));
    }

    #[test]
    fn rejects_unicast_and_garbage() {
        assert!(MulticastAllocator::new("10.0.0.0/8", 1, 2, 1).is_err());
        assert!(MulticastAllocator::new("not-a-net", 1, 2, 1).is_err());
    }
}
