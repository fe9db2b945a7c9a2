//! Raw-socket hop probing.
//!
//! Builds TTL-limited ICMP echo, TCP SYN, and UDP probes, captures whatever
//! the network sends back, and exposes the result through the
//! [`HopProber`](netprobe_core::HopProber) trait consumed by the trace
//! engine. Requires CAP_NET_RAW (or root) and currently runs on Linux only.

pub mod packet;
pub mod prober;
pub mod reply;
pub mod socket;

pub use prober::RawHopProber;

use netprobe_core::{ProbeError, Protocol};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};

/// Default destination port for UDP probes, the classic traceroute base.
pub const DEFAULT_UDP_PORT: u16 = 33434;

/// Default destination port for TCP probes.
pub const DEFAULT_TCP_PORT: u16 = 443;

/// Creates a raw-socket prober toward `target`.
///
/// `target_port` applies to TCP and UDP probes and is ignored for ICMP; when
/// `None`, the per-transport default is used.
pub fn new_prober(
    protocol: Protocol,
    target: IpAddr,
    target_port: Option<u16>,
) -> Result<RawHopProber, ProbeError> {
    let target_port = target_port.unwrap_or(match protocol {
        Protocol::Tcp => DEFAULT_TCP_PORT,
        _ => DEFAULT_UDP_PORT,
    });

    let src_ip = local_addr_for(target)?;
    let src_port = allocate_port();
    let channel = socket::open_channel(target)?;

    Ok(RawHopProber::new(
        protocol, src_ip, src_port, target, target_port, channel,
    ))
}

/// Determines the local address the kernel would route toward `target`.
///
/// Connecting a UDP socket performs route selection without sending anything.
fn local_addr_for(target: IpAddr) -> Result<IpAddr, ProbeError> {
    let bind_addr: SocketAddr = match target {
        IpAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
        IpAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
    };
    let socket = UdpSocket::bind(bind_addr).map_err(ProbeError::SocketCreation)?;
    socket
        .connect((target, 53))
        .map_err(|source| ProbeError::SocketBind {
            addr: SocketAddr::new(target, 53),
            source,
        })?;
    let local = socket.local_addr().map_err(ProbeError::SocketCreation)?;
    Ok(local.ip())
}

/// Picks a random ephemeral source port for TCP and UDP probes.
fn allocate_port() -> u16 {
    rand::rng().random_range(32768..=60999)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_port_is_ephemeral() {
        for _ in 0..100 {
            let port = allocate_port();
            assert!((32768..=60999).contains(&port));
        }
    }

    #[test]
    fn test_local_addr_for_loopback() {
        let addr = local_addr_for(IpAddr::V4(Ipv4Addr::LOCALHOST)).unwrap();
        assert_eq!(addr, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }
}
