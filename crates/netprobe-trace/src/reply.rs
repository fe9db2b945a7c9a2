//! Captured-reply parsing and classification.
//!
//! Raw sockets deliver every packet on the wire; [`parse_reply`] turns one
//! captured frame (starting at the IP layer) into a [`Reply`] the prober can
//! match against its outstanding probe, or a retryable error when the frame
//! has nothing to do with us.

use etherparse::{Icmpv4Type, Icmpv6Type, NetHeaders, PacketHeaders, TransportHeader};
use netprobe_core::ProbeError;
use std::net::IpAddr;

/// What kind of response a captured frame is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplyKind {
    /// ICMP time exceeded from an intermediate router.
    TtlExceeded { inner: InnerProbe },
    /// ICMP destination unreachable.
    DestUnreachable { code: u8, inner: InnerProbe },
    /// ICMP echo reply.
    EchoReply { ident: u16, seq: u16 },
    /// A TCP segment addressed to us.
    TcpReply {
        src_port: u16,
        dst_port: u16,
        ack: u32,
        is_syn_ack: bool,
        is_rst: bool,
    },
    /// Anything else on the wire.
    Other,
}

/// A parsed captured frame.
#[derive(Debug, Clone)]
pub struct Reply {
    /// Source address of the frame.
    pub src: IpAddr,
    /// Destination address of the frame.
    pub dst: IpAddr,
    /// Classification.
    pub kind: ReplyKind,
}

/// The probe packet embedded in an ICMP error, recovered from the error
/// payload. Routers may truncate the embedded packet, so only the IP header
/// and the first 8 transport bytes are trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InnerProbe {
    /// Source of the original probe (should be us).
    pub src: IpAddr,
    /// Destination of the original probe (should be the target).
    pub dst: IpAddr,
    /// IP identification of the original probe.
    pub ip_id: u16,
    /// IP protocol of the original probe.
    pub protocol: u8,
    /// First 8 bytes of the original transport header, zero-padded.
    pub transport: [u8; 8],
}

impl InnerProbe {
    /// Source and destination ports, valid for embedded TCP and UDP probes.
    pub fn ports(&self) -> (u16, u16) {
        (
            u16::from_be_bytes([self.transport[0], self.transport[1]]),
            u16::from_be_bytes([self.transport[2], self.transport[3]]),
        )
    }

    /// TCP sequence number of the embedded probe.
    pub fn tcp_seq(&self) -> u32 {
        u32::from_be_bytes([
            self.transport[4],
            self.transport[5],
            self.transport[6],
            self.transport[7],
        ])
    }

    /// Echo (type, identifier, sequence) of an embedded ICMP echo request.
    pub fn icmp_echo(&self) -> (u8, u16, u16) {
        (
            self.transport[0],
            u16::from_be_bytes([self.transport[4], self.transport[5]]),
            u16::from_be_bytes([self.transport[6], self.transport[7]]),
        )
    }
}

/// Parses one captured frame starting at the IP layer.
pub fn parse_reply(data: &[u8]) -> Result<Reply, ProbeError> {
    let headers =
        PacketHeaders::from_ip_slice(data).map_err(|e| ProbeError::PacketParseFailed {
            layer: "IP",
            reason: e.to_string(),
        })?;

    let (src, dst) = match &headers.net {
        Some(NetHeaders::Ipv4(ipv4, _)) => (
            IpAddr::from(ipv4.source),
            IpAddr::from(ipv4.destination),
        ),
        Some(NetHeaders::Ipv6(ipv6, _)) => (
            IpAddr::from(ipv6.source),
            IpAddr::from(ipv6.destination),
        ),
        _ => {
            return Err(ProbeError::PacketParseFailed {
                layer: "IP",
                reason: "No IP header found".to_string(),
            })
        }
    };

    let payload = headers.payload.slice();

    let kind = match headers.transport {
        Some(TransportHeader::Icmpv4(icmp)) => match icmp.icmp_type {
            Icmpv4Type::TimeExceeded(_) => ReplyKind::TtlExceeded {
                inner: parse_inner_ipv4(payload)?,
            },
            Icmpv4Type::DestinationUnreachable(header) => ReplyKind::DestUnreachable {
                code: header.code_u8(),
                inner: parse_inner_ipv4(payload)?,
            },
            Icmpv4Type::EchoReply(echo) => ReplyKind::EchoReply {
                ident: echo.id,
                seq: echo.seq,
            },
            _ => ReplyKind::Other,
        },
        Some(TransportHeader::Icmpv6(icmp)) => match icmp.icmp_type {
            // Probe packets are v4-only; only loopback echo replies matter here.
            Icmpv6Type::EchoReply(echo) => ReplyKind::EchoReply {
                ident: echo.id,
                seq: echo.seq,
            },
            _ => ReplyKind::Other,
        },
        Some(TransportHeader::Tcp(tcp)) => ReplyKind::TcpReply {
            src_port: tcp.source_port,
            dst_port: tcp.destination_port,
            ack: tcp.acknowledgment_number,
            is_syn_ack: tcp.syn && tcp.ack,
            is_rst: tcp.rst,
        },
        _ => ReplyKind::Other,
    };

    Ok(Reply { src, dst, kind })
}

/// Parses the IPv4 packet embedded in an ICMP error payload.
///
/// Parsed by hand rather than through etherparse: the embedded packet's
/// total-length field describes the original packet, not the truncated copy
/// the router actually included.
fn parse_inner_ipv4(buf: &[u8]) -> Result<InnerProbe, ProbeError> {
    if buf.len() < 20 {
        return Err(ProbeError::PacketTooShort {
            expected: 20,
            actual: buf.len(),
        });
    }

    let version = buf[0] >> 4;
    if version != 4 {
        return Err(ProbeError::PacketParseFailed {
            layer: "Inner IP",
            reason: format!("unexpected IP version {}", version),
        });
    }

    let header_len = ((buf[0] & 0x0f) as usize) * 4;
    if header_len < 20 || buf.len() < header_len {
        return Err(ProbeError::MalformedPacket(format!(
            "inner IP header length {} exceeds payload",
            header_len
        )));
    }

    let mut transport = [0u8; 8];
    let avail = (buf.len() - header_len).min(8);
    transport[..avail].copy_from_slice(&buf[header_len..header_len + avail]);

    Ok(InnerProbe {
        src: IpAddr::from([buf[12], buf[13], buf[14], buf[15]]),
        dst: IpAddr::from([buf[16], buf[17], buf[18], buf[19]]),
        ip_id: u16::from_be_bytes([buf[4], buf[5]]),
        protocol: buf[9],
        transport,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{build_udp_probe, packet_id_for_ttl};
    use std::net::Ipv4Addr;

    const PROBE_SRC: Ipv4Addr = Ipv4Addr::new(192, 168, 1, 10);
    const TARGET: Ipv4Addr = Ipv4Addr::new(203, 0, 113, 1);
    const ROUTER: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 1);

    fn ipv4_header(src: Ipv4Addr, dst: Ipv4Addr, protocol: u8, total_len: u16) -> Vec<u8> {
        let mut hdr = vec![0u8; 20];
        hdr[0] = 0x45;
        hdr[2..4].copy_from_slice(&total_len.to_be_bytes());
        hdr[8] = 64; // ttl
        hdr[9] = protocol;
        hdr[12..16].copy_from_slice(&src.octets());
        hdr[16..20].copy_from_slice(&dst.octets());
        hdr
    }

    /// Wraps a probe packet in an ICMP error the way a router would.
    fn icmp_error(from: Ipv4Addr, icmp_type: u8, code: u8, embedded: &[u8]) -> Vec<u8> {
        let total_len = 20 + 8 + embedded.len();
        let mut packet = ipv4_header(from, PROBE_SRC, 1, total_len as u16);
        packet.extend_from_slice(&[icmp_type, code, 0, 0, 0, 0, 0, 0]);
        packet.extend_from_slice(embedded);
        packet
    }

    #[test]
    fn test_parse_ttl_exceeded_with_embedded_udp() {
        let probe =
            build_udp_probe(IpAddr::V4(PROBE_SRC), 54321, IpAddr::V4(TARGET), 33434, 3).unwrap();
        let frame = icmp_error(ROUTER, 11, 0, &probe);

        let reply = parse_reply(&frame).unwrap();
        assert_eq!(reply.src, IpAddr::V4(ROUTER));

        let ReplyKind::TtlExceeded { inner } = reply.kind else {
            panic!("expected TtlExceeded, got {:?}", reply.kind);
        };
        assert_eq!(inner.src, IpAddr::V4(PROBE_SRC));
        assert_eq!(inner.dst, IpAddr::V4(TARGET));
        assert_eq!(inner.ip_id, packet_id_for_ttl(3));
        assert_eq!(inner.ports(), (54321, 33434));
    }

    #[test]
    fn test_parse_truncated_embedded_packet() {
        // Router includes only the inner IP header plus 4 transport bytes.
        let probe =
            build_udp_probe(IpAddr::V4(PROBE_SRC), 54321, IpAddr::V4(TARGET), 33434, 2).unwrap();
        let frame = icmp_error(ROUTER, 11, 0, &probe[..24]);

        let reply = parse_reply(&frame).unwrap();
        let ReplyKind::TtlExceeded { inner } = reply.kind else {
            panic!("expected TtlExceeded");
        };
        // Ports survive; the missing bytes are zero-padded.
        assert_eq!(inner.ports(), (54321, 33434));
        assert_eq!(inner.transport[6..8], [0, 0]);
    }

    #[test]
    fn test_parse_port_unreachable() {
        let probe =
            build_udp_probe(IpAddr::V4(PROBE_SRC), 54321, IpAddr::V4(TARGET), 33434, 9).unwrap();
        let frame = icmp_error(TARGET, 3, 3, &probe);

        let reply = parse_reply(&frame).unwrap();
        assert_eq!(reply.src, IpAddr::V4(TARGET));
        assert!(matches!(
            reply.kind,
            ReplyKind::DestUnreachable { code: 3, .. }
        ));
    }

    #[test]
    fn test_parse_echo_reply() {
        let total_len = 20 + 8;
        let mut frame = ipv4_header(TARGET, PROBE_SRC, 1, total_len as u16);
        // type 0 (echo reply), code 0, checksum, id 777, seq 4
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.extend_from_slice(&777u16.to_be_bytes());
        frame.extend_from_slice(&4u16.to_be_bytes());

        let reply = parse_reply(&frame).unwrap();
        assert_eq!(
            reply.kind,
            ReplyKind::EchoReply {
                ident: 777,
                seq: 4
            }
        );
    }

    #[test]
    fn test_parse_tcp_syn_ack() {
        let mut frame = ipv4_header(TARGET, PROBE_SRC, 6, 40);
        let mut tcp = vec![0u8; 20];
        tcp[0..2].copy_from_slice(&443u16.to_be_bytes());
        tcp[2..4].copy_from_slice(&54321u16.to_be_bytes());
        tcp[8..12].copy_from_slice(&0x6e70_0004u32.to_be_bytes()); // ack
        tcp[12] = 5 << 4; // data offset
        tcp[13] = 0x12; // SYN+ACK
        frame.extend_from_slice(&tcp);

        let reply = parse_reply(&frame).unwrap();
        let ReplyKind::TcpReply {
            src_port,
            dst_port,
            ack,
            is_syn_ack,
            is_rst,
        } = reply.kind
        else {
            panic!("expected TcpReply");
        };
        assert_eq!(src_port, 443);
        assert_eq!(dst_port, 54321);
        assert_eq!(ack, 0x6e70_0004);
        assert!(is_syn_ack);
        assert!(!is_rst);
    }

    #[test]
    fn test_garbage_is_a_parse_error() {
        let err = parse_reply(&[0xff, 0x00, 0x01]).unwrap_err();
        assert!(err.is_retryable());
    }
}
