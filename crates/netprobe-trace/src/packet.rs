//! Probe packet construction using pnet.
//!
//! All builders produce complete IPv4 packets (IP header included, for
//! IP_HDRINCL raw sockets) whose identifying fields are derived from the TTL
//! so replies can be attributed to the attempt that produced them.

use netprobe_core::ProbeError;
use pnet_packet::icmp::echo_request::MutableEchoRequestPacket;
use pnet_packet::icmp::{IcmpPacket, IcmpTypes};
use pnet_packet::ip::IpNextHeaderProtocols;
use pnet_packet::ipv4::{Ipv4Flags, MutableIpv4Packet};
use pnet_packet::tcp::{MutableTcpPacket, TcpFlags};
use pnet_packet::udp::MutableUdpPacket;
use std::net::{IpAddr, Ipv4Addr};

/// Magic payload marking our UDP probes.
pub const MAGIC_PAYLOAD: &[u8] = b"NTPRB";

/// Base IP identification; the probe TTL is added to it.
const BASE_PACKET_ID: u16 = 47823;

/// Base TCP sequence number; the probe TTL is added to it.
const BASE_TCP_SEQ: u32 = 0x6e70_0000;

const IPV4_HEADER_LEN: usize = 20;
const ICMP_ECHO_LEN: usize = 8;
const TCP_HEADER_LEN: usize = 20;
const UDP_HEADER_LEN: usize = 8;

/// IP identification used for the probe at the given TTL.
pub fn packet_id_for_ttl(ttl: u8) -> u16 {
    BASE_PACKET_ID + ttl as u16
}

/// TCP sequence number used for the probe at the given TTL.
pub fn tcp_seq_for_ttl(ttl: u8) -> u32 {
    BASE_TCP_SEQ + ttl as u32
}

fn require_v4(src: IpAddr, dst: IpAddr) -> Result<(Ipv4Addr, Ipv4Addr), ProbeError> {
    match (src, dst) {
        (IpAddr::V4(s), IpAddr::V4(d)) => Ok((s, d)),
        (IpAddr::V6(_), IpAddr::V6(_)) => Err(ProbeError::Internal(
            "IPv6 probe packets not supported".to_string(),
        )),
        _ => Err(ProbeError::Internal(
            "IP version mismatch between source and destination".to_string(),
        )),
    }
}

fn write_ipv4_header(
    buffer: &mut [u8],
    src: Ipv4Addr,
    dst: Ipv4Addr,
    ttl: u8,
    total_len: usize,
    protocol: pnet_packet::ip::IpNextHeaderProtocol,
) -> Result<(), ProbeError> {
    let mut ip = MutableIpv4Packet::new(buffer)
        .ok_or_else(|| ProbeError::Internal("Failed to create IP packet".to_string()))?;

    ip.set_version(4);
    ip.set_header_length(5);
    ip.set_total_length(total_len as u16);
    ip.set_identification(packet_id_for_ttl(ttl));
    ip.set_flags(Ipv4Flags::DontFragment);
    ip.set_ttl(ttl);
    ip.set_next_level_protocol(protocol);
    ip.set_source(src);
    ip.set_destination(dst);

    let checksum = pnet_packet::ipv4::checksum(&ip.to_immutable());
    ip.set_checksum(checksum);
    Ok(())
}

/// Creates an ICMP echo request probe.
///
/// The echo identifier ties replies to this probe session and the sequence
/// number carries the TTL.
pub fn build_icmp_echo(
    src: IpAddr,
    dst: IpAddr,
    ttl: u8,
    ident: u16,
) -> Result<Vec<u8>, ProbeError> {
    let (src, dst) = require_v4(src, dst)?;

    let total_len = IPV4_HEADER_LEN + ICMP_ECHO_LEN;
    let mut buffer = vec![0u8; total_len];

    write_ipv4_header(
        &mut buffer,
        src,
        dst,
        ttl,
        total_len,
        IpNextHeaderProtocols::Icmp,
    )?;

    {
        let mut echo = MutableEchoRequestPacket::new(&mut buffer[IPV4_HEADER_LEN..])
            .ok_or_else(|| ProbeError::Internal("Failed to create ICMP packet".to_string()))?;
        echo.set_icmp_type(IcmpTypes::EchoRequest);
        echo.set_identifier(ident);
        echo.set_sequence_number(ttl as u16);

        let icmp = IcmpPacket::new(&buffer[IPV4_HEADER_LEN..])
            .ok_or_else(|| ProbeError::Internal("Failed to view ICMP packet".to_string()))?;
        let checksum = pnet_packet::icmp::checksum(&icmp);

        let mut echo = MutableEchoRequestPacket::new(&mut buffer[IPV4_HEADER_LEN..])
            .ok_or_else(|| ProbeError::Internal("Failed to create ICMP packet".to_string()))?;
        echo.set_checksum(checksum);
    }

    Ok(buffer)
}

/// Creates a TCP SYN probe with no payload.
pub fn build_tcp_syn(
    src: IpAddr,
    src_port: u16,
    dst: IpAddr,
    dst_port: u16,
    ttl: u8,
) -> Result<Vec<u8>, ProbeError> {
    let (src, dst) = require_v4(src, dst)?;

    let total_len = IPV4_HEADER_LEN + TCP_HEADER_LEN;
    let mut buffer = vec![0u8; total_len];

    write_ipv4_header(
        &mut buffer,
        src,
        dst,
        ttl,
        total_len,
        IpNextHeaderProtocols::Tcp,
    )?;

    {
        let mut tcp = MutableTcpPacket::new(&mut buffer[IPV4_HEADER_LEN..])
            .ok_or_else(|| ProbeError::Internal("Failed to create TCP packet".to_string()))?;
        tcp.set_source(src_port);
        tcp.set_destination(dst_port);
        tcp.set_sequence(tcp_seq_for_ttl(ttl));
        tcp.set_data_offset(5);
        tcp.set_flags(TcpFlags::SYN);
        tcp.set_window(1024);

        let checksum = pnet_packet::tcp::ipv4_checksum(&tcp.to_immutable(), &src, &dst);
        tcp.set_checksum(checksum);
    }

    Ok(buffer)
}

/// Creates a UDP probe carrying the magic payload and the packet ID.
pub fn build_udp_probe(
    src: IpAddr,
    src_port: u16,
    dst: IpAddr,
    dst_port: u16,
    ttl: u8,
) -> Result<Vec<u8>, ProbeError> {
    let (src, dst) = require_v4(src, dst)?;

    let packet_id = packet_id_for_ttl(ttl);

    let mut payload = vec![0u8; 8];
    payload[..MAGIC_PAYLOAD.len()].copy_from_slice(MAGIC_PAYLOAD);
    payload[6] = (packet_id >> 8) as u8;
    payload[7] = (packet_id & 0xff) as u8;

    let udp_len = UDP_HEADER_LEN + payload.len();
    let total_len = IPV4_HEADER_LEN + udp_len;
    let mut buffer = vec![0u8; total_len];

    write_ipv4_header(
        &mut buffer,
        src,
        dst,
        ttl,
        total_len,
        IpNextHeaderProtocols::Udp,
    )?;

    {
        let mut udp = MutableUdpPacket::new(&mut buffer[IPV4_HEADER_LEN..])
            .ok_or_else(|| ProbeError::Internal("Failed to create UDP packet".to_string()))?;
        udp.set_source(src_port);
        udp.set_destination(dst_port);
        udp.set_length(udp_len as u16);
        udp.set_payload(&payload);

        let checksum = pnet_packet::udp::ipv4_checksum(&udp.to_immutable(), &src, &dst);
        udp.set_checksum(checksum);
    }

    Ok(buffer)
}
