//! Raw-socket hop prober.
//!
//! Sends one probe per call at the requested TTL and classifies whatever the
//! wire sends back: a time-exceeded from a router, an answer from the target
//! itself, an unreachable signal, or silence.

use crate::packet::{
    build_icmp_echo, build_tcp_syn, build_udp_probe, packet_id_for_ttl, tcp_seq_for_ttl,
};
use crate::reply::{parse_reply, Reply, ReplyKind};
use crate::socket::Channel;
use async_trait::async_trait;
use netprobe_core::{HopProber, HopReply, ProbeError, Protocol};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Global echo/session identifier counter, unique across prober instances.
static SESSION_ID_COUNTER: AtomicU16 = AtomicU16::new(1);

fn next_session_id() -> u16 {
    SESSION_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// Identity of an in-flight probe, used to match captured replies.
#[derive(Debug, Clone, Copy)]
struct ProbeIdentity {
    src_ip: IpAddr,
    src_port: u16,
    target: IpAddr,
    target_port: u16,
    ident: u16,
    ttl: u8,
}

/// Hop prober backed by raw sockets.
pub struct RawHopProber {
    protocol: Protocol,
    src_ip: IpAddr,
    src_port: u16,
    target: IpAddr,
    target_port: u16,
    ident: u16,
    channel: Channel,
    buffer: Vec<u8>,
}

impl RawHopProber {
    /// Creates a prober for one (target, transport) pair.
    pub fn new(
        protocol: Protocol,
        src_ip: IpAddr,
        src_port: u16,
        target: IpAddr,
        target_port: u16,
        channel: Channel,
    ) -> Self {
        Self {
            protocol,
            src_ip,
            src_port,
            target,
            target_port,
            ident: next_session_id(),
            channel,
            buffer: vec![0u8; 1500],
        }
    }

    fn build_packet(&self, ttl: u8) -> Result<Vec<u8>, ProbeError> {
        match self.protocol {
            Protocol::Icmp => build_icmp_echo(self.src_ip, self.target, ttl, self.ident),
            Protocol::Tcp => build_tcp_syn(
                self.src_ip,
                self.src_port,
                self.target,
                self.target_port,
                ttl,
            ),
            Protocol::Udp => build_udp_probe(
                self.src_ip,
                self.src_port,
                self.target,
                self.target_port,
                ttl,
            ),
        }
    }

    fn identity(&self, ttl: u8) -> ProbeIdentity {
        ProbeIdentity {
            src_ip: self.src_ip,
            src_port: self.src_port,
            target: self.target,
            target_port: self.target_port,
            ident: self.ident,
            ttl,
        }
    }
}

#[async_trait]
impl HopProber for RawHopProber {
    fn protocol(&self) -> Protocol {
        self.protocol
    }

    fn target(&self) -> IpAddr {
        self.target
    }

    async fn probe(&mut self, ttl: u8, timeout: Duration) -> Result<HopReply, ProbeError> {
        let packet = self.build_packet(ttl)?;
        let identity = self.identity(ttl);

        trace!(
            ttl = ttl,
            protocol = %self.protocol,
            target = %self.target,
            "Sending probe"
        );

        let send_time = Instant::now();
        let deadline = send_time + timeout;
        self.channel
            .sink
            .write_to(&packet, SocketAddr::new(self.target, self.target_port))
            .await?;

        loop {
            if Instant::now() >= deadline {
                return Ok(HopReply::Timeout);
            }
            self.channel.source.set_read_deadline(deadline);

            let n = match self.channel.source.read(&mut self.buffer).await {
                Ok(n) => n,
                Err(ProbeError::ReadTimeout) => return Ok(HopReply::Timeout),
                Err(e) if e.is_retryable() => continue,
                Err(e) => return Err(e),
            };

            let reply = match parse_reply(&self.buffer[..n]) {
                Ok(reply) => reply,
                Err(e) if e.is_retryable() => {
                    trace!(error = %e, "Ignoring unparseable frame");
                    continue;
                }
                Err(e) => return Err(e),
            };

            let rtt = send_time.elapsed();
            match classify(self.protocol, &reply, &identity, rtt) {
                Some(hop_reply) => {
                    debug!(
                        ttl = ttl,
                        from = %reply.src,
                        rtt_ms = rtt.as_secs_f64() * 1000.0,
                        "Matched probe response"
                    );
                    return Ok(hop_reply);
                }
                // Unrelated traffic on the wire; keep reading.
                None => continue,
            }
        }
    }

    async fn close(&mut self) -> Result<(), ProbeError> {
        let sink_result = self.channel.sink.close().await;
        let source_result = self.channel.source.close().await;
        sink_result?;
        source_result?;
        Ok(())
    }
}

/// Returns true when the embedded packet in an ICMP error is our probe.
fn inner_matches(protocol: Protocol, identity: &ProbeIdentity, reply: &Reply) -> bool {
    let inner = match &reply.kind {
        ReplyKind::TtlExceeded { inner } | ReplyKind::DestUnreachable { inner, .. } => inner,
        _ => return false,
    };

    if inner.dst != identity.target || inner.src != identity.src_ip {
        return false;
    }

    match protocol {
        Protocol::Udp => {
            inner.ports() == (identity.src_port, identity.target_port)
                && inner.ip_id == packet_id_for_ttl(identity.ttl)
        }
        Protocol::Tcp => {
            inner.ports() == (identity.src_port, identity.target_port)
                && inner.tcp_seq() == tcp_seq_for_ttl(identity.ttl)
        }
        Protocol::Icmp => {
            let (icmp_type, ident, seq) = inner.icmp_echo();
            // Embedded packet must be our echo request.
            icmp_type == 8 && ident == identity.ident && seq == identity.ttl as u16
        }
    }
}

/// Classifies a parsed reply against the in-flight probe.
///
/// Returns `None` for frames that have nothing to do with the probe.
fn classify(
    protocol: Protocol,
    reply: &Reply,
    identity: &ProbeIdentity,
    rtt: Duration,
) -> Option<HopReply> {
    match &reply.kind {
        ReplyKind::TtlExceeded { .. } => {
            if inner_matches(protocol, identity, reply) {
                Some(HopReply::Responded {
                    from: reply.src,
                    rtt,
                })
            } else {
                None
            }
        }
        ReplyKind::DestUnreachable { code, .. } => {
            if !inner_matches(protocol, identity, reply) {
                return None;
            }
            // Port unreachable from the target terminates a UDP trace: the
            // probe made it all the way there.
            if protocol == Protocol::Udp && *code == 3 && reply.src == identity.target {
                Some(HopReply::Reached {
                    from: reply.src,
                    rtt,
                })
            } else {
                Some(HopReply::Unreachable {
                    from: Some(reply.src),
                    rtt: Some(rtt),
                })
            }
        }
        ReplyKind::EchoReply { ident, seq } => {
            if protocol == Protocol::Icmp
                && *ident == identity.ident
                && *seq == identity.ttl as u16
                && reply.src == identity.target
            {
                Some(HopReply::Reached {
                    from: reply.src,
                    rtt,
                })
            } else {
                None
            }
        }
        ReplyKind::TcpReply {
            src_port,
            dst_port,
            ack,
            is_syn_ack,
            is_rst,
        } => {
            if protocol != Protocol::Tcp
                || reply.src != identity.target
                || *src_port != identity.target_port
                || *dst_port != identity.src_port
            {
                return None;
            }
            // SYN-ACK must acknowledge our sequence; an RST carries no
            // usable ack but still proves the target answered.
            if *is_syn_ack && *ack == tcp_seq_for_ttl(identity.ttl).wrapping_add(1) {
                Some(HopReply::Reached {
                    from: reply.src,
                    rtt,
                })
            } else if *is_rst {
                Some(HopReply::Reached {
                    from: reply.src,
                    rtt,
                })
            } else {
                None
            }
        }
        ReplyKind::Other => None,
    }
}
