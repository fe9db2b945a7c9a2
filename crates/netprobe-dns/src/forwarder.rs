//! Ordered-upstream DNS forwarder.
//!
//! Queries a fixed list of upstream resolvers strictly in order, giving each
//! its own timeout, and returns the first usable answer. Truncated UDP
//! replies trigger a TCP retry against the same upstream before moving on.

use crate::observer::{NullObserver, QueryEvent, QueryObserver, QueryOutcome};
use chrono::Utc;
use hickory_proto::op::{Message, MessageType, OpCode, Query, ResponseCode};
use hickory_proto::rr::{Name, RData, RecordType};
use netprobe_core::{DnsQueryRecord, ProbeError, ResolutionErrorKind};
use rand::Rng;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace, warn};

const MAX_DNS_MESSAGE: usize = 4096;

/// Forwards queries to a configured list of upstream resolvers.
pub struct DnsForwarder {
    upstreams: Vec<SocketAddr>,
    timeout: Duration,
    observer: Arc<dyn QueryObserver>,
}

impl DnsForwarder {
    /// Creates a forwarder over the given upstreams, tried strictly in order.
    pub fn new(upstreams: Vec<SocketAddr>, timeout: Duration) -> Result<Self, ProbeError> {
        if upstreams.is_empty() {
            return Err(ProbeError::EmptyUpstreams);
        }
        Ok(Self {
            upstreams,
            timeout,
            observer: Arc::new(NullObserver),
        })
    }

    /// Replaces the observer notified of every upstream exchange.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Resolves `name` to addresses of the given record type.
    ///
    /// Walks the upstream list in order; the first upstream that produces a
    /// usable answer wins. When every upstream has been tried, the error
    /// distinguishes an authoritative empty answer from total failure.
    pub async fn resolve(
        &self,
        name: &str,
        record_type: RecordType,
    ) -> Result<DnsQueryRecord, ProbeError> {
        let parsed_name = Name::from_utf8(name).map_err(|_| ProbeError::Resolution {
            name: name.to_string(),
            kind: ResolutionErrorKind::MalformedName,
        })?;

        let query_id: u16 = rand::rng().random();
        let mut message = Message::new();
        message
            .set_id(query_id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .add_query(Query::query(parsed_name, record_type));
        let wire = message.to_vec().map_err(|e| {
            ProbeError::Internal(format!("Failed to encode DNS query: {}", e))
        })?;

        let mut saw_no_answer = false;

        for &upstream in &self.upstreams {
            let start = Instant::now();
            let (outcome, raw_response) = self.exchange(upstream, &wire, query_id).await;
            let latency = start.elapsed();

            self.observer.on_query(&QueryEvent {
                name: name.to_string(),
                record_type,
                upstream,
                outcome: outcome.clone(),
                latency,
            });

            match outcome {
                QueryOutcome::Answered { addresses } => {
                    return Ok(DnsQueryRecord {
                        name: name.to_string(),
                        record_type: record_type.to_string(),
                        upstream,
                        addresses,
                        raw_response,
                        timestamp: Utc::now(),
                        latency,
                    });
                }
                QueryOutcome::NoAnswer => {
                    saw_no_answer = true;
                    debug!(name = %name, upstream = %upstream, "Upstream returned no answer");
                }
                QueryOutcome::Timeout => {
                    debug!(name = %name, upstream = %upstream, "Upstream timed out");
                }
                QueryOutcome::Malformed => {
                    warn!(name = %name, upstream = %upstream, "Upstream reply unusable");
                }
            }
        }

        let kind = if saw_no_answer {
            ResolutionErrorKind::NoAnswer
        } else {
            ResolutionErrorKind::AllUpstreamsFailed
        };
        Err(ProbeError::Resolution {
            name: name.to_string(),
            kind,
        })
    }

    /// Runs one query against one upstream, falling back to TCP when the UDP
    /// reply is truncated. Returns the classified outcome and, on answer, the
    /// reply re-encoded to wire form.
    async fn exchange(
        &self,
        upstream: SocketAddr,
        wire: &[u8],
        query_id: u16,
    ) -> (QueryOutcome, Option<Vec<u8>>) {
        let reply = match self.exchange_udp(upstream, wire, query_id).await {
            Ok(Some(reply)) => reply,
            Ok(None) => return (QueryOutcome::Timeout, None),
            Err(_) => return (QueryOutcome::Malformed, None),
        };

        let message = if reply.truncated() {
            trace!(upstream = %upstream, "UDP reply truncated, retrying over TCP");
            match self.exchange_tcp(upstream, wire, query_id).await {
                Ok(Some(reply)) => reply,
                Ok(None) => return (QueryOutcome::Timeout, None),
                Err(_) => return (QueryOutcome::Malformed, None),
            }
        } else {
            reply
        };

        match message.response_code() {
            ResponseCode::NoError => {}
            // NXDOMAIN is an authoritative "no such name": a well-formed
            // reply with zero answers, not an upstream failure.
            ResponseCode::NXDomain => return (QueryOutcome::NoAnswer, None),
            _ => return (QueryOutcome::Malformed, None),
        }

        let addresses: Vec<IpAddr> = message
            .answers()
            .iter()
            .filter_map(|record| match record.data() {
                RData::A(a) => Some(IpAddr::V4(a.0)),
                RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
                _ => None,
            })
            .collect();

        if addresses.is_empty() {
            (QueryOutcome::NoAnswer, None)
        } else {
            let raw = message.to_vec().ok();
            (QueryOutcome::Answered { addresses }, raw)
        }
    }

    /// Sends the query over UDP and reads replies until the ID matches or the
    /// per-upstream timeout expires. `Ok(None)` means timeout.
    async fn exchange_udp(
        &self,
        upstream: SocketAddr,
        wire: &[u8],
        query_id: u16,
    ) -> Result<Option<Message>, ProbeError> {
        let socket = if upstream.is_ipv4() {
            UdpSocket::bind("0.0.0.0:0").await
        } else {
            UdpSocket::bind("[::]:0").await
        }
        .map_err(ProbeError::SocketCreation)?;
        socket
            .connect(upstream)
            .await
            .map_err(|source| ProbeError::SocketBind {
                addr: upstream,
                source,
            })?;
        socket.send(wire).await.map_err(ProbeError::WriteFailed)?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = [0u8; MAX_DNS_MESSAGE];
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            let n = match tokio::time::timeout(remaining, socket.recv(&mut buf)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(ProbeError::from(e)),
                Err(_) => return Ok(None),
            };
            match Message::from_vec(&buf[..n]) {
                // Replies with a foreign ID are stray traffic; keep reading.
                Ok(message) if message.id() == query_id => return Ok(Some(message)),
                Ok(_) | Err(_) => continue,
            }
        }
    }

    /// Repeats the query over TCP with the RFC 1035 two-byte length prefix.
    async fn exchange_tcp(
        &self,
        upstream: SocketAddr,
        wire: &[u8],
        query_id: u16,
    ) -> Result<Option<Message>, ProbeError> {
        let exchange = async {
            let mut stream = TcpStream::connect(upstream).await?;
            stream.write_all(&(wire.len() as u16).to_be_bytes()).await?;
            stream.write_all(wire).await?;

            let mut len_buf = [0u8; 2];
            stream.read_exact(&mut len_buf).await?;
            let len = u16::from_be_bytes(len_buf) as usize;
            let mut reply = vec![0u8; len];
            stream.read_exact(&mut reply).await?;
            Ok::<Vec<u8>, std::io::Error>(reply)
        };

        let reply = match tokio::time::timeout(self.timeout, exchange).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(ProbeError::from(e)),
            Err(_) => return Ok(None),
        };

        let message = Message::from_vec(&reply)
            .map_err(|e| ProbeError::MalformedPacket(format!("TCP reply from {}: {}", upstream, e)))?;
        if message.id() != query_id {
            return Err(ProbeError::PacketMismatch);
        }
        Ok(Some(message))
    }
}
