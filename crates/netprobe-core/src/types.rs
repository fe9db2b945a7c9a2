//! Core types for probe operations.

use chrono::{DateTime, Utc};
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// A probing target: a hostname or literal address, with an optional port.
///
/// Hostnames must be resolved to a numeric address before tracing or TLS
/// probing; a `Target` is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    /// Hostname or literal IP address.
    pub host: String,
    /// Destination port, if the probe needs one.
    pub port: Option<u16>,
}

impl Target {
    /// Creates a target from a host string and optional port.
    pub fn new(host: impl Into<String>, port: Option<u16>) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the host parsed as a literal IP address, if it is one.
    pub fn literal_addr(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

/// Transport used for hop probes.
///
/// Reported alongside results because different transports traverse
/// middleboxes differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Icmp,
    Tcp,
    Udp,
}

impl std::fmt::Display for Protocol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Protocol::Icmp => write!(f, "icmp"),
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = crate::ProbeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "icmp" => Ok(Protocol::Icmp),
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            _ => Err(crate::ProbeError::UnknownProtocol(s.to_string())),
        }
    }
}

/// Classified outcome of a single probe attempt, as returned by a
/// [`HopProber`](crate::HopProber).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopReply {
    /// An intermediate router answered (TTL exceeded).
    Responded { from: IpAddr, rtt: Duration },
    /// The target itself answered.
    Reached { from: IpAddr, rtt: Duration },
    /// An explicit unreachable signal arrived.
    Unreachable {
        from: Option<IpAddr>,
        rtt: Option<Duration>,
    },
    /// Nothing arrived before the timeout.
    Timeout,
}

/// Final outcome recorded for one TTL in a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HopOutcome {
    Responded,
    Reached,
    Unreachable,
    Timeout,
}

/// One hop in a trace: the result of probing a single TTL value.
#[derive(Debug, Clone)]
pub struct HopResult {
    /// The TTL that was probed (>= 1).
    pub ttl: u8,
    /// The address that responded, absent on timeout.
    pub responder: Option<IpAddr>,
    /// Round-trip time from send to first valid response.
    pub rtt: Option<Duration>,
    /// Number of probe attempts spent on this TTL.
    pub attempts: u8,
    /// How the hop was classified.
    pub outcome: HopOutcome,
}

/// Ordered hop list produced by one trace.
///
/// TTL values are contiguous starting at 1 and strictly increasing; the
/// sequence ends at a `Reached` hop or at the max-hops bound.
#[derive(Debug, Clone)]
pub struct TraceResult {
    /// The address the probes were sent to, whether or not it answered.
    pub target: IpAddr,
    /// Transport the probes used.
    pub protocol: Protocol,
    /// Hops indexed by TTL - 1.
    pub hops: Vec<HopResult>,
}

impl TraceResult {
    /// Returns true if the trace terminated by reaching the target.
    pub fn reached(&self) -> bool {
        self.hops
            .last()
            .is_some_and(|h| h.outcome == HopOutcome::Reached)
    }

    /// Checks the TTL contiguity invariant: hop `i` carries TTL `i + 1`.
    pub fn ttls_contiguous(&self) -> bool {
        self.hops
            .iter()
            .enumerate()
            .all(|(i, h)| h.ttl as usize == i + 1)
    }
}

/// Record of one forwarded DNS query, created once per attempt chain and
/// immutable after the response arrives.
#[derive(Debug, Clone)]
pub struct DnsQueryRecord {
    /// The queried name.
    pub name: String,
    /// The queried record type, e.g. "A" or "AAAA".
    pub record_type: String,
    /// The upstream resolver that produced the response.
    pub upstream: SocketAddr,
    /// Addresses extracted from the answer section.
    pub addresses: Vec<IpAddr>,
    /// The raw response message, if one arrived.
    pub raw_response: Option<Vec<u8>>,
    /// When the query chain started.
    pub timestamp: DateTime<Utc>,
    /// Time from sending to the answering upstream until its response.
    pub latency: Duration,
}

/// Why a TLS probe did not complete a handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TlsFailureReason {
    ConnectFailed,
    HandshakeTimeout,
    HandshakeRejected,
    ProtocolError,
}

/// Result of exactly one TLS handshake attempt.
#[derive(Debug, Clone)]
pub struct TlsProbeResult {
    /// The probed endpoint.
    pub target: SocketAddr,
    /// The suites offered, in client-preference order.
    pub offered: Vec<String>,
    /// The suite the peer selected, if the handshake completed.
    pub negotiated: Option<String>,
    /// Whether the handshake completed.
    pub success: bool,
    /// Failure classification when `success` is false.
    pub failure: Option<TlsFailureReason>,
    /// True when the negotiated suite is not in the offered set, a signal
    /// of middlebox interference. Surfaced rather than discarded.
    pub suite_outside_offer: bool,
}
