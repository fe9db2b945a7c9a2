//! Error types for probe operations.
//!
//! Network conditions (a hop timing out, a peer rejecting a handshake) are
//! recorded in result values, not here. `ProbeError` covers everything that
//! aborts an operation: socket failures, malformed configuration, and
//! resolution failures that make a target unusable.

use std::net::SocketAddr;
use thiserror::Error;

/// Why a DNS resolution attempt failed as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    /// Every upstream timed out or returned garbage.
    AllUpstreamsFailed,
    /// The query name could not be encoded as a DNS name.
    MalformedName,
    /// At least one upstream answered well-formed but with zero answers.
    NoAnswer,
}

impl std::fmt::Display for ResolutionErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResolutionErrorKind::AllUpstreamsFailed => write!(f, "all upstreams failed"),
            ResolutionErrorKind::MalformedName => write!(f, "malformed query name"),
            ResolutionErrorKind::NoAnswer => write!(f, "no answer records"),
        }
    }
}

/// Main error type for probe operations.
#[derive(Error, Debug)]
pub enum ProbeError {
    // Socket/IO errors
    #[error("Failed to create socket: {0}")]
    SocketCreation(#[source] std::io::Error),

    #[error("Failed to bind to address {addr}: {source}")]
    SocketBind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Read timeout exceeded")]
    ReadTimeout,

    #[error("Write failed: {0}")]
    WriteFailed(#[source] std::io::Error),

    // Packet errors
    #[error("Packet too short: expected at least {expected} bytes, got {actual}")]
    PacketTooShort { expected: usize, actual: usize },

    #[error("Failed to parse {layer} layer: {reason}")]
    PacketParseFailed { layer: &'static str, reason: String },

    #[error("Packet did not match probe")]
    PacketMismatch,

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    // DNS errors
    #[error("Resolution of '{name}' failed: {kind}")]
    Resolution {
        name: String,
        kind: ResolutionErrorKind,
    },

    // TLS errors
    #[error("TLS context setup failed: {0}")]
    TlsSetup(String),

    // Configuration errors: programmer mistakes, fail fast, never retried
    #[error("Invalid max hops: {0} (must be at least 1)")]
    InvalidMaxHops(u8),

    #[error("Invalid tries per hop: {0} (must be at least 1)")]
    InvalidTriesPerHop(u8),

    #[error("Cipher offer is empty")]
    EmptyCipherOffer,

    #[error("Upstream resolver list is empty")]
    EmptyUpstreams,

    #[error("Unknown protocol: {0}")]
    UnknownProtocol(String),

    // Driver errors
    #[error("Hop prober not available on this platform")]
    ProberUnavailable,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,
}

impl ProbeError {
    /// Returns true if this error is retryable (e.g., timeout, packet
    /// mismatch, parse failure).
    ///
    /// Raw sockets capture packets that have nothing to do with our probes;
    /// retryable errors mean keep reading rather than give up.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ReadTimeout
                | Self::PacketMismatch
                | Self::MalformedPacket(_)
                | Self::PacketParseFailed { .. }
                | Self::PacketTooShort { .. }
        )
    }

    /// Returns true if this error is a configuration precondition violation.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::InvalidMaxHops(_)
                | Self::InvalidTriesPerHop(_)
                | Self::EmptyCipherOffer
                | Self::EmptyUpstreams
                | Self::UnknownProtocol(_)
        )
    }
}

impl From<std::io::Error> for ProbeError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => ProbeError::ReadTimeout,
            std::io::ErrorKind::WouldBlock => ProbeError::ReadTimeout,
            _ => ProbeError::Internal(err.to_string()),
        }
    }
}

/// Result type alias for probe operations.
pub type ProbeResult<T> = Result<T, ProbeError>;
