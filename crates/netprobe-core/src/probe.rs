//! Core trait for hop prober implementations.

use crate::{HopReply, ProbeError, Protocol};
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;

/// One transport-specific hop prober (ICMP echo, TCP SYN, or UDP).
///
/// A prober sends exactly one probe per call and classifies whatever comes
/// back before the timeout. It holds no result state between calls; retries
/// belong to the engine, not the prober.
#[async_trait]
pub trait HopProber: Send {
    /// The transport this prober uses.
    fn protocol(&self) -> Protocol;

    /// The address the probes are sent to.
    fn target(&self) -> IpAddr;

    /// Sends a single probe with the given TTL and awaits one classified
    /// response or the timeout.
    ///
    /// Network conditions (nothing arrived, unreachable signals) are
    /// classified in the returned [`HopReply`]; `Err` is reserved for fatal
    /// failures that should stop the trace.
    async fn probe(&mut self, ttl: u8, timeout: Duration) -> Result<HopReply, ProbeError>;

    /// Closes the prober, releasing its sockets.
    async fn close(&mut self) -> Result<(), ProbeError>;
}
