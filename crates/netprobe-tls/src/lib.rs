//! TLS capability probing.
//!
//! One handshake, one verdict: offer an exact ordered set of cipher suites
//! and record what the server does with it.

pub mod catalog;
pub mod prober;

pub use catalog::{CipherOffer, DEFAULT_CATALOG};
pub use prober::{probe_tls, TlsProbeConfig};
