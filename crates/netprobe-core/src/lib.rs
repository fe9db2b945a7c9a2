//! Core types, traits, and the traceroute engine for netprobe.
//!
//! This crate provides the shared vocabulary used by the probing crates:
//!
//! - [`HopProber`] trait implemented by transport-specific hop probers
//! - [`HopResult`], [`TraceResult`], and the other probe outcome types
//! - [`ProbeError`] for error handling
//! - [`trace`] / [`trace_with_cancel`] driving a prober across TTLs
//! - Serializable report types for caller-facing output

pub mod engine;
pub mod error;
pub mod probe;
pub mod report;
pub mod types;

pub use engine::{trace, trace_with_cancel, TraceParams};
pub use error::{ProbeError, ProbeResult, ResolutionErrorKind};
pub use probe::HopProber;
pub use report::{DnsReport, HopReport, ProbeReport, TargetReport, TlsReport, TraceReport};
pub use types::{
    DnsQueryRecord, HopOutcome, HopReply, HopResult, Protocol, Target, TlsFailureReason,
    TlsProbeResult, TraceResult,
};
