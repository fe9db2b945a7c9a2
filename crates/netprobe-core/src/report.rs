//! Serializable report types for caller-facing output.

use crate::{
    DnsQueryRecord, HopOutcome, HopResult, Protocol, TlsFailureReason, TlsProbeResult, TraceResult,
};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use uuid::Uuid;

/// A single hop in a trace report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HopReport {
    /// The TTL for this hop.
    pub ttl: u8,
    /// The address that responded (None if no response).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddr>,
    /// Round-trip time in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rtt_ms: Option<f64>,
    /// Probe attempts spent on this hop.
    pub attempts: u8,
    /// How the hop was classified.
    pub outcome: HopOutcome,
}

impl From<&HopResult> for HopReport {
    fn from(hop: &HopResult) -> Self {
        Self {
            ttl: hop.ttl,
            ip_address: hop.responder,
            rtt_ms: hop.rtt.map(|d| d.as_secs_f64() * 1000.0),
            attempts: hop.attempts,
            outcome: hop.outcome,
        }
    }
}

/// Report for one trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceReport {
    /// Transport the probes used.
    pub protocol: Protocol,
    /// Whether the target was reached.
    pub reached: bool,
    /// The hops discovered.
    pub hops: Vec<HopReport>,
}

impl From<&TraceResult> for TraceReport {
    fn from(trace: &TraceResult) -> Self {
        Self {
            protocol: trace.protocol,
            reached: trace.reached(),
            hops: trace.hops.iter().map(HopReport::from).collect(),
        }
    }
}

/// Report for one DNS resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsReport {
    /// The queried name.
    pub name: String,
    /// The queried record type.
    pub record_type: String,
    /// The upstream that answered.
    pub upstream: String,
    /// Addresses from the answer section.
    pub addresses: Vec<IpAddr>,
    /// Query latency in milliseconds.
    pub latency_ms: f64,
    /// When the query was issued (RFC 3339).
    pub timestamp: String,
}

impl From<&DnsQueryRecord> for DnsReport {
    fn from(record: &DnsQueryRecord) -> Self {
        Self {
            name: record.name.clone(),
            record_type: record.record_type.clone(),
            upstream: record.upstream.to_string(),
            addresses: record.addresses.clone(),
            latency_ms: record.latency.as_secs_f64() * 1000.0,
            timestamp: record.timestamp.to_rfc3339(),
        }
    }
}

/// Report for one TLS capability probe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsReport {
    /// The probed endpoint.
    pub endpoint: String,
    /// The suites offered, in preference order.
    pub offered_suites: Vec<String>,
    /// The suite the peer selected.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub negotiated_suite: Option<String>,
    /// Whether the handshake completed.
    pub success: bool,
    /// Failure classification when the handshake did not complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<TlsFailureReason>,
    /// True when the negotiated suite was not in the offer.
    pub suite_outside_offer: bool,
}

impl From<&TlsProbeResult> for TlsReport {
    fn from(result: &TlsProbeResult) -> Self {
        Self {
            endpoint: result.target.to_string(),
            offered_suites: result.offered.clone(),
            negotiated_suite: result.negotiated.clone(),
            success: result.success,
            failure_reason: result.failure,
            suite_outside_offer: result.suite_outside_offer,
        }
    }
}

/// Target information in a report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetReport {
    /// The host as supplied by the caller.
    pub host: String,
    /// The resolved address the probes ran against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<IpAddr>,
}

/// Complete results for one target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Unique identifier for this probe run.
    pub run_id: String,
    /// The probed target.
    pub target: TargetReport,
    /// DNS resolution details, absent when the target was a literal address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution: Option<DnsReport>,
    /// Error that prevented resolution; all probing stops without an address.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_error: Option<String>,
    /// Trace results, absent when tracing was skipped or failed to start.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<TraceReport>,
    /// Error that prevented the trace from producing results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_error: Option<String>,
    /// TLS probe results, absent when TLS probing was skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<TlsReport>,
    /// Error that prevented the TLS probe from producing results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls_error: Option<String>,
}

impl ProbeReport {
    /// Creates an empty report for a target with a fresh run ID.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            target: TargetReport {
                host: host.into(),
                ip_address: None,
            },
            resolution: None,
            resolution_error: None,
            trace: None,
            trace_error: None,
            tls: None,
            tls_error: None,
        }
    }

    /// Serializes the report to JSON with indentation.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Serializes the report to compact JSON.
    pub fn to_json_compact(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_hop_report_from_result() {
        let hop = HopResult {
            ttl: 2,
            responder: Some("10.0.0.2".parse().unwrap()),
            rtt: Some(Duration::from_micros(1500)),
            attempts: 1,
            outcome: HopOutcome::Responded,
        };
        let report = HopReport::from(&hop);
        assert_eq!(report.ttl, 2);
        assert_eq!(report.rtt_ms, Some(1.5));
    }

    #[test]
    fn test_report_serialization() {
        let mut report = ProbeReport::new("example.com");
        report.target.ip_address = Some("203.0.113.1".parse().unwrap());
        report.trace = Some(TraceReport {
            protocol: Protocol::Udp,
            reached: true,
            hops: vec![],
        });

        let json = report.to_json().unwrap();
        assert!(json.contains("\"host\": \"example.com\""));
        assert!(json.contains("\"protocol\": \"udp\""));
        // Skipped optionals stay out of the output.
        assert!(!json.contains("tls_error"));
    }

    #[test]
    fn test_tls_report_from_result() {
        let result = TlsProbeResult {
            target: "203.0.113.1:443".parse().unwrap(),
            offered: vec!["ECDHE-RSA-AES256-SHA".into()],
            negotiated: None,
            success: false,
            failure: Some(TlsFailureReason::HandshakeRejected),
            suite_outside_offer: false,
        };
        let report = TlsReport::from(&result);
        assert!(!report.success);
        assert_eq!(
            report.failure_reason,
            Some(TlsFailureReason::HandshakeRejected)
        );

        let json = serde_json::to_string(&report).unwrap();
        assert!(json.contains("\"handshake_rejected\""));
    }
}
