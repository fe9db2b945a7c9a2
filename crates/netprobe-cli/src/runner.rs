//! Probe runner orchestrating resolution, tracing, and the TLS probe.

use netprobe_core::{
    trace, DnsReport, HopProber, ProbeError, ProbeReport, Protocol, TlsReport, TraceParams,
    TraceReport,
};
use netprobe_dns::{DnsForwarder, LogObserver, RecordType};
use netprobe_tls::{probe_tls, CipherOffer, TlsProbeConfig};
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Everything one probe run needs.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    pub target: String,
    pub protocol: Protocol,
    pub port: Option<u16>,
    pub max_hops: u8,
    pub tries: u8,
    pub hop_timeout: Duration,
    pub upstreams: Vec<SocketAddr>,
    pub dns_timeout: Duration,
    pub tls_port: u16,
    pub offer: CipherOffer,
    pub sni: Option<String>,
    pub connect_timeout: Duration,
    pub handshake_timeout: Duration,
    pub skip_trace: bool,
    pub skip_tls: bool,
}

/// Runs one full probe: resolve, trace, TLS, and assemble the report.
pub async fn run_probe(config: ProbeConfig) -> Result<ProbeReport, ProbeError> {
    let mut report = ProbeReport::new(&config.target);

    let target_ip = match resolve_target(&config, &mut report).await {
        Ok(ip) => ip,
        Err(e) => {
            // Without an address there is nothing left to probe.
            report.resolution_error = Some(e.to_string());
            return Ok(report);
        }
    };
    report.target.ip_address = Some(target_ip);

    let trace_phase = async {
        if config.skip_trace {
            return (None, None);
        }
        match run_trace(&config, target_ip).await {
            Ok(result) => (Some(result), None),
            Err(e) => (None, Some(e.to_string())),
        }
    };

    let tls_phase = async {
        if config.skip_tls {
            return (None, None);
        }
        let tls_config = TlsProbeConfig {
            port: config.tls_port,
            offer: config.offer.clone(),
            sni: config.sni.clone(),
            connect_timeout: config.connect_timeout,
            handshake_timeout: config.handshake_timeout,
        };
        match probe_tls(target_ip, &tls_config).await {
            Ok(result) => (Some(result), None),
            Err(e) => (None, Some(e.to_string())),
        }
    };

    let ((trace_result, trace_error), (tls_result, tls_error)) =
        tokio::join!(trace_phase, tls_phase);

    report.trace = trace_result.as_ref().map(TraceReport::from);
    report.trace_error = trace_error;
    report.tls = tls_result.as_ref().map(TlsReport::from);
    report.tls_error = tls_error;

    Ok(report)
}

/// Resolves the target, bypassing DNS for literal addresses, and records the
/// resolution in the report.
async fn resolve_target(
    config: &ProbeConfig,
    report: &mut ProbeReport,
) -> Result<IpAddr, ProbeError> {
    if let Ok(ip) = config.target.parse::<IpAddr>() {
        debug!(target = %config.target, "Target is a literal address, skipping resolution");
        return Ok(ip);
    }

    let forwarder = DnsForwarder::new(config.upstreams.clone(), config.dns_timeout)?
        .with_observer(Arc::new(LogObserver));
    let record = forwarder.resolve(&config.target, RecordType::A).await?;

    report.resolution = Some(DnsReport::from(&record));
    let ip = *record.addresses.first().ok_or(ProbeError::Resolution {
        name: config.target.clone(),
        kind: netprobe_core::ResolutionErrorKind::NoAnswer,
    })?;
    info!(target = %config.target, ip = %ip, "Resolved target");
    Ok(ip)
}

async fn run_trace(
    config: &ProbeConfig,
    target_ip: IpAddr,
) -> Result<netprobe_core::TraceResult, ProbeError> {
    let params = TraceParams {
        max_hops: config.max_hops,
        max_tries_per_hop: config.tries,
        hop_timeout: config.hop_timeout,
        ..TraceParams::default()
    };
    params.validate()?;

    let mut prober = netprobe_trace::new_prober(config.protocol, target_ip, config.port)?;
    let result = trace(&mut prober, &params).await;
    prober.close().await?;
    result
}
