//! Single-handshake TLS capability prober.
//!
//! Performs exactly one handshake per call. There is no retry, no fallback
//! to a different offer, and no session reuse: a failed handshake is a
//! finding, not an error to route around. A server that negotiates a suite
//! we never offered is surfaced as an anomaly instead of being discarded.

use crate::catalog::{openssl_list, CipherOffer};
use netprobe_core::{ProbeError, TlsFailureReason, TlsProbeResult};
use openssl::ssl::{ErrorCode, SslConnector, SslMethod, SslVerifyMode, SslVersion};
use std::net::{IpAddr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_openssl::SslStream;
use tracing::{debug, info};

/// Configuration for one TLS capability probe.
#[derive(Debug, Clone)]
pub struct TlsProbeConfig {
    /// Destination port.
    pub port: u16,
    /// Suites to offer, in preference order.
    pub offer: CipherOffer,
    /// Server name to send in the ClientHello; `None` omits SNI entirely.
    pub sni: Option<String>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Handshake timeout, measured from the end of the TCP connect.
    pub handshake_timeout: Duration,
}

impl TlsProbeConfig {
    /// A probe of `port` with the default catalog and no SNI.
    pub fn new(port: u16) -> Self {
        Self {
            port,
            offer: CipherOffer::default_catalog(),
            sni: None,
            connect_timeout: Duration::from_secs(10),
            handshake_timeout: Duration::from_secs(10),
        }
    }
}

/// Runs one TLS handshake against `target` and reports what happened.
///
/// `Err` is reserved for local setup problems (an unknown suite name, an
/// OpenSSL context failure). Everything observed on the network, including
/// refusal and silence, comes back as an `Ok` result with `success` false.
pub async fn probe_tls(
    target: IpAddr,
    config: &TlsProbeConfig,
) -> Result<TlsProbeResult, ProbeError> {
    let endpoint = SocketAddr::new(target, config.port);
    let connector = build_connector(&config.offer)?;

    let mut result = TlsProbeResult {
        target: endpoint,
        offered: config.offer.names().to_vec(),
        negotiated: None,
        success: false,
        failure: None,
        suite_outside_offer: false,
    };

    debug!(endpoint = %endpoint, suites = result.offered.len(), "Starting TLS probe");

    let stream = match tokio::time::timeout(config.connect_timeout, TcpStream::connect(endpoint))
        .await
    {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            debug!(endpoint = %endpoint, error = %e, "TCP connect failed");
            result.failure = Some(TlsFailureReason::ConnectFailed);
            return Ok(result);
        }
        Err(_) => {
            result.failure = Some(TlsFailureReason::ConnectFailed);
            return Ok(result);
        }
    };

    let mut ssl_config = connector
        .configure()
        .map_err(|e| ProbeError::TlsSetup(e.to_string()))?;
    ssl_config.set_verify_hostname(false);
    if config.sni.is_none() {
        ssl_config.set_use_server_name_indication(false);
    }
    let domain = config
        .sni
        .clone()
        .unwrap_or_else(|| target.to_string());
    let ssl = ssl_config
        .into_ssl(&domain)
        .map_err(|e| ProbeError::TlsSetup(e.to_string()))?;

    let mut tls_stream =
        SslStream::new(ssl, stream).map_err(|e| ProbeError::TlsSetup(e.to_string()))?;

    match tokio::time::timeout(config.handshake_timeout, Pin::new(&mut tls_stream).connect())
        .await
    {
        Ok(Ok(())) => {
            let negotiated = tls_stream
                .ssl()
                .current_cipher()
                .map(|cipher| cipher.name().to_string());
            if let Some(name) = &negotiated {
                result.suite_outside_offer = !config.offer.contains(name);
                info!(
                    endpoint = %endpoint,
                    suite = %name,
                    outside_offer = result.suite_outside_offer,
                    "TLS handshake completed"
                );
            }
            result.negotiated = negotiated;
            result.success = true;
        }
        Ok(Err(e)) => {
            // An SSL-level error means the peer actively rejected the
            // handshake; anything else is noise on the transport.
            let reason = if e.code() == ErrorCode::SSL {
                TlsFailureReason::HandshakeRejected
            } else {
                TlsFailureReason::ProtocolError
            };
            debug!(endpoint = %endpoint, error = %e, reason = ?reason, "TLS handshake failed");
            result.failure = Some(reason);
        }
        Err(_) => {
            debug!(endpoint = %endpoint, "TLS handshake timed out");
            result.failure = Some(TlsFailureReason::HandshakeTimeout);
        }
    }

    Ok(result)
}

/// Builds a connector whose ClientHello offers exactly the given suites.
fn build_connector(offer: &CipherOffer) -> Result<SslConnector, ProbeError> {
    let mut builder = SslConnector::builder(SslMethod::tls())
        .map_err(|e| ProbeError::TlsSetup(e.to_string()))?;
    // Capability probing, not a secure channel: accept any certificate.
    builder.set_verify(SslVerifyMode::NONE);

    let legacy = offer.legacy_names();
    let tls13 = offer.tls13_names();

    // OpenSSL keeps separate suite lists per protocol generation and fills
    // each with defaults unless told otherwise. Whichever side of the offer
    // is empty gets its protocol range excluded entirely, so the wire never
    // carries suites that were not asked for.
    if legacy.is_empty() {
        builder
            .set_min_proto_version(Some(SslVersion::TLS1_3))
            .map_err(|e| ProbeError::TlsSetup(e.to_string()))?;
    } else {
        builder
            .set_cipher_list(&openssl_list(&legacy))
            .map_err(|e| ProbeError::TlsSetup(format!("invalid cipher list: {}", e)))?;
    }
    if tls13.is_empty() {
        builder
            .set_max_proto_version(Some(SslVersion::TLS1_2))
            .map_err(|e| ProbeError::TlsSetup(e.to_string()))?;
    } else {
        builder
            .set_ciphersuites(&openssl_list(&tls13))
            .map_err(|e| ProbeError::TlsSetup(format!("invalid ciphersuites: {}", e)))?;
    }

    Ok(builder.build())
}
