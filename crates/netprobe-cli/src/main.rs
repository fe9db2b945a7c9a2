//! CLI for netprobe.

mod runner;

use clap::Parser;
use netprobe_core::Protocol;
use netprobe_tls::CipherOffer;
use runner::ProbeConfig;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::time::Duration;

/// netprobe - DNS, path, and TLS measurement tool.
#[derive(Parser, Debug)]
#[command(name = "netprobe")]
#[command(version)]
#[command(about = "netprobe - DNS, path, and TLS measurement tool")]
pub struct Args {
    /// Target hostname or IP address.
    #[arg(required = true)]
    pub target: String,

    /// Protocol for hop probes.
    #[arg(short = 'P', long, default_value = "icmp")]
    pub proto: String,

    /// Destination port for TCP/UDP hop probes.
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum TTL.
    #[arg(short = 'm', long = "max-hops", default_value = "30")]
    pub max_hops: u8,

    /// Probe attempts per hop.
    #[arg(short = 'q', long, default_value = "3")]
    pub tries: u8,

    /// Timeout per hop probe in milliseconds.
    #[arg(long = "hop-timeout", default_value = "3000")]
    pub hop_timeout_ms: u64,

    /// Upstream DNS resolver, repeatable; tried in order.
    #[arg(long = "upstream", default_value = "8.8.8.8:53")]
    pub upstreams: Vec<SocketAddr>,

    /// Timeout per DNS upstream in milliseconds.
    #[arg(long = "dns-timeout", default_value = "3000")]
    pub dns_timeout_ms: u64,

    /// Port for the TLS capability probe.
    #[arg(long = "tls-port", default_value = "443")]
    pub tls_port: u16,

    /// Cipher suite to offer, repeatable; order is preference order.
    /// Defaults to the built-in catalog.
    #[arg(long = "cipher")]
    pub ciphers: Vec<String>,

    /// Server name to send in the ClientHello. Omitted when not set.
    #[arg(long)]
    pub sni: Option<String>,

    /// TCP connect timeout for the TLS probe in milliseconds.
    #[arg(long = "connect-timeout", default_value = "10000")]
    pub connect_timeout_ms: u64,

    /// TLS handshake timeout in milliseconds.
    #[arg(long = "handshake-timeout", default_value = "10000")]
    pub handshake_timeout_ms: u64,

    /// Skip the traceroute phase.
    #[arg(long = "skip-trace")]
    pub skip_trace: bool,

    /// Skip the TLS probe phase.
    #[arg(long = "skip-tls")]
    pub skip_tls: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    fn to_config(&self) -> Result<ProbeConfig, String> {
        let protocol: Protocol = self
            .proto
            .parse()
            .map_err(|e| format!("Invalid protocol: {}", e))?;

        let offer = if self.ciphers.is_empty() {
            CipherOffer::default_catalog()
        } else {
            CipherOffer::new(self.ciphers.clone())
                .map_err(|e| format!("Invalid cipher offer: {}", e))?
        };

        if self.upstreams.is_empty() {
            return Err("At least one --upstream is required".to_string());
        }

        Ok(ProbeConfig {
            target: self.target.clone(),
            protocol,
            port: self.port,
            max_hops: self.max_hops,
            tries: self.tries,
            hop_timeout: Duration::from_millis(self.hop_timeout_ms),
            upstreams: self.upstreams.clone(),
            dns_timeout: Duration::from_millis(self.dns_timeout_ms),
            tls_port: self.tls_port,
            offer,
            sni: self.sni.clone(),
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            handshake_timeout: Duration::from_millis(self.handshake_timeout_ms),
            skip_trace: self.skip_trace,
            skip_tls: self.skip_tls,
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.verbose {
        tracing_subscriber::fmt().with_env_filter("debug").init();
    } else {
        tracing_subscriber::fmt().with_env_filter("info").init();
    }

    let config = match args.to_config() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        target = %config.target,
        protocol = %config.protocol,
        "Starting probe run"
    );

    match runner::run_probe(config).await {
        Ok(report) => match report.to_json() {
            Ok(json) => {
                println!("{}", json);
                ExitCode::SUCCESS
            }
            Err(e) => {
                eprintln!("Failed to serialize report: {}", e);
                ExitCode::FAILURE
            }
        },
        Err(e) => {
            eprintln!("Probe failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_config_defaults() {
        let args = Args::parse_from(["netprobe", "example.org"]);
        let config = args.to_config().unwrap();
        assert_eq!(config.protocol, Protocol::Icmp);
        assert_eq!(config.max_hops, 30);
        assert_eq!(config.tls_port, 443);
        assert_eq!(config.upstreams, vec!["8.8.8.8:53".parse().unwrap()]);
        assert_eq!(config.offer, CipherOffer::default_catalog());
        assert!(config.sni.is_none());
    }

    #[test]
    fn test_to_config_rejects_unknown_protocol() {
        let args = Args::parse_from(["netprobe", "example.org", "--proto", "sctp"]);
        assert!(args.to_config().is_err());
    }

    #[test]
    fn test_custom_cipher_offer_preserves_order() {
        let args = Args::parse_from([
            "netprobe",
            "example.org",
            "--cipher",
            "AES256-SHA",
            "--cipher",
            "AES128-SHA",
        ]);
        let config = args.to_config().unwrap();
        assert_eq!(config.offer.names(), ["AES256-SHA", "AES128-SHA"]);
    }
}
