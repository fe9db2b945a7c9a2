#![cfg(target_os = "linux")]

//! Live probe tests. These need CAP_NET_RAW and real network access, so they
//! are ignored by default; run with `cargo test -- --ignored` as root and set
//! NETPROBE_TEST_TARGET to override the default target.

use netprobe_core::{trace, HopProber, Protocol, TraceParams};
use std::net::IpAddr;
use std::time::Duration;

fn test_target() -> IpAddr {
    std::env::var("NETPROBE_TEST_TARGET")
        .ok()
        .and_then(|val| val.parse().ok())
        .unwrap_or_else(|| IpAddr::from([8, 8, 8, 8]))
}

async fn run_trace(protocol: Protocol, port: Option<u16>) {
    let target = test_target();
    let mut prober = netprobe_trace::new_prober(protocol, target, port).expect("open prober");

    let params = TraceParams {
        max_hops: 16,
        max_tries_per_hop: 2,
        hop_timeout: Duration::from_secs(2),
        ..TraceParams::default()
    };

    let result = trace(&mut prober, &params).await.expect("trace");
    prober.close().await.expect("close prober");

    assert!(!result.hops.is_empty());
    assert!(result.ttls_contiguous());
    assert!(
        result.reached(),
        "target {} not reached within 16 hops",
        target
    );
}

#[tokio::test]
#[ignore]
async fn icmp_trace_reaches_target() {
    run_trace(Protocol::Icmp, None).await;
}

#[tokio::test]
#[ignore]
async fn udp_trace_reaches_target() {
    run_trace(Protocol::Udp, None).await;
}

#[tokio::test]
#[ignore]
async fn tcp_trace_reaches_target() {
    run_trace(Protocol::Tcp, Some(443)).await;
}
