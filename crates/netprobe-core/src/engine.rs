//! Traceroute engine.
//!
//! Drives a [`HopProber`] across increasing TTLs, retrying each hop on
//! timeout, and assembles the ordered hop list.

use crate::{HopOutcome, HopProber, HopReply, HopResult, ProbeError, TraceResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace as trace_event};

/// Parameters for one trace.
#[derive(Debug, Clone)]
pub struct TraceParams {
    /// Highest TTL to probe.
    pub max_hops: u8,
    /// Probe attempts per TTL before giving up on that hop.
    pub max_tries_per_hop: u8,
    /// Timeout for each probe attempt.
    pub hop_timeout: Duration,
    /// Minimum delay between consecutive probes.
    pub probe_delay: Duration,
}

impl Default for TraceParams {
    fn default() -> Self {
        Self {
            max_hops: 30,
            max_tries_per_hop: 3,
            hop_timeout: Duration::from_millis(3000),
            probe_delay: Duration::from_millis(50),
        }
    }
}

impl TraceParams {
    /// Validates the parameters, failing fast on programmer errors.
    pub fn validate(&self) -> Result<(), ProbeError> {
        if self.max_hops == 0 {
            return Err(ProbeError::InvalidMaxHops(self.max_hops));
        }
        if self.max_tries_per_hop == 0 {
            return Err(ProbeError::InvalidTriesPerHop(self.max_tries_per_hop));
        }
        Ok(())
    }
}

/// Runs a trace to completion.
///
/// Equivalent to [`trace_with_cancel`] with a flag that is never raised.
pub async fn trace<P: HopProber + ?Sized>(
    prober: &mut P,
    params: &TraceParams,
) -> Result<TraceResult, ProbeError> {
    let never = AtomicBool::new(false);
    trace_with_cancel(prober, params, &never).await
}

/// Runs a trace, checking `cancel` between hops.
///
/// TTL starts at 1 and advances until the target answers or `max_hops` is
/// exhausted. A hop whose attempts all time out is recorded as data and the
/// trace moves on: intermediate routers may silently drop probes while the
/// path stays usable further out. The engine always terminates.
pub async fn trace_with_cancel<P: HopProber + ?Sized>(
    prober: &mut P,
    params: &TraceParams,
    cancel: &AtomicBool,
) -> Result<TraceResult, ProbeError> {
    params.validate()?;

    let target = prober.target();
    let protocol = prober.protocol();
    let mut hops = Vec::with_capacity(params.max_hops as usize);

    'hops: for ttl in 1..=params.max_hops {
        if cancel.load(Ordering::Relaxed) {
            debug!(ttl = ttl, "Trace cancelled between hops");
            return Err(ProbeError::Cancelled);
        }

        let mut last_miss = HopOutcome::Timeout;
        let mut last_from = None;
        let mut last_rtt = None;

        for attempt in 1..=params.max_tries_per_hop {
            let send_time = tokio::time::Instant::now();

            trace_event!(ttl = ttl, attempt = attempt, "Sending probe");
            let reply = prober.probe(ttl, params.hop_timeout).await?;

            match reply {
                HopReply::Responded { from, rtt } => {
                    debug!(
                        ttl = ttl,
                        ip = %from,
                        rtt_ms = rtt.as_secs_f64() * 1000.0,
                        "Intermediate hop responded"
                    );
                    hops.push(HopResult {
                        ttl,
                        responder: Some(from),
                        rtt: Some(rtt),
                        attempts: attempt,
                        outcome: HopOutcome::Responded,
                    });
                    pace(send_time, params.probe_delay).await;
                    continue 'hops;
                }
                HopReply::Reached { from, rtt } => {
                    debug!(
                        ttl = ttl,
                        ip = %from,
                        rtt_ms = rtt.as_secs_f64() * 1000.0,
                        "Reached target, stopping"
                    );
                    hops.push(HopResult {
                        ttl,
                        responder: Some(from),
                        rtt: Some(rtt),
                        attempts: attempt,
                        outcome: HopOutcome::Reached,
                    });
                    break 'hops;
                }
                HopReply::Unreachable { from, rtt } => {
                    debug!(ttl = ttl, "Unreachable signal");
                    last_miss = HopOutcome::Unreachable;
                    last_from = from;
                    last_rtt = rtt;
                }
                HopReply::Timeout => {
                    trace_event!(ttl = ttl, attempt = attempt, "Probe timed out");
                    last_miss = HopOutcome::Timeout;
                }
            }

            pace(send_time, params.probe_delay).await;
        }

        // All tries exhausted for this TTL; record the miss and advance.
        hops.push(HopResult {
            ttl,
            responder: last_from,
            rtt: last_rtt,
            attempts: params.max_tries_per_hop,
            outcome: last_miss,
        });
    }

    Ok(TraceResult {
        target,
        protocol,
        hops,
    })
}

/// Sleeps out the remainder of the per-probe pacing delay.
async fn pace(send_time: tokio::time::Instant, delay: Duration) {
    let elapsed = send_time.elapsed();
    if elapsed < delay {
        tokio::time::sleep(delay - elapsed).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Protocol;
    use async_trait::async_trait;
    use std::net::IpAddr;

    /// Prober that replays a script of replies, one per probe call.
    struct ScriptedProber {
        replies: Vec<HopReply>,
        calls: usize,
        closed: bool,
    }

    impl ScriptedProber {
        fn new(replies: Vec<HopReply>) -> Self {
            Self {
                replies,
                calls: 0,
                closed: false,
            }
        }
    }

    const SCRIPTED_TARGET: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(203, 0, 113, 1));

    #[async_trait]
    impl HopProber for ScriptedProber {
        fn protocol(&self) -> Protocol {
            Protocol::Udp
        }

        fn target(&self) -> IpAddr {
            SCRIPTED_TARGET
        }

        async fn probe(&mut self, _ttl: u8, _timeout: Duration) -> Result<HopReply, ProbeError> {
            let reply = self
                .replies
                .get(self.calls)
                .copied()
                .unwrap_or(HopReply::Timeout);
            self.calls += 1;
            Ok(reply)
        }

        async fn close(&mut self) -> Result<(), ProbeError> {
            self.closed = true;
            Ok(())
        }
    }

    fn responded(last_octet: u8) -> HopReply {
        HopReply::Responded {
            from: IpAddr::from([10, 0, 0, last_octet]),
            rtt: Duration::from_millis(5),
        }
    }

    fn reached() -> HopReply {
        HopReply::Reached {
            from: SCRIPTED_TARGET,
            rtt: Duration::from_millis(20),
        }
    }

    fn fast_params(max_hops: u8, tries: u8) -> TraceParams {
        TraceParams {
            max_hops,
            max_tries_per_hop: tries,
            hop_timeout: Duration::from_millis(200),
            probe_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn reaches_target_in_three_hops() {
        let mut prober = ScriptedProber::new(vec![responded(1), responded(2), reached()]);
        let result = trace(&mut prober, &fast_params(5, 1)).await.unwrap();

        assert_eq!(result.hops.len(), 3);
        assert!(result.ttls_contiguous());
        assert!(result.reached());
        assert_eq!(result.target, SCRIPTED_TARGET);
        assert_eq!(result.hops[2].outcome, HopOutcome::Reached);
    }

    #[tokio::test]
    async fn black_holed_target_exhausts_max_hops() {
        let mut prober = ScriptedProber::new(vec![]);
        let result = trace(&mut prober, &fast_params(4, 2)).await.unwrap();

        assert_eq!(result.hops.len(), 4);
        assert!(result.ttls_contiguous());
        assert!(!result.reached());
        // Even with no reply at all, the result names the probed address.
        assert_eq!(result.target, SCRIPTED_TARGET);
        for hop in &result.hops {
            assert_eq!(hop.outcome, HopOutcome::Timeout);
            assert_eq!(hop.attempts, 2);
            assert!(hop.responder.is_none());
        }
        // 4 hops x 2 tries, every one consumed
        assert_eq!(prober.calls, 8);
    }

    #[tokio::test]
    async fn retries_then_advances_past_silent_hop() {
        // TTL 1 answers, TTL 2 drops everything, TTL 3 is the target.
        let mut prober = ScriptedProber::new(vec![
            responded(1),
            HopReply::Timeout,
            HopReply::Timeout,
            HopReply::Timeout,
            reached(),
        ]);
        let result = trace(&mut prober, &fast_params(5, 3)).await.unwrap();

        assert_eq!(result.hops.len(), 3);
        assert_eq!(result.hops[1].outcome, HopOutcome::Timeout);
        assert_eq!(result.hops[1].attempts, 3);
        assert!(result.reached());
    }

    #[tokio::test]
    async fn unreachable_is_recorded_not_fatal() {
        let mut prober = ScriptedProber::new(vec![
            HopReply::Unreachable {
                from: Some(IpAddr::from([10, 0, 0, 9])),
                rtt: Some(Duration::from_millis(3)),
            },
            reached(),
        ]);
        let result = trace(&mut prober, &fast_params(3, 1)).await.unwrap();

        assert_eq!(result.hops.len(), 2);
        assert_eq!(result.hops[0].outcome, HopOutcome::Unreachable);
        assert_eq!(result.hops[0].responder, Some(IpAddr::from([10, 0, 0, 9])));
        assert!(result.reached());
    }

    #[tokio::test]
    async fn zero_max_hops_is_a_precondition_failure() {
        let mut prober = ScriptedProber::new(vec![]);
        let err = trace(&mut prober, &fast_params(0, 1)).await.unwrap_err();
        assert!(matches!(err, ProbeError::InvalidMaxHops(0)));

        let err = trace(&mut prober, &fast_params(3, 0)).await.unwrap_err();
        assert!(matches!(err, ProbeError::InvalidTriesPerHop(0)));
    }

    #[tokio::test]
    async fn cancellation_is_honored_between_hops() {
        let mut prober = ScriptedProber::new(vec![responded(1)]);
        let cancel = AtomicBool::new(true);
        let err = trace_with_cancel(&mut prober, &fast_params(5, 1), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Cancelled));
        // Cancelled before the first probe went out.
        assert_eq!(prober.calls, 0);
    }
}
