//! Transparent DNS proxy.
//!
//! Relays client queries to the configured upstreams byte-for-byte and relays
//! replies back under the client's transaction ID. The proxy never rewrites
//! queries; the only synthesized message is a SERVFAIL when every upstream
//! fails. An optional positive cache, off by default, short-circuits repeat
//! queries while honoring the answer's minimum TTL.

use crate::observer::{NullObserver, QueryEvent, QueryObserver, QueryOutcome};
use hickory_proto::op::{Message, OpCode, ResponseCode};
use hickory_proto::rr::{RData, RecordType};
use netprobe_core::ProbeError;
use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

const MAX_DNS_MESSAGE: usize = 4096;
const DNS_HEADER_LEN: usize = 12;

/// Proxy configuration.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Upstream resolvers, tried strictly in order.
    pub upstreams: Vec<SocketAddr>,
    /// Per-upstream reply timeout.
    pub upstream_timeout: Duration,
    /// Enables the positive answer cache.
    pub cache_enabled: bool,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstreams: Vec::new(),
            upstream_timeout: Duration::from_secs(3),
            cache_enabled: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    name: String,
    record_type: RecordType,
}

struct CacheEntry {
    response: Vec<u8>,
    expires: Instant,
}

type Cache = Arc<Mutex<HashMap<CacheKey, CacheEntry>>>;

/// UDP proxy relaying DNS queries verbatim.
pub struct DnsProxy {
    socket: Arc<UdpSocket>,
    upstreams: Arc<Vec<SocketAddr>>,
    upstream_timeout: Duration,
    cache: Option<Cache>,
    observer: Arc<dyn QueryObserver>,
}

impl DnsProxy {
    /// Binds the proxy to `addr`.
    pub async fn bind(addr: SocketAddr, config: ProxyConfig) -> Result<Self, ProbeError> {
        if config.upstreams.is_empty() {
            return Err(ProbeError::EmptyUpstreams);
        }
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|source| ProbeError::SocketBind { addr, source })?;
        Ok(Self {
            socket: Arc::new(socket),
            upstreams: Arc::new(config.upstreams),
            upstream_timeout: config.upstream_timeout,
            cache: config
                .cache_enabled
                .then(|| Arc::new(Mutex::new(HashMap::new()))),
            observer: Arc::new(NullObserver),
        })
    }

    /// Replaces the observer notified of every upstream exchange.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Address the proxy is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr, ProbeError> {
        self.socket.local_addr().map_err(ProbeError::SocketCreation)
    }

    /// Serves queries until the socket fails.
    pub async fn run(self) -> Result<(), ProbeError> {
        let mut buf = [0u8; MAX_DNS_MESSAGE];
        loop {
            let (n, client) = self
                .socket
                .recv_from(&mut buf)
                .await
                .map_err(ProbeError::from)?;
            if n < DNS_HEADER_LEN {
                trace!(client = %client, len = n, "Dropping short datagram");
                continue;
            }

            let query = buf[..n].to_vec();
            let socket = Arc::clone(&self.socket);
            let upstreams = Arc::clone(&self.upstreams);
            let cache = self.cache.clone();
            let observer = Arc::clone(&self.observer);
            let timeout = self.upstream_timeout;
            tokio::spawn(async move {
                handle_query(socket, upstreams, timeout, cache, observer, query, client).await;
            });
        }
    }
}

async fn handle_query(
    socket: Arc<UdpSocket>,
    upstreams: Arc<Vec<SocketAddr>>,
    upstream_timeout: Duration,
    cache: Option<Cache>,
    observer: Arc<dyn QueryObserver>,
    query: Vec<u8>,
    client: SocketAddr,
) {
    let client_id = u16::from_be_bytes([query[0], query[1]]);
    let question = question_for(&query);

    if let (Some(cache), Some(key)) = (&cache, &question) {
        if let Some(mut response) = cache_lookup(cache, key) {
            trace!(client = %client, name = %key.name, "Answering from cache");
            response[0..2].copy_from_slice(&client_id.to_be_bytes());
            let _ = socket.send_to(&response, client).await;
            return;
        }
    }

    for &upstream in upstreams.iter() {
        let start = Instant::now();
        let attempt = forward_once(&query, upstream, upstream_timeout, client_id).await;
        let latency = start.elapsed();

        if let Some(key) = &question {
            let outcome = match &attempt {
                Ok(Some(response)) => classify_response(response),
                Ok(None) => QueryOutcome::Timeout,
                Err(_) => QueryOutcome::Malformed,
            };
            observer.on_query(&QueryEvent {
                name: key.name.clone(),
                record_type: key.record_type,
                upstream,
                outcome,
                latency,
            });
        }

        match attempt {
            Ok(Some(response)) => {
                debug!(client = %client, upstream = %upstream, "Relaying upstream reply");
                if let (Some(cache), Some(key)) = (&cache, &question) {
                    cache_store(cache, key.clone(), &response);
                }
                let _ = socket.send_to(&response, client).await;
                return;
            }
            Ok(None) => {
                debug!(client = %client, upstream = %upstream, "Upstream timed out");
            }
            Err(e) => {
                warn!(client = %client, upstream = %upstream, error = %e, "Upstream exchange failed");
            }
        }
    }

    // All upstreams failed: the client still deserves an answer.
    if let Some(servfail) = synthesize_servfail(client_id, &query) {
        let _ = socket.send_to(&servfail, client).await;
    }
}

/// Forwards the query bytes to one upstream and returns the raw reply.
/// `Ok(None)` means the upstream did not answer in time.
async fn forward_once(
    query: &[u8],
    upstream: SocketAddr,
    upstream_timeout: Duration,
    client_id: u16,
) -> Result<Option<Vec<u8>>, ProbeError> {
    let socket = if upstream.is_ipv4() {
        UdpSocket::bind("0.0.0.0:0").await
    } else {
        UdpSocket::bind("[::]:0").await
    }
    .map_err(ProbeError::SocketCreation)?;
    socket
        .connect(upstream)
        .await
        .map_err(|source| ProbeError::SocketBind {
            addr: upstream,
            source,
        })?;
    socket.send(query).await.map_err(ProbeError::WriteFailed)?;

    let deadline = Instant::now() + upstream_timeout;
    let mut buf = [0u8; MAX_DNS_MESSAGE];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }
        let n = match tokio::time::timeout(remaining, socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(ProbeError::from(e)),
            Err(_) => return Ok(None),
        };
        if n < DNS_HEADER_LEN {
            continue;
        }
        // The upstream echoes the client's transaction ID since the query
        // was relayed verbatim.
        if u16::from_be_bytes([buf[0], buf[1]]) != client_id {
            continue;
        }
        return Ok(Some(buf[..n].to_vec()));
    }
}

/// Extracts the question section, used both as the cache key and to label
/// observer events. `None` when the datagram carries no parseable question.
fn question_for(query: &[u8]) -> Option<CacheKey> {
    let message = Message::from_vec(query).ok()?;
    let q = message.queries().first()?;
    Some(CacheKey {
        name: q.name().to_lowercase().to_utf8(),
        record_type: q.query_type(),
    })
}

/// Classifies a raw upstream reply for the observer, mirroring the
/// forwarder's outcome taxonomy. The reply is relayed verbatim either way.
fn classify_response(response: &[u8]) -> QueryOutcome {
    let Ok(message) = Message::from_vec(response) else {
        return QueryOutcome::Malformed;
    };
    match message.response_code() {
        ResponseCode::NoError => {}
        ResponseCode::NXDomain => return QueryOutcome::NoAnswer,
        _ => return QueryOutcome::Malformed,
    }
    let addresses: Vec<IpAddr> = message
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            RData::A(a) => Some(IpAddr::V4(a.0)),
            RData::AAAA(aaaa) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect();
    if addresses.is_empty() {
        QueryOutcome::NoAnswer
    } else {
        QueryOutcome::Answered { addresses }
    }
}

fn cache_lookup(cache: &Cache, key: &CacheKey) -> Option<Vec<u8>> {
    let mut map = cache.lock().ok()?;
    match map.get(key) {
        Some(entry) if entry.expires > Instant::now() => Some(entry.response.clone()),
        Some(_) => {
            map.remove(key);
            None
        }
        None => None,
    }
}

/// Stores a positive answer for the minimum TTL among its records.
fn cache_store(cache: &Cache, key: CacheKey, response: &[u8]) {
    let Ok(message) = Message::from_vec(response) else {
        return;
    };
    if message.response_code() != ResponseCode::NoError || message.answers().is_empty() {
        return;
    }
    let Some(min_ttl) = message.answers().iter().map(|r| r.ttl()).min() else {
        return;
    };
    if min_ttl == 0 {
        return;
    }
    if let Ok(mut map) = cache.lock() {
        map.insert(
            key,
            CacheEntry {
                response: response.to_vec(),
                expires: Instant::now() + Duration::from_secs(u64::from(min_ttl)),
            },
        );
    }
}

/// Builds a SERVFAIL carrying the client's transaction ID and, when the
/// query parses, its question section.
fn synthesize_servfail(client_id: u16, query: &[u8]) -> Option<Vec<u8>> {
    let mut response = Message::error_msg(client_id, OpCode::Query, ResponseCode::ServFail);
    if let Ok(parsed) = Message::from_vec(query) {
        for q in parsed.queries() {
            response.add_query(q.clone());
        }
    }
    response.to_vec().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hickory_proto::op::MessageType;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_query(id: u16, name: &str) -> Vec<u8> {
        let mut message = Message::new();
        message
            .set_id(id)
            .set_message_type(MessageType::Query)
            .set_op_code(OpCode::Query)
            .set_recursion_desired(true)
            .add_query(hickory_proto::op::Query::query(
                Name::from_utf8(name).unwrap(),
                RecordType::A,
            ));
        message.to_vec().unwrap()
    }

    /// Mock upstream answering every A query with `address` and counting hits.
    async fn spawn_upstream(address: Ipv4Addr, hits: Arc<AtomicUsize>, ttl: u32) -> SocketAddr {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DNS_MESSAGE];
            loop {
                let Ok((n, peer)) = socket.recv_from(&mut buf).await else {
                    return;
                };
                hits.fetch_add(1, Ordering::SeqCst);
                let query = Message::from_vec(&buf[..n]).unwrap();
                let mut response = Message::new();
                response
                    .set_id(query.id())
                    .set_message_type(MessageType::Response)
                    .set_op_code(OpCode::Query)
                    .set_recursion_available(true);
                for q in query.queries() {
                    response.add_query(q.clone());
                    response.add_answer(Record::from_rdata(
                        q.name().clone(),
                        ttl,
                        RData::A(A(address)),
                    ));
                }
                let _ = socket.send_to(&response.to_vec().unwrap(), peer).await;
            }
        });
        addr
    }

    async fn spawn_proxy(config: ProxyConfig) -> SocketAddr {
        spawn_proxy_with_observer(config, Arc::new(NullObserver)).await
    }

    async fn spawn_proxy_with_observer(
        config: ProxyConfig,
        observer: Arc<dyn QueryObserver>,
    ) -> SocketAddr {
        let proxy = DnsProxy::bind("127.0.0.1:0".parse().unwrap(), config)
            .await
            .unwrap()
            .with_observer(observer);
        let addr = proxy.local_addr().unwrap();
        tokio::spawn(proxy.run());
        addr
    }

    /// Observer that records every event for assertions.
    struct CollectingObserver {
        events: Mutex<Vec<QueryEvent>>,
    }

    impl CollectingObserver {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
            })
        }

        fn events(&self) -> Vec<QueryEvent> {
            self.events.lock().unwrap().clone()
        }
    }

    impl QueryObserver for CollectingObserver {
        fn on_query(&self, event: &QueryEvent) {
            self.events.lock().unwrap().push(event.clone());
        }
    }

    async fn query_proxy(proxy: SocketAddr, query: &[u8]) -> Vec<u8> {
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(query, proxy).await.unwrap();
        let mut buf = [0u8; MAX_DNS_MESSAGE];
        let n = tokio::time::timeout(Duration::from_secs(5), client.recv(&mut buf))
            .await
            .expect("proxy reply")
            .unwrap();
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn test_transaction_id_preserved() {
        let hits = Arc::new(AtomicUsize::new(0));
        let upstream = spawn_upstream(Ipv4Addr::new(192, 0, 2, 1), hits, 60).await;
        let proxy = spawn_proxy(ProxyConfig {
            upstreams: vec![upstream],
            ..ProxyConfig::default()
        })
        .await;

        let query = make_query(0xBEEF, "relay.test.");
        let reply = query_proxy(proxy, &query).await;

        assert_eq!(u16::from_be_bytes([reply[0], reply[1]]), 0xBEEF);
        let message = Message::from_vec(&reply).unwrap();
        let addresses: Vec<IpAddr> = message
            .answers()
            .iter()
            .filter_map(|r| match r.data() {
                RData::A(a) => Some(IpAddr::V4(a.0)),
                _ => None,
            })
            .collect();
        assert_eq!(addresses, vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 1))]);
    }

    #[tokio::test]
    async fn test_upstreams_tried_in_order() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DNS_MESSAGE];
            loop {
                if silent.recv_from(&mut buf).await.is_err() {
                    return;
                }
            }
        });

        let hits = Arc::new(AtomicUsize::new(0));
        let answering = spawn_upstream(Ipv4Addr::new(192, 0, 2, 2), hits, 60).await;
        let proxy = spawn_proxy(ProxyConfig {
            upstreams: vec![silent_addr, answering],
            upstream_timeout: Duration::from_millis(200),
            ..ProxyConfig::default()
        })
        .await;

        let reply = query_proxy(proxy, &make_query(7, "order.test.")).await;
        let message = Message::from_vec(&reply).unwrap();
        assert_eq!(message.response_code(), ResponseCode::NoError);
        assert_eq!(message.answers().len(), 1);
    }

    #[tokio::test]
    async fn test_servfail_when_all_upstreams_fail() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DNS_MESSAGE];
            loop {
                if silent.recv_from(&mut buf).await.is_err() {
                    return;
                }
            }
        });

        let proxy = spawn_proxy(ProxyConfig {
            upstreams: vec![silent_addr],
            upstream_timeout: Duration::from_millis(100),
            ..ProxyConfig::default()
        })
        .await;

        let reply = query_proxy(proxy, &make_query(0x1234, "dead.test.")).await;
        assert_eq!(u16::from_be_bytes([reply[0], reply[1]]), 0x1234);
        let message = Message::from_vec(&reply).unwrap();
        assert_eq!(message.response_code(), ResponseCode::ServFail);
    }

    #[tokio::test]
    async fn test_observer_sees_every_upstream_attempt() {
        let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let silent_addr = silent.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; MAX_DNS_MESSAGE];
            loop {
                if silent.recv_from(&mut buf).await.is_err() {
                    return;
                }
            }
        });

        let hits = Arc::new(AtomicUsize::new(0));
        let answering = spawn_upstream(Ipv4Addr::new(192, 0, 2, 9), hits, 60).await;
        let observer = CollectingObserver::new();
        let proxy = spawn_proxy_with_observer(
            ProxyConfig {
                upstreams: vec![silent_addr, answering],
                upstream_timeout: Duration::from_millis(200),
                ..ProxyConfig::default()
            },
            observer.clone(),
        )
        .await;

        query_proxy(proxy, &make_query(11, "observed.test.")).await;

        let events = observer.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].upstream, silent_addr);
        assert_eq!(events[0].outcome, QueryOutcome::Timeout);
        assert_eq!(events[0].name, "observed.test.");
        assert_eq!(events[0].record_type, RecordType::A);
        assert_eq!(events[1].upstream, answering);
        assert_eq!(
            events[1].outcome,
            QueryOutcome::Answered {
                addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 9))]
            }
        );
    }

    #[tokio::test]
    async fn test_cache_short_circuits_repeat_queries() {
        let hits = Arc::new(AtomicUsize::new(0));
        let upstream = spawn_upstream(Ipv4Addr::new(192, 0, 2, 3), hits.clone(), 300).await;
        let proxy = spawn_proxy(ProxyConfig {
            upstreams: vec![upstream],
            cache_enabled: true,
            ..ProxyConfig::default()
        })
        .await;

        let first = query_proxy(proxy, &make_query(1, "cached.test.")).await;
        let second = query_proxy(proxy, &make_query(2, "cached.test.")).await;

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        // Each client gets its own transaction ID back.
        assert_eq!(u16::from_be_bytes([first[0], first[1]]), 1);
        assert_eq!(u16::from_be_bytes([second[0], second[1]]), 2);
        // Beyond the ID, the cached response is identical.
        assert_eq!(first[2..], second[2..]);
    }

    #[tokio::test]
    async fn test_cache_disabled_by_default() {
        let hits = Arc::new(AtomicUsize::new(0));
        let upstream = spawn_upstream(Ipv4Addr::new(192, 0, 2, 4), hits.clone(), 300).await;
        let proxy = spawn_proxy(ProxyConfig {
            upstreams: vec![upstream],
            ..ProxyConfig::default()
        })
        .await;

        query_proxy(proxy, &make_query(1, "uncached.test.")).await;
        query_proxy(proxy, &make_query(2, "uncached.test.")).await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_upstreams_rejected() {
        let Err(err) = DnsProxy::bind("127.0.0.1:0".parse().unwrap(), ProxyConfig::default()).await
        else {
            panic!("empty upstream list must be rejected");
        };
        assert!(matches!(err, ProbeError::EmptyUpstreams));
    }
}
