//! DNS forwarding and proxying.
//!
//! Two entry points share the same upstream discipline (fixed list, strict
//! order, per-upstream timeout): [`DnsForwarder`] answers in-process
//! resolution requests, and [`DnsProxy`] relays raw client queries verbatim,
//! preserving their transaction IDs.

pub mod forwarder;
pub mod observer;
pub mod proxy;

pub use forwarder::DnsForwarder;
pub use observer::{LogObserver, NullObserver, QueryEvent, QueryObserver, QueryOutcome};
pub use proxy::{DnsProxy, ProxyConfig};

pub use hickory_proto::rr::RecordType;
