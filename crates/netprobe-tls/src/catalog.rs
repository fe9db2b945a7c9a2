//! Cipher suite offers.
//!
//! The offer sent in the ClientHello is the measurement instrument: its
//! contents and ordering are controlled exactly, so what the server picks
//! (or refuses) is attributable to the server and the path, not to client
//! defaults.

use netprobe_core::ProbeError;

/// Default offer: a browser-typical list of legacy suites in preference
/// order, useful for probing what old-TLS capability a server retains.
pub const DEFAULT_CATALOG: &[&str] = &[
    "ECDHE-ECDSA-AES256-SHA",
    "ECDHE-RSA-AES256-SHA",
    "DHE-RSA-CAMELLIA256-SHA",
    "DHE-DSS-CAMELLIA256-SHA",
    "DHE-RSA-AES256-SHA",
    "DHE-DSS-AES256-SHA",
    "ECDH-ECDSA-AES256-CBC-SHA",
    "ECDH-RSA-AES256-CBC-SHA",
    "CAMELLIA256-SHA",
    "AES256-SHA",
    "ECDHE-ECDSA-RC4-SHA",
    "ECDHE-ECDSA-AES128-SHA",
    "ECDHE-RSA-RC4-SHA",
    "ECDHE-RSA-AES128-SHA",
    "DHE-RSA-CAMELLIA128-SHA",
    "DHE-DSS-CAMELLIA128-SHA",
];

/// An ordered, non-empty cipher suite offer.
///
/// Order is preserved exactly as given: it becomes the client preference
/// order on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CipherOffer {
    names: Vec<String>,
}

impl CipherOffer {
    /// Creates an offer from suite names in preference order.
    pub fn new(names: Vec<String>) -> Result<Self, ProbeError> {
        if names.is_empty() {
            return Err(ProbeError::EmptyCipherOffer);
        }
        Ok(Self { names })
    }

    /// The default legacy-suite offer.
    pub fn default_catalog() -> Self {
        Self {
            names: DEFAULT_CATALOG.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Suite names in preference order.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Whether `suite` is part of the offer.
    pub fn contains(&self, suite: &str) -> bool {
        self.names.iter().any(|name| name == suite)
    }

    /// TLS 1.3 suite names in the offer (IANA-style, prefixed `TLS_`).
    pub fn tls13_names(&self) -> Vec<&str> {
        self.names
            .iter()
            .filter(|name| name.starts_with("TLS_"))
            .map(String::as_str)
            .collect()
    }

    /// Pre-1.3 suite names in the offer (OpenSSL-style).
    pub fn legacy_names(&self) -> Vec<&str> {
        self.names
            .iter()
            .filter(|name| !name.starts_with("TLS_"))
            .map(String::as_str)
            .collect()
    }
}

/// Joins suite names into an OpenSSL colon-separated list.
pub fn openssl_list(names: &[&str]) -> String {
    names.join(":")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_catalog_is_ordered_and_nonempty() {
        let offer = CipherOffer::default_catalog();
        assert_eq!(offer.names().len(), 16);
        assert_eq!(offer.names()[0], "ECDHE-ECDSA-AES256-SHA");
        assert_eq!(offer.names()[15], "DHE-DSS-CAMELLIA128-SHA");
    }

    #[test]
    fn test_empty_offer_rejected() {
        let err = CipherOffer::new(Vec::new()).unwrap_err();
        assert!(matches!(err, ProbeError::EmptyCipherOffer));
    }

    #[test]
    fn test_openssl_list_preserves_order() {
        let offer =
            CipherOffer::new(vec!["AES256-SHA".to_string(), "AES128-SHA".to_string()]).unwrap();
        assert_eq!(openssl_list(&offer.legacy_names()), "AES256-SHA:AES128-SHA");
    }

    #[test]
    fn test_offer_splits_by_protocol_generation() {
        let offer = CipherOffer::new(vec![
            "TLS_AES_128_GCM_SHA256".to_string(),
            "ECDHE-RSA-AES128-SHA".to_string(),
            "TLS_CHACHA20_POLY1305_SHA256".to_string(),
        ])
        .unwrap();
        assert_eq!(
            offer.tls13_names(),
            vec!["TLS_AES_128_GCM_SHA256", "TLS_CHACHA20_POLY1305_SHA256"]
        );
        assert_eq!(offer.legacy_names(), vec!["ECDHE-RSA-AES128-SHA"]);
    }

    #[test]
    fn test_contains() {
        let offer = CipherOffer::default_catalog();
        assert!(offer.contains("AES256-SHA"));
        assert!(!offer.contains("TLS_AES_256_GCM_SHA384"));
    }
}
