//! Fingerprint Module
//!
//! Derives canonical cache keys from an endpoint and its query parameters.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

// == Fingerprint Builder ==
/// Builds a stable key that identifies both cache entries and in-flight calls.
///
/// Parameters are sorted by name before hashing, so any iteration order of the
/// same parameter set yields the same fingerprint.
#[derive(Debug, Clone, Default)]
pub struct FingerprintBuilder {
    endpoint: String,
    params: BTreeMap<String, String>,
}

impl FingerprintBuilder {
    /// Starts a fingerprint for the given endpoint.
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            params: BTreeMap::new(),
        }
    }

    /// Adds a query parameter. A repeated name keeps the last value.
    pub fn param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Adds every parameter from an iterator of pairs.
    pub fn params<I, K, V>(mut self, params: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (k, v) in params {
            self.params.insert(k.into(), v.into());
        }
        self
    }

    /// Canonical `endpoint?k=v&k=v` form, before hashing.
    ///
    /// Names and values are percent-encoded so a value holding `&` or `=`
    /// cannot pass for extra parameters.
    pub fn canonical(&self) -> String {
        let query = self
            .params
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.endpoint.trim_matches('/'), query)
    }

    /// Hashes the canonical form into a fixed-length hex key.
    pub fn build(&self) -> String {
        digest_hex(self.canonical().as_bytes())
    }
}

// == Convenience ==
/// Fingerprint of an endpoint and a parameter map.
pub fn fingerprint<'a, I>(endpoint: &str, params: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    FingerprintBuilder::new(endpoint)
        .params(params.into_iter().map(|(k, v)| (k.clone(), v.clone())))
        .build()
}

/// Lowercase hex SHA-256 of arbitrary bytes.
pub fn digest_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_parameter_order_does_not_matter() {
        let a = FingerprintBuilder::new("fixtures")
            .param("date", "2025-01-05")
            .param("league", "39")
            .build();
        let b = FingerprintBuilder::new("fixtures")
            .param("league", "39")
            .param("date", "2025-01-05")
            .build();
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_values_differ() {
        let a = FingerprintBuilder::new("fixtures").param("league", "39").build();
        let b = FingerprintBuilder::new("fixtures").param("league", "140").build();
        assert_ne!(a, b);
    }

    #[test]
    fn test_endpoint_is_part_of_key() {
        let a = FingerprintBuilder::new("fixtures").param("id", "1").build();
        let b = FingerprintBuilder::new("teams").param("id", "1").build();
        assert_ne!(a, b);
    }

    #[test]
    fn test_fixed_length_hex() {
        let key = FingerprintBuilder::new("x".repeat(4096)).build();
        assert_eq!(key.len(), 64);
        assert!(key.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_canonical_form() {
        let builder = FingerprintBuilder::new("/fixtures/")
            .param("season", "2024")
            .param("league", "39");
        assert_eq!(builder.canonical(), "fixtures?league=39&season=2024");
    }

    #[test]
    fn test_embedded_separators_do_not_collide() {
        let smuggled = FingerprintBuilder::new("fixtures").param("league", "39&season=2024");
        let split = FingerprintBuilder::new("fixtures")
            .param("league", "39")
            .param("season", "2024");

        assert_eq!(smuggled.canonical(), "fixtures?league=39%26season%3D2024");
        assert_ne!(smuggled.build(), split.build());

        let in_name = FingerprintBuilder::new("fixtures").param("a=b", "c").build();
        let in_value = FingerprintBuilder::new("fixtures").param("a", "b=c").build();
        assert_ne!(in_name, in_value);
    }

    #[test]
    fn test_map_helper_matches_builder() {
        let mut params = HashMap::new();
        params.insert("league".to_string(), "39".to_string());
        params.insert("date".to_string(), "2025-01-05".to_string());

        let from_map = fingerprint("fixtures", &params);
        let from_builder = FingerprintBuilder::new("fixtures")
            .param("date", "2025-01-05")
            .param("league", "39")
            .build();
        assert_eq!(from_map, from_builder);
    }
}
