//! Request DTOs for the relay API
//!
//! Defines the structure of incoming query strings and request bodies.

use std::collections::HashMap;

use serde::Deserialize;

use crate::cache::{Params, TtlPolicy};
use crate::fetch::BatchRequest;

/// Query key that forces a refetch (`_refresh=true`)
pub const REFRESH_KEY: &str = "_refresh";
/// Query key carrying an explicit TTL policy (`_ttl=short`, `_ttl=custom:90`)
pub const TTL_KEY: &str = "_ttl";

/// Upstream parameters plus the relay's reserved controls, split out of a
/// query string.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelayQuery {
    pub params: Params,
    pub force_refresh: bool,
    pub ttl: Option<TtlPolicy>,
}

impl RelayQuery {
    /// Splits reserved keys from the upstream parameters.
    ///
    /// Returns an error message for an unparsable `_ttl`.
    pub fn parse(query: HashMap<String, String>) -> Result<Self, String> {
        let mut relay = RelayQuery::default();
        for (key, value) in query {
            match key.as_str() {
                REFRESH_KEY => relay.force_refresh = matches!(value.as_str(), "true" | "1" | ""),
                TTL_KEY => relay.ttl = Some(value.parse()?),
                _ => {
                    relay.params.insert(key, value);
                }
            }
        }
        Ok(relay)
    }
}

/// Request body for POST /batch
///
/// # Fields
/// - `endpoint`: upstream endpoint shared by every partition
/// - `params`: parameters shared by every partition
/// - `partition_key`: parameter varied per partition (e.g. `league`)
/// - `partitions`: one value per upstream call
/// - `ttl`: optional TTL policy name
#[derive(Debug, Clone, Deserialize)]
pub struct BatchBody {
    pub endpoint: String,
    #[serde(default)]
    pub params: Params,
    pub partition_key: String,
    pub partitions: Vec<String>,
    #[serde(default)]
    pub ttl: Option<String>,
}

impl BatchBody {
    /// Validates the request data
    ///
    /// Returns an error message if validation fails, None if valid.
    pub fn validate(&self) -> Option<String> {
        if self.endpoint.trim_matches('/').is_empty() {
            return Some("Endpoint cannot be empty".to_string());
        }
        if self.partition_key.is_empty() {
            return Some("Partition key cannot be empty".to_string());
        }
        if self.partitions.is_empty() {
            return Some("At least one partition is required".to_string());
        }
        if self.params.contains_key(&self.partition_key) {
            return Some(format!(
                "Parameter '{}' is both shared and the partition key",
                self.partition_key
            ));
        }
        None
    }

    pub fn into_batch_request(self) -> Result<BatchRequest, String> {
        if let Some(error_msg) = self.validate() {
            return Err(error_msg);
        }
        let ttl = self.ttl.as_deref().map(str::parse::<TtlPolicy>).transpose()?;
        let mut request = BatchRequest::new(self.endpoint, self.partition_key, self.partitions);
        request.params = self.params;
        request.ttl = ttl;
        Ok(request)
    }
}
