use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::ConfigResult;

/// What to do when a round finishes with failed shards or failed component
/// steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PartialResultsPolicy {
    /// Keep going and mark the response as partial
    #[default]
    Tolerant,
    /// Abort the request at the end of the first degraded round
    Strict,
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Per-shard call timeout
    #[serde(default = "default_shard_timeout_ms")]
    pub shard_timeout_ms: u64,
    /// Outer deadline for the whole request, unbounded when unset
    #[serde(default)]
    pub request_timeout_ms: Option<u64>,
    /// Round ceiling; a request needing more rounds fails as not converged
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,
    #[serde(default)]
    pub partial_results: PartialResultsPolicy,
    /// Fold requests addressed to the same shard into one wire call
    #[serde(default = "default_coalesce_requests")]
    pub coalesce_requests: bool,
    /// Cap on wire calls in flight per round, unbounded when unset
    #[serde(default)]
    pub max_concurrent_calls: Option<usize>,
}

fn default_shard_timeout_ms() -> u64 {
    5_000
}

fn default_max_rounds() -> u32 {
    64
}

fn default_coalesce_requests() -> bool {
    true
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            shard_timeout_ms: default_shard_timeout_ms(),
            request_timeout_ms: None,
            max_rounds: default_max_rounds(),
            partial_results: PartialResultsPolicy::default(),
            coalesce_requests: default_coalesce_requests(),
            max_concurrent_calls: None,
        }
    }
}

impl CoordinatorConfig {
    pub fn shard_timeout(&self) -> Duration {
        Duration::from_millis(self.shard_timeout_ms)
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_ms.map(Duration::from_millis)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        super::validation::ConfigValidator::validate(self)
    }
}
