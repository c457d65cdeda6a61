//! Shard request and response value types

use std::{
    fmt,
    ops::{BitOr, BitOrAssign},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity of one shard (a partition reachable over the transport)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardId(String);

impl ShardId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for ShardId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Set of purpose tags describing why a shard request was sent.
///
/// Coalesced wire calls carry the union of the tags of every request folded
/// into them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Purpose(u32);

impl Purpose {
    pub const NONE: Purpose = Purpose(0);
    pub const PRIVATE: Purpose = Purpose(0x01);
    pub const GET_TERM_DFS: Purpose = Purpose(0x02);
    pub const GET_TOP_IDS: Purpose = Purpose(0x04);
    pub const REFINE_TOP_IDS: Purpose = Purpose(0x08);
    pub const GET_FACETS: Purpose = Purpose(0x10);
    pub const REFINE_FACETS: Purpose = Purpose(0x20);
    pub const GET_FIELDS: Purpose = Purpose(0x40);
    pub const GET_HIGHLIGHTS: Purpose = Purpose(0x80);
    pub const GET_DEBUG: Purpose = Purpose(0x100);
    pub const GET_STATS: Purpose = Purpose(0x200);
    pub const GET_TERMS: Purpose = Purpose(0x400);
    pub const GET_TOP_GROUPS: Purpose = Purpose(0x800);
    pub const GET_MLT_RESULTS: Purpose = Purpose(0x1000);
    pub const REFINE_PIVOT_FACETS: Purpose = Purpose(0x2000);
    pub const SET_TERM_STATS: Purpose = Purpose(0x4000);
    pub const GET_TERM_STATS: Purpose = Purpose(0x8000);

    const NAMES: [(Purpose, &'static str); 16] = [
        (Self::PRIVATE, "private"),
        (Self::GET_TERM_DFS, "get_term_dfs"),
        (Self::GET_TOP_IDS, "get_top_ids"),
        (Self::REFINE_TOP_IDS, "refine_top_ids"),
        (Self::GET_FACETS, "get_facets"),
        (Self::REFINE_FACETS, "refine_facets"),
        (Self::GET_FIELDS, "get_fields"),
        (Self::GET_HIGHLIGHTS, "get_highlights"),
        (Self::GET_DEBUG, "get_debug"),
        (Self::GET_STATS, "get_stats"),
        (Self::GET_TERMS, "get_terms"),
        (Self::GET_TOP_GROUPS, "get_top_groups"),
        (Self::GET_MLT_RESULTS, "get_mlt_results"),
        (Self::REFINE_PIVOT_FACETS, "refine_pivot_facets"),
        (Self::SET_TERM_STATS, "set_term_stats"),
        (Self::GET_TERM_STATS, "get_term_stats"),
    ];

    /// Custom tag for component-defined purposes outside the well-known set.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: Purpose) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Purpose) {
        self.0 |= other.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Names of the well-known tags present in this set
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(tag, _)| self.contains(*tag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl BitOr for Purpose {
    type Output = Purpose;

    fn bitor(self, rhs: Purpose) -> Purpose {
        Purpose(self.0 | rhs.0)
    }
}

impl BitOrAssign for Purpose {
    fn bitor_assign(&mut self, rhs: Purpose) {
        self.0 |= rhs.0;
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = self.names();
        if names.is_empty() {
            write!(f, "{:#x}", self.0)
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Which shards a request is addressed to
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardTarget {
    /// Every shard participating in the request
    #[default]
    All,
    /// An explicit subset, in the order given
    Only(Vec<ShardId>),
}

impl ShardTarget {
    /// Resolve against the request's participating shards.
    ///
    /// Explicit targets that are not part of the request are dropped and
    /// duplicates are removed; the request's shard order wins for `All`.
    pub fn resolve(&self, participating: &[ShardId]) -> Vec<ShardId> {
        match self {
            ShardTarget::All => participating.to_vec(),
            ShardTarget::Only(shards) => {
                let mut resolved: Vec<ShardId> = Vec::with_capacity(shards.len());
                for shard in shards {
                    if participating.contains(shard) && !resolved.contains(shard) {
                        resolved.push(shard.clone());
                    }
                }
                resolved
            }
        }
    }
}

/// One outbound fan-out unit built by a component
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ShardRequest {
    pub purpose: Purpose,
    pub target: ShardTarget,
    pub params: Map<String, Value>,
}

impl ShardRequest {
    pub fn new(purpose: Purpose) -> Self {
        Self {
            purpose,
            target: ShardTarget::All,
            params: Map::new(),
        }
    }

    pub fn for_shards(mut self, shards: Vec<ShardId>) -> Self {
        self.target = ShardTarget::Only(shards);
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn set_param(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.params.insert(key.into(), value.into());
    }
}

/// Position of a request in a round's outbound batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(usize);

impl RequestId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Failure marker delivered in place of a shard payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ShardError {
    #[error("Shard {shard} did not respond within {timeout_ms}ms")]
    Timeout { shard: ShardId, timeout_ms: u64 },

    #[error("Shard {shard} failed: {message}")]
    Failed { shard: ShardId, message: String },

    #[error("Shard {shard} was not reachable: {message}")]
    Unreachable { shard: ShardId, message: String },
}

impl ShardError {
    pub fn shard(&self) -> &ShardId {
        match self {
            ShardError::Timeout { shard, .. }
            | ShardError::Failed { shard, .. }
            | ShardError::Unreachable { shard, .. } => shard,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ShardError::Timeout { .. })
    }
}

/// Result collected from one shard for one request
#[derive(Debug, Clone, PartialEq)]
pub struct ShardResponse {
    pub shard: ShardId,
    pub outcome: Result<Value, ShardError>,
    pub elapsed: Duration,
}

impl ShardResponse {
    pub fn success(shard: ShardId, payload: Value, elapsed: Duration) -> Self {
        Self {
            shard,
            outcome: Ok(payload),
            elapsed,
        }
    }

    pub fn failure(error: ShardError, elapsed: Duration) -> Self {
        Self {
            shard: error.shard().clone(),
            outcome: Err(error),
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn payload(&self) -> Option<&Value> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ShardError> {
        self.outcome.as_ref().err()
    }
}

/// A request of the finished round together with every response it received.
///
/// `responses` has exactly one entry per shard in `shards`, in the same order.
#[derive(Debug, Clone)]
pub struct CompletedRequest {
    pub id: RequestId,
    /// Name of the component that built the request
    pub owner: String,
    pub request: ShardRequest,
    pub shards: Vec<ShardId>,
    pub responses: Vec<ShardResponse>,
}

impl CompletedRequest {
    pub fn successes(&self) -> impl Iterator<Item = (&ShardId, &Value)> {
        self.responses
            .iter()
            .filter_map(|r| r.payload().map(|payload| (&r.shard, payload)))
    }

    pub fn failures(&self) -> impl Iterator<Item = &ShardError> {
        self.responses.iter().filter_map(ShardResponse::error)
    }

    pub fn response_for(&self, shard: &ShardId) -> Option<&ShardResponse> {
        self.responses.iter().find(|r| &r.shard == shard)
    }
}
