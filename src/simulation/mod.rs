//! In-memory shard cluster
//!
//! [`SimulatedCluster`] answers shard calls from small in-memory indexes so the
//! coordinator can be exercised without a network. Every shard can be made
//! slow, failing or unreachable, and the whole transport can be switched off.

use std::{
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    time::Duration,
};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::{
    shard::{Purpose, ShardId},
    transport::{ShardCall, ShardTransport, TransportError},
};

const VOCABULARY: &[&str] = &[
    "rust", "shard", "query", "index", "merge", "stage", "barrier", "search", "score", "field",
    "vector", "token", "router", "cache", "worker",
];

/// How a simulated shard reacts to calls
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ShardBehavior {
    #[default]
    Healthy,
    /// Answers after an extra delay on top of the cluster latency
    Slow(Duration),
    /// Answers every call with an error
    Failing(String),
    /// Cannot be reached
    Down,
}

/// A stored document. `body` is the only searchable field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub body: String,
    #[serde(default, flatten)]
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    fn score(&self, terms: &[String]) -> f64 {
        self.body
            .split_whitespace()
            .map(str::to_lowercase)
            .filter(|word| terms.contains(word))
            .count() as f64
    }

    fn stored(&self) -> Value {
        let mut doc = self.fields.clone();
        doc.insert("id".to_string(), json!(self.id));
        doc.insert("body".to_string(), json!(self.body));
        Value::Object(doc)
    }
}

#[derive(Debug, Default)]
struct SimulatedShard {
    docs: Vec<Document>,
    behavior: ShardBehavior,
}

/// Shard transport backed by in-memory indexes
#[derive(Debug, Default)]
pub struct SimulatedCluster {
    shards: DashMap<ShardId, SimulatedShard>,
    calls: DashMap<ShardId, usize>,
    total_calls: AtomicUsize,
    latency_ms: Option<(u64, u64)>,
    unavailable: AtomicBool,
}

impl SimulatedCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Generate `shards` shards named `shard-<n>` holding `docs_per_shard`
    /// documents each
    pub fn generate(shards: usize, docs_per_shard: usize) -> Self {
        let cluster = Self::new();
        for s in 0..shards {
            let docs = (0..docs_per_shard)
                .map(|d| {
                    let words: Vec<&str> = (0..6)
                        .map(|w| VOCABULARY[(s * 7 + d * 3 + w * w) % VOCABULARY.len()])
                        .collect();
                    Document::new(format!("shard-{}-doc-{}", s, d), words.join(" "))
                        .with_field("title", format!("Document {} of shard {}", d, s))
                })
                .collect();
            cluster.add_shard(format!("shard-{}", s), docs);
        }
        cluster
    }

    /// Uniformly random latency per call, in milliseconds
    pub fn with_latency(mut self, min_ms: u64, max_ms: u64) -> Self {
        self.latency_ms = Some((min_ms, max_ms.max(min_ms)));
        self
    }

    pub fn add_shard(&self, shard: impl Into<String>, docs: Vec<Document>) {
        self.shards.insert(
            ShardId::new(shard),
            SimulatedShard {
                docs,
                behavior: ShardBehavior::Healthy,
            },
        );
    }

    /// Change a shard's behavior; returns false for unknown shards
    pub fn set_behavior(&self, shard: &ShardId, behavior: ShardBehavior) -> bool {
        match self.shards.get_mut(shard) {
            Some(mut entry) => {
                entry.behavior = behavior;
                true
            }
            None => false,
        }
    }

    /// Make every call fail with [`TransportError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Shard ids in name order
    pub fn shard_ids(&self) -> Vec<ShardId> {
        let mut ids: Vec<ShardId> = self.shards.iter().map(|e| e.key().clone()).collect();
        ids.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        ids
    }

    pub fn total_calls(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    pub fn calls_to(&self, shard: &ShardId) -> usize {
        self.calls.get(shard).map(|c| *c).unwrap_or(0)
    }

    fn random_latency(&self) -> Duration {
        match self.latency_ms {
            Some((min, max)) if max > min => {
                Duration::from_millis(rand::rng().random_range(min..=max))
            }
            Some((min, _)) => Duration::from_millis(min),
            None => Duration::ZERO,
        }
    }

    /// Answer a call from the shard's index. Runs without awaiting so no
    /// map guard is held across a suspension point.
    fn answer(&self, call: &ShardCall) -> Result<(Value, ShardBehavior), TransportError> {
        let shard = self
            .shards
            .get(&call.shard)
            .ok_or_else(|| TransportError::Unreachable {
                shard: call.shard.clone(),
                message: "unknown shard".to_string(),
            })?;

        let mut payload = Map::new();

        if call.purpose.contains(Purpose::GET_TOP_IDS) {
            let query = call
                .params
                .get("q")
                .and_then(Value::as_str)
                .ok_or_else(|| TransportError::ShardFailed {
                    shard: call.shard.clone(),
                    message: "missing parameter q".to_string(),
                })?;
            let rows = call
                .params
                .get("rows")
                .and_then(Value::as_u64)
                .unwrap_or(10) as usize;
            let terms: Vec<String> = query.split_whitespace().map(str::to_lowercase).collect();

            let mut matches: Vec<(f64, &Document)> = shard
                .docs
                .iter()
                .map(|doc| (doc.score(&terms), doc))
                .filter(|(score, _)| *score > 0.0)
                .collect();
            let num_found = matches.len();
            matches.sort_by(|a, b| b.0.total_cmp(&a.0).then_with(|| a.1.id.cmp(&b.1.id)));
            matches.truncate(rows);

            let top_ids: Vec<Value> = matches
                .iter()
                .map(|(score, doc)| json!({"id": doc.id, "score": score}))
                .collect();
            payload.insert("top_ids".to_string(), Value::Array(top_ids));
            payload.insert("num_found".to_string(), json!(num_found));
        }

        if call.purpose.contains(Purpose::GET_FIELDS) {
            let ids: Vec<&str> = call
                .params
                .get("ids")
                .and_then(Value::as_array)
                .map(|ids| ids.iter().filter_map(Value::as_str).collect())
                .unwrap_or_default();
            let docs: Vec<Value> = ids
                .iter()
                .filter_map(|id| shard.docs.iter().find(|doc| doc.id == *id))
                .map(Document::stored)
                .collect();
            payload.insert("docs".to_string(), Value::Array(docs));
        }

        if call.purpose.contains(Purpose::GET_DEBUG) {
            payload.insert(
                "debug".to_string(),
                json!({
                    "shard": call.shard.as_str(),
                    "purpose": call.purpose.to_string(),
                    "index_size": shard.docs.len(),
                    "coalesced": call.request_ids.len(),
                }),
            );
        }

        Ok((Value::Object(payload), shard.behavior.clone()))
    }
}

#[async_trait]
impl ShardTransport for SimulatedCluster {
    async fn send(&self, call: &ShardCall) -> Result<Value, TransportError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable {
                message: "simulated cluster is offline".to_string(),
            });
        }
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self.calls.entry(call.shard.clone()).or_insert(0) += 1;

        let answered = self.answer(call);
        let mut latency = self.random_latency();
        if let Ok((_, ShardBehavior::Slow(extra))) = &answered {
            latency += *extra;
        }
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let (payload, behavior) = answered?;
        debug!(
            shard = %call.shard,
            purpose = %call.purpose,
            latency_ms = latency.as_millis() as u64,
            "Simulated shard call"
        );
        match behavior {
            ShardBehavior::Healthy | ShardBehavior::Slow(_) => Ok(payload),
            ShardBehavior::Failing(message) => Err(TransportError::ShardFailed {
                shard: call.shard.clone(),
                message,
            }),
            ShardBehavior::Down => Err(TransportError::Unreachable {
                shard: call.shard.clone(),
                message: "connection refused".to_string(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "simulated_cluster"
    }
}
