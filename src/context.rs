//! Per-request state shared by all components
//!
//! A [`RequestContext`] lives exactly as long as one search request. It is
//! owned by the coordinator and lent mutably to one component hook at a time,
//! so components never need to synchronize with each other.

use std::sync::Arc;

use http::Extensions;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{
    component::{ComponentConfig, ComponentRegistry},
    config::PartialResultsPolicy,
    coordinator::{Degradation, RoundSummary},
    shard::{CompletedRequest, RequestId, ShardId, ShardRequest},
    stage::Stage,
};

/// Incoming search request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Caller-supplied id; a random one is generated when absent
    #[serde(default)]
    pub request_id: Option<String>,
    #[serde(default)]
    pub params: Map<String, Value>,
    /// Participating shards. An empty list selects the single-node path.
    #[serde(default)]
    pub shards: Vec<ShardId>,
    /// Overrides the coordinator's partial-results policy for this request
    #[serde(default)]
    pub partial_results: Option<PartialResultsPolicy>,
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_shards<I, S>(mut self, shards: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<ShardId>,
    {
        self.shards = shards.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_partial_results(mut self, policy: PartialResultsPolicy) -> Self {
        self.partial_results = Some(policy);
        self
    }
}

/// A request in the current round's outbound batch
#[derive(Debug, Clone)]
pub struct OutgoingRequest {
    pub id: RequestId,
    pub owner: Arc<ComponentConfig>,
    /// Registry position of the owning component
    pub owner_index: usize,
    pub request: ShardRequest,
}

/// Mutable state of one in-flight request
pub struct RequestContext {
    request_id: String,
    params: Map<String, Value>,
    registry: Arc<ComponentRegistry>,
    shards: Vec<ShardId>,
    stage: Stage,
    round: u32,
    outgoing: Vec<OutgoingRequest>,
    completed: Arc<Vec<CompletedRequest>>,
    response: Map<String, Value>,
    state: Extensions,
    degradations: Vec<Degradation>,
    rounds: Vec<RoundSummary>,
}

impl RequestContext {
    pub fn new(request: SearchRequest, registry: Arc<ComponentRegistry>) -> Self {
        let mut shards: Vec<ShardId> = Vec::with_capacity(request.shards.len());
        for shard in request.shards {
            if !shards.contains(&shard) {
                shards.push(shard);
            }
        }

        Self {
            request_id: request
                .request_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            params: request.params,
            registry,
            shards,
            stage: Stage::START,
            round: 0,
            outgoing: Vec::new(),
            completed: Arc::new(Vec::new()),
            response: Map::new(),
            state: Extensions::new(),
            degradations: Vec::new(),
            rounds: Vec::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    // ==================== Request input ====================

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn param_u64(&self, key: &str) -> Option<u64> {
        self.params.get(key).and_then(|v| match v {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
    }

    pub fn param_bool(&self, key: &str) -> Option<bool> {
        self.params.get(key).and_then(|v| match v {
            Value::Bool(b) => Some(*b),
            Value::String(s) => s.parse().ok(),
            _ => None,
        })
    }

    pub fn components(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub(crate) fn registry_handle(&self) -> Arc<ComponentRegistry> {
        Arc::clone(&self.registry)
    }

    /// Participating shards, deduplicated, in request order
    pub fn shards(&self) -> &[ShardId] {
        &self.shards
    }

    pub fn is_distributed(&self) -> bool {
        !self.shards.is_empty()
    }

    // ==================== Round state ====================

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Number of rounds started so far
    pub fn round(&self) -> u32 {
        self.round
    }

    /// Requests added to the current round's batch so far
    pub fn outgoing(&self) -> &[OutgoingRequest] {
        &self.outgoing
    }

    /// Every request of the current round with its responses. Empty until
    /// the round's barrier has been reached.
    pub fn completed(&self) -> &[CompletedRequest] {
        &self.completed
    }

    /// Start a new round at `stage`. The recorded stage never moves backward.
    pub(crate) fn begin_round(&mut self, stage: Stage) {
        self.round += 1;
        self.stage = self.stage.max(stage);
        self.outgoing.clear();
        self.completed = Arc::new(Vec::new());
    }

    pub(crate) fn push_outgoing(
        &mut self,
        owner: Arc<ComponentConfig>,
        owner_index: usize,
        request: ShardRequest,
    ) -> RequestId {
        let id = RequestId::new(self.outgoing.len());
        self.outgoing.push(OutgoingRequest {
            id,
            owner,
            owner_index,
            request,
        });
        id
    }

    pub(crate) fn set_completed(&mut self, completed: Arc<Vec<CompletedRequest>>) {
        self.completed = completed;
    }

    // ==================== Merged result ====================

    /// Merged result assembled by the components
    pub fn response(&self) -> &Map<String, Value> {
        &self.response
    }

    pub fn response_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.response
    }

    pub fn set_section(&mut self, key: impl Into<String>, value: Value) {
        self.response.insert(key.into(), value);
    }

    pub fn section(&self, key: &str) -> Option<&Value> {
        self.response.get(key)
    }

    // ==================== Component request state ====================

    /// Typed per-request state, one slot per type
    pub fn state<T: Send + Sync + Clone + 'static>(&self) -> Option<&T> {
        self.state.get::<T>()
    }

    pub fn state_mut<T: Send + Sync + Clone + 'static>(&mut self) -> Option<&mut T> {
        self.state.get_mut::<T>()
    }

    /// Insert state, returning the previous value of the same type
    pub fn insert_state<T: Send + Sync + Clone + 'static>(&mut self, value: T) -> Option<T> {
        self.state.insert(value)
    }

    pub fn take_state<T: Send + Sync + Clone + 'static>(&mut self) -> Option<T> {
        self.state.remove::<T>()
    }

    // ==================== Degradation ====================

    pub fn degradations(&self) -> &[Degradation] {
        &self.degradations
    }

    pub(crate) fn record_degradation(&mut self, degradation: Degradation) {
        self.degradations.push(degradation);
    }

    pub fn rounds(&self) -> &[RoundSummary] {
        &self.rounds
    }

    pub(crate) fn record_round(&mut self, summary: RoundSummary) {
        self.rounds.push(summary);
    }

    pub(crate) fn into_parts(self) -> (String, Map<String, Value>, Vec<Degradation>, Vec<RoundSummary>) {
        (self.request_id, self.response, self.degradations, self.rounds)
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("stage", &self.stage)
            .field("round", &self.round)
            .field("shards", &self.shards)
            .field("outgoing", &self.outgoing.len())
            .field("degradations", &self.degradations.len())
            .finish()
    }
}
