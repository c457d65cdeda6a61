//! Result types produced by the coordinator

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::{
    shard::{ShardError, ShardId},
    stage::Stage,
};

/// Step of a round in which a degradation happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradedPhase {
    BuildRequests,
    Shard,
    HandleResponses,
    FinishStage,
}

/// A non-fatal failure attached to the final response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub round: u32,
    pub stage: Stage,
    pub phase: DegradedPhase,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub component: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardId>,
    pub message: String,
}

impl Degradation {
    pub(crate) fn component(
        round: u32,
        stage: Stage,
        phase: DegradedPhase,
        component: &str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            round,
            stage,
            phase,
            component: Some(component.to_string()),
            shard: None,
            message: message.into(),
        }
    }

    pub(crate) fn shard(round: u32, stage: Stage, error: &ShardError) -> Self {
        Self {
            round,
            stage,
            phase: DegradedPhase::Shard,
            component: None,
            shard: Some(error.shard().clone()),
            message: error.to_string(),
        }
    }
}

/// Bookkeeping for one finished round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundSummary {
    pub round: u32,
    pub stage: Stage,
    /// Components whose vote won the round, in registration order
    pub builders: Vec<String>,
    pub requests: usize,
    pub calls: usize,
    pub failed_calls: usize,
    pub elapsed_ms: u64,
}

/// Merged response of a finished request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub request_id: String,
    pub result: Map<String, Value>,
    /// True when any component step or shard call degraded the result
    pub partial: bool,
    pub degradations: Vec<Degradation>,
    pub rounds: Vec<RoundSummary>,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

impl SearchResponse {
    pub(crate) fn new(
        request_id: String,
        result: Map<String, Value>,
        degradations: Vec<Degradation>,
        rounds: Vec<RoundSummary>,
        started_at: DateTime<Utc>,
        elapsed: Duration,
    ) -> Self {
        Self {
            request_id,
            result,
            partial: !degradations.is_empty(),
            degradations,
            rounds,
            started_at,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn round_count(&self) -> usize {
        self.rounds.len()
    }

    pub fn section(&self, key: &str) -> Option<&Value> {
        self.result.get(key)
    }
}
