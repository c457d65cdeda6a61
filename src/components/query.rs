//! Two-phase distributed query
//!
//! `EXECUTE_QUERY` asks every shard for its best `rows` ids and scores and
//! merges them into a global top list. `GET_FIELDS` then asks only the shards
//! owning a winning id for the stored fields of those ids.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use crate::{
    component::{Category, Component, ComponentConfig},
    context::RequestContext,
    error::{ComponentError, ComponentResult},
    shard::{CompletedRequest, Purpose, ShardId, ShardRequest},
    stage::Stage,
};

pub const DEFAULT_ROWS: u64 = 10;

/// Section of the merged result written by this component
const SECTION: &str = "response";

#[derive(Debug, Clone, Deserialize)]
struct QueryParams {
    #[serde(default = "default_rows")]
    rows: u64,
}

fn default_rows() -> u64 {
    DEFAULT_ROWS
}

#[derive(Debug, Clone, PartialEq)]
struct Hit {
    id: String,
    shard: ShardId,
    score: f64,
}

#[derive(Debug, Clone, Default)]
struct QueryState {
    query: String,
    rows: usize,
    executed: bool,
    fields_requested: bool,
    num_found: u64,
    hits: Vec<Hit>,
    /// Stored fields keyed by owning shard and id; ids are only unique per shard
    fields: HashMap<(ShardId, String), Value>,
}

#[derive(Debug, Deserialize)]
struct TopIdsPayload {
    top_ids: Vec<TopId>,
    #[serde(default)]
    num_found: u64,
}

#[derive(Debug, Deserialize)]
struct TopId {
    id: String,
    score: f64,
}

#[derive(Debug, Deserialize)]
struct FieldsPayload {
    docs: Vec<Value>,
}

/// Distributed query with global top-N merge and field retrieval
#[derive(Debug, Clone)]
pub struct QueryComponent {
    default_rows: u64,
}

impl Default for QueryComponent {
    fn default() -> Self {
        Self::new(DEFAULT_ROWS)
    }
}

impl QueryComponent {
    pub const KIND: &'static str = "query";

    pub fn new(default_rows: u64) -> Self {
        Self { default_rows }
    }

    /// Build from `{"rows": n}`; a missing or null params value keeps the
    /// defaults
    pub fn from_config(config: &ComponentConfig) -> ComponentResult<Self> {
        if config.params.is_null() {
            return Ok(Self::default());
        }
        let params: QueryParams = serde_json::from_value(config.params.clone()).map_err(|e| {
            ComponentError::InvalidConfiguration {
                message: format!("{}: {}", config.name, e),
            }
        })?;
        Ok(Self::new(params.rows))
    }

    fn state<'a>(&self, ctx: &'a RequestContext) -> ComponentResult<&'a QueryState> {
        ctx.state::<QueryState>()
            .ok_or(ComponentError::MissingState("query"))
    }

    fn state_mut<'a>(&self, ctx: &'a mut RequestContext) -> ComponentResult<&'a mut QueryState> {
        ctx.state_mut::<QueryState>()
            .ok_or(ComponentError::MissingState("query"))
    }

    fn fields_requests(state: &QueryState) -> Vec<ShardRequest> {
        let mut by_shard: BTreeMap<&str, (ShardId, Vec<&str>)> = BTreeMap::new();
        for hit in &state.hits {
            by_shard
                .entry(hit.shard.as_str())
                .or_insert_with(|| (hit.shard.clone(), Vec::new()))
                .1
                .push(hit.id.as_str());
        }

        by_shard
            .into_values()
            .map(|(shard, ids)| {
                ShardRequest::new(Purpose::GET_FIELDS)
                    .for_shards(vec![shard])
                    .with_param("ids", json!(ids))
            })
            .collect()
    }

    fn render(state: &QueryState) -> Value {
        let docs: Vec<Value> = state
            .hits
            .iter()
            .map(|hit| {
                let key = (hit.shard.clone(), hit.id.clone());
                let mut doc = match state.fields.get(&key) {
                    Some(Value::Object(fields)) => fields.clone(),
                    _ => {
                        let mut doc = serde_json::Map::new();
                        doc.insert("id".to_string(), json!(hit.id));
                        doc
                    }
                };
                doc.insert("score".to_string(), json!(hit.score));
                doc.insert("shard".to_string(), json!(hit.shard.as_str()));
                Value::Object(doc)
            })
            .collect();

        json!({
            "num_found": state.num_found,
            "max_score": state.hits.first().map(|hit| hit.score),
            "docs": docs,
        })
    }
}

/// Merge per-shard hits into one list ordered by score descending. Ties are
/// broken by shard then id so the merge does not depend on arrival order.
fn merge_hits(mut hits: Vec<Hit>, rows: usize) -> Vec<Hit> {
    hits.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.shard.as_str().cmp(b.shard.as_str()))
            .then_with(|| a.id.cmp(&b.id))
    });
    hits.truncate(rows);
    hits
}

#[async_trait]
impl Component for QueryComponent {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn description(&self) -> &'static str {
        "Distributed top-N query with stored field retrieval"
    }

    fn category(&self) -> Category {
        Category::Query
    }

    async fn prepare(&self, ctx: &mut RequestContext) -> ComponentResult<()> {
        let query = ctx
            .param_str("q")
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| ComponentError::MissingParam {
                name: "q".to_string(),
            })?
            .to_string();

        let rows = match ctx.param("rows") {
            None => self.default_rows,
            Some(raw) => ctx
                .param_u64("rows")
                .ok_or_else(|| ComponentError::InvalidParam {
                    name: "rows".to_string(),
                    reason: format!("expected a non-negative integer, got {}", raw),
                })?,
        };

        ctx.insert_state(QueryState {
            query,
            rows: rows as usize,
            ..QueryState::default()
        });
        Ok(())
    }

    async fn process(&self, ctx: &mut RequestContext) -> ComponentResult<()> {
        let state = self.state(ctx)?;
        let rendered = Self::render(state);
        ctx.set_section(SECTION, rendered);
        Ok(())
    }

    fn next_stage(&self, ctx: &RequestContext) -> Stage {
        let Some(state) = ctx.state::<QueryState>() else {
            return Stage::DONE;
        };
        if !state.executed {
            Stage::EXECUTE_QUERY
        } else if !state.fields_requested && !state.hits.is_empty() {
            Stage::GET_FIELDS
        } else {
            Stage::DONE
        }
    }

    async fn build_shard_requests(
        &self,
        ctx: &mut RequestContext,
    ) -> ComponentResult<Vec<ShardRequest>> {
        let state = self.state_mut(ctx)?;

        if !state.executed {
            state.executed = true;
            // rows=0 still asks every shard so num_found is a real total
            return Ok(vec![
                ShardRequest::new(Purpose::GET_TOP_IDS)
                    .with_param("q", state.query.clone())
                    .with_param("rows", state.rows as u64),
            ]);
        }

        state.fields_requested = true;
        Ok(Self::fields_requests(state))
    }

    async fn handle_responses(
        &self,
        ctx: &mut RequestContext,
        completed: &[CompletedRequest],
    ) -> ComponentResult<()> {
        let state = self.state_mut(ctx)?;
        let mut malformed = None;

        for request in completed {
            if request.request.purpose.contains(Purpose::GET_TOP_IDS) {
                let mut hits = std::mem::take(&mut state.hits);
                for (shard, payload) in request.successes() {
                    match TopIdsPayload::deserialize(payload) {
                        Ok(top) => {
                            state.num_found += top.num_found;
                            hits.extend(top.top_ids.into_iter().map(|t| Hit {
                                id: t.id,
                                shard: shard.clone(),
                                score: t.score,
                            }));
                        }
                        Err(e) => {
                            if malformed.is_none() {
                                malformed = Some(ComponentError::MalformedResponse {
                                    shard: shard.clone(),
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                }
                state.hits = merge_hits(hits, state.rows);
                debug!(
                    hits = state.hits.len(),
                    num_found = state.num_found,
                    "Merged shard top ids"
                );
            }

            if request.request.purpose.contains(Purpose::GET_FIELDS) {
                for (shard, payload) in request.successes() {
                    match FieldsPayload::deserialize(payload) {
                        Ok(fields) => {
                            for doc in fields.docs {
                                let Some(id) = doc.get("id").and_then(Value::as_str) else {
                                    continue;
                                };
                                let key = (shard.clone(), id.to_string());
                                state.fields.insert(key, doc);
                            }
                        }
                        Err(e) => {
                            if malformed.is_none() {
                                malformed = Some(ComponentError::MalformedResponse {
                                    shard: shard.clone(),
                                    reason: e.to_string(),
                                });
                            }
                        }
                    }
                }
            }
        }

        match malformed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn finish_stage(&self, ctx: &mut RequestContext) -> ComponentResult<()> {
        if ctx.stage() < Stage::EXECUTE_QUERY {
            return Ok(());
        }
        let Some(state) = ctx.state::<QueryState>() else {
            return Ok(());
        };
        let rendered = Self::render(state);
        ctx.set_section(SECTION, rendered);
        Ok(())
    }
}
