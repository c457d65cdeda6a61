use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::{
    component::{Category, Component, ComponentConfig},
    context::RequestContext,
    error::{ComponentError, ComponentResult},
    shard::{Purpose, ShardRequest},
};

const SECTION: &str = "debug";

#[derive(Debug, Clone, Default, Deserialize)]
struct DebugParams {
    /// Collect debug info even when the request does not ask for it
    #[serde(default)]
    always: bool,
}

#[derive(Debug, Clone, Default)]
struct DebugState {
    /// Per shard, one entry per round in which the shard answered a debug
    /// request
    shards: Map<String, Value>,
}

/// Collects per-shard debug information without issuing requests of its own.
///
/// Enabled per request with `debug=true`. It marks every top-ids request built
/// by other components with `GET_DEBUG` and, at the end of each round, picks
/// the shard's debug block and timing out of the responses.
#[derive(Debug, Clone, Default)]
pub struct DebugComponent {
    always: bool,
}

impl DebugComponent {
    pub const KIND: &'static str = "debug";

    pub fn new() -> Self {
        Self::default()
    }

    /// Enable debug output for every request
    pub fn always() -> Self {
        Self { always: true }
    }

    pub fn from_config(config: &ComponentConfig) -> ComponentResult<Self> {
        if config.params.is_null() {
            return Ok(Self::default());
        }
        let params: DebugParams = serde_json::from_value(config.params.clone()).map_err(|e| {
            ComponentError::InvalidConfiguration {
                message: format!("{}: {}", config.name, e),
            }
        })?;
        Ok(Self {
            always: params.always,
        })
    }
}

#[async_trait]
impl Component for DebugComponent {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn description(&self) -> &'static str {
        "Per-shard debug and timing information"
    }

    fn category(&self) -> Category {
        Category::Debug
    }

    async fn prepare(&self, ctx: &mut RequestContext) -> ComponentResult<()> {
        if self.always || ctx.param_bool("debug").unwrap_or(false) {
            ctx.insert_state(DebugState::default());
        }
        Ok(())
    }

    async fn process(&self, ctx: &mut RequestContext) -> ComponentResult<()> {
        if ctx.state::<DebugState>().is_none() {
            return Ok(());
        }
        let section = json!({
            "request_id": ctx.request_id(),
            "distributed": false,
        });
        ctx.set_section(SECTION, section);
        Ok(())
    }

    fn modify_request(
        &self,
        ctx: &RequestContext,
        _owner: &ComponentConfig,
        request: &mut ShardRequest,
    ) {
        if ctx.state::<DebugState>().is_none() || !request.purpose.contains(Purpose::GET_TOP_IDS) {
            return;
        }
        request.purpose |= Purpose::GET_DEBUG;
        request.set_param("debug", true);
    }

    async fn finish_stage(&self, ctx: &mut RequestContext) -> ComponentResult<()> {
        if ctx.state::<DebugState>().is_none() {
            return Ok(());
        }

        let round = ctx.round();
        let stage = ctx.stage();
        let mut entries = Vec::new();
        for completed in ctx.completed() {
            if !completed.request.purpose.contains(Purpose::GET_DEBUG) {
                continue;
            }
            for response in &completed.responses {
                let mut entry = json!({
                    "round": round,
                    "stage": stage.to_string(),
                    "elapsed_ms": response.elapsed.as_millis() as u64,
                });
                match &response.outcome {
                    Ok(payload) => {
                        entry["info"] = payload.get("debug").cloned().unwrap_or(Value::Null);
                    }
                    Err(error) => {
                        entry["error"] = json!(error.to_string());
                    }
                }
                entries.push((response.shard.to_string(), entry));
            }
        }

        let Some(state) = ctx.state_mut::<DebugState>() else {
            return Ok(());
        };
        for (shard, entry) in entries {
            match state.shards.entry(shard).or_insert_with(|| json!([])) {
                Value::Array(rounds) => rounds.push(entry),
                other => *other = json!([entry]),
            }
        }
        let shards = Value::Object(state.shards.clone());

        let section = json!({
            "request_id": ctx.request_id(),
            "distributed": true,
            "rounds": round,
            "shards": shards,
        });
        ctx.set_section(SECTION, section);
        Ok(())
    }
}
