//! Shared helpers for the coordinator integration tests
#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use serde_json::{json, Value};
use sgl_shard_coordinator::{
    CompletedRequest, Component, ComponentError, ComponentRegistry, ComponentResult,
    CoordinatorConfig, Purpose, RequestContext, ShardCall, ShardId, ShardRequest,
    ShardTransport, Stage, StageCoordinator, TransportError,
};

/// Ordered record of everything the components and the transport did
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    pub fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Events starting with `prefix`, in order
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

/// How far each scripted component got through its plan, per request
#[derive(Debug, Clone, Default)]
struct Progress(HashMap<String, usize>);

/// Component that votes for a fixed list of stages and records every hook call
/// as `<name>:<hook>[@stage]`
#[derive(Clone)]
pub struct ScriptedComponent {
    pub name: String,
    log: EventLog,
    plan: Vec<Stage>,
    stuck: bool,
    template: Option<ShardRequest>,
    fail_prepare: bool,
    fail_build: bool,
    fail_handle: bool,
    fail_finish: bool,
}

impl ScriptedComponent {
    pub fn new(name: &str, log: &EventLog) -> Self {
        Self {
            name: name.to_string(),
            log: log.clone(),
            plan: Vec::new(),
            stuck: false,
            template: None,
            fail_prepare: false,
            fail_build: false,
            fail_handle: false,
            fail_finish: false,
        }
    }

    /// Stages to vote for, one per round in which this component builds
    pub fn plan(mut self, stages: &[u32]) -> Self {
        self.plan = stages.iter().copied().map(Stage::new).collect();
        self
    }

    /// Keep voting for the first planned stage forever
    pub fn stuck(mut self) -> Self {
        self.stuck = true;
        self
    }

    /// Request built every time this component's vote wins
    pub fn request(mut self, request: ShardRequest) -> Self {
        self.template = Some(request);
        self
    }

    pub fn failing_prepare(mut self) -> Self {
        self.fail_prepare = true;
        self
    }

    pub fn failing_build(mut self) -> Self {
        self.fail_build = true;
        self
    }

    pub fn failing_handle(mut self) -> Self {
        self.fail_handle = true;
        self
    }

    pub fn failing_finish(mut self) -> Self {
        self.fail_finish = true;
        self
    }

    fn position(&self, ctx: &RequestContext) -> usize {
        ctx.state::<Progress>()
            .and_then(|p| p.0.get(&self.name).copied())
            .unwrap_or(0)
    }

    fn advance(&self, ctx: &mut RequestContext) {
        if ctx.state::<Progress>().is_none() {
            ctx.insert_state(Progress::default());
        }
        if let Some(progress) = ctx.state_mut::<Progress>() {
            *progress.0.entry(self.name.clone()).or_insert(0) += 1;
        }
    }

    fn failure(&self, hook: &str) -> ComponentError {
        ComponentError::internal(format!("{} failed in {}", self.name, hook))
    }
}

#[async_trait]
impl Component for ScriptedComponent {
    fn kind(&self) -> &'static str {
        "scripted"
    }

    async fn prepare(&self, _ctx: &mut RequestContext) -> ComponentResult<()> {
        self.log.push(format!("{}:prepare", self.name));
        if self.fail_prepare {
            return Err(self.failure("prepare"));
        }
        Ok(())
    }

    async fn process(&self, ctx: &mut RequestContext) -> ComponentResult<()> {
        self.log.push(format!("{}:process", self.name));
        ctx.set_section(self.name.clone(), json!({"local": true}));
        Ok(())
    }

    fn next_stage(&self, ctx: &RequestContext) -> Stage {
        if self.stuck {
            return self.plan.first().copied().unwrap_or(Stage::DONE);
        }
        self.plan
            .get(self.position(ctx))
            .copied()
            .unwrap_or(Stage::DONE)
    }

    async fn build_shard_requests(
        &self,
        ctx: &mut RequestContext,
    ) -> ComponentResult<Vec<ShardRequest>> {
        let stage = ctx.stage();
        self.log.push(format!("{}:build@{}", self.name, stage.value()));
        self.advance(ctx);
        if self.fail_build {
            return Err(self.failure("build"));
        }

        let request = match &self.template {
            Some(template) => template.clone(),
            None => ShardRequest::new(Purpose::PRIVATE)
                .with_param(format!("{}.stage", self.name), stage.value()),
        };
        Ok(vec![request])
    }

    async fn handle_responses(
        &self,
        ctx: &mut RequestContext,
        completed: &[CompletedRequest],
    ) -> ComponentResult<()> {
        let ok: usize = completed.iter().map(|c| c.successes().count()).sum();
        let err: usize = completed.iter().map(|c| c.failures().count()).sum();
        self.log.push(format!(
            "{}:handle@{}:ok={}:err={}",
            self.name,
            ctx.stage().value(),
            ok,
            err
        ));
        if completed.iter().any(|c| c.owner != self.name) {
            self.log.push(format!("{}:foreign-response", self.name));
        }
        if self.fail_handle {
            return Err(self.failure("handle"));
        }

        let mut payloads: Vec<Value> = match ctx.section(&self.name) {
            Some(Value::Array(existing)) => existing.clone(),
            _ => Vec::new(),
        };
        for request in completed {
            for (shard, payload) in request.successes() {
                payloads.push(json!({
                    "shard": shard.as_str(),
                    "stage": ctx.stage().value(),
                    "payload": payload,
                }));
            }
        }
        ctx.set_section(self.name.clone(), Value::Array(payloads));
        Ok(())
    }

    async fn finish_stage(&self, ctx: &mut RequestContext) -> ComponentResult<()> {
        self.log
            .push(format!("{}:finish@{}", self.name, ctx.stage().value()));
        if self.fail_finish {
            return Err(self.failure("finish"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Scripted {
    Slow(Duration),
    Failing(String),
    Unreachable,
}

/// Transport answering `{"shard", "purpose", "requests"}` for every call.
/// Finished calls are logged as `call:<shard>`.
pub struct ScriptedTransport {
    log: EventLog,
    behaviors: Mutex<HashMap<ShardId, Scripted>>,
    calls: Mutex<Vec<ShardCall>>,
    unavailable: bool,
}

impl ScriptedTransport {
    pub fn new(log: &EventLog) -> Self {
        Self {
            log: log.clone(),
            behaviors: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            unavailable: false,
        }
    }

    pub fn unavailable(log: &EventLog) -> Self {
        Self {
            unavailable: true,
            ..Self::new(log)
        }
    }

    pub fn slow(self, shard: &str, delay: Duration) -> Self {
        self.set(shard, Scripted::Slow(delay))
    }

    pub fn failing(self, shard: &str, message: &str) -> Self {
        self.set(shard, Scripted::Failing(message.to_string()))
    }

    pub fn unreachable(self, shard: &str) -> Self {
        self.set(shard, Scripted::Unreachable)
    }

    fn set(self, shard: &str, behavior: Scripted) -> Self {
        self.behaviors
            .lock()
            .unwrap()
            .insert(ShardId::new(shard), behavior);
        self
    }

    pub fn calls(&self) -> Vec<ShardCall> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ShardTransport for ScriptedTransport {
    async fn send(&self, call: &ShardCall) -> Result<Value, TransportError> {
        self.calls.lock().unwrap().push(call.clone());
        if self.unavailable {
            return Err(TransportError::Unavailable {
                message: "no connections".to_string(),
            });
        }

        let behavior = self.behaviors.lock().unwrap().get(&call.shard).cloned();
        if let Some(Scripted::Slow(delay)) = &behavior {
            tokio::time::sleep(*delay).await;
        }
        self.log.push(format!("call:{}", call.shard));

        match behavior {
            Some(Scripted::Failing(message)) => Err(TransportError::ShardFailed {
                shard: call.shard.clone(),
                message,
            }),
            Some(Scripted::Unreachable) => Err(TransportError::Unreachable {
                shard: call.shard.clone(),
                message: "connection refused".to_string(),
            }),
            _ => Ok(json!({
                "shard": call.shard.as_str(),
                "purpose": call.purpose.bits(),
                "requests": call.request_ids.len(),
            })),
        }
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

pub fn registry(components: Vec<ScriptedComponent>) -> Arc<ComponentRegistry> {
    let mut registry = ComponentRegistry::new();
    for component in components {
        let name = component.name.clone();
        registry = registry.with(name, Arc::new(component)).unwrap();
    }
    Arc::new(registry)
}

pub fn coordinator(
    components: Vec<ScriptedComponent>,
    transport: Arc<ScriptedTransport>,
    config: CoordinatorConfig,
) -> StageCoordinator {
    StageCoordinator::new(registry(components), transport, config)
}

pub fn fast_config() -> CoordinatorConfig {
    CoordinatorConfig {
        shard_timeout_ms: 500,
        ..CoordinatorConfig::default()
    }
}
