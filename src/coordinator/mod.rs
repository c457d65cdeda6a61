//! Stage-barrier coordinator
//!
//! Drives one request through its rounds:
//!
//! 1. every component votes for the earliest stage it still needs
//! 2. the minimum vote wins; `Stage::DONE` from everybody ends the request
//! 3. components that voted for the winning stage build shard requests, in
//!    registration order
//! 4. the batch is coalesced per shard and sent concurrently; the round waits
//!    for every call to answer or time out (the barrier)
//! 5. each builder receives the responses to its own requests
//! 6. every component gets `finish_stage`
//!
//! Failures of a component inside a round, and failed or timed out shards,
//! only degrade the response. Failures in `prepare`/`process`, an unavailable
//! transport, cancellation, the request deadline and the round ceiling abort
//! the request.

mod cancel;
mod dispatch;
mod outcome;

use std::{
    ops::Range,
    sync::Arc,
    time::{Duration, Instant},
};

use chrono::Utc;
pub use cancel::{cancellation, CancelHandle, CancelSignal};
pub use outcome::{Degradation, DegradedPhase, RoundSummary, SearchResponse};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    component::ComponentRegistry,
    config::{CoordinatorConfig, PartialResultsPolicy},
    context::{RequestContext, SearchRequest},
    error::{CoordinatorError, CoordinatorResult},
    stage::{self, Stage},
    transport::ShardTransport,
};

enum Interrupt {
    Cancelled,
    DeadlineExceeded,
}

/// Runs requests through the registered components. Cheap to share; every
/// request gets its own [`RequestContext`].
pub struct StageCoordinator {
    registry: Arc<ComponentRegistry>,
    transport: Arc<dyn ShardTransport>,
    config: CoordinatorConfig,
}

impl StageCoordinator {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        transport: Arc<dyn ShardTransport>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            transport,
            config,
        }
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.registry
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub async fn execute(&self, request: SearchRequest) -> CoordinatorResult<SearchResponse> {
        self.execute_with_cancel(request, CancelSignal::never())
            .await
    }

    /// Execute a request that can be cancelled from outside. Cancelling drops
    /// the in-flight shard calls of the current round and discards the
    /// request's state.
    pub async fn execute_with_cancel(
        &self,
        request: SearchRequest,
        mut cancel: CancelSignal,
    ) -> CoordinatorResult<SearchResponse> {
        let started_at = Utc::now();
        let start = Instant::now();
        let policy = request
            .partial_results
            .unwrap_or(self.config.partial_results);
        let request_timeout = self.config.request_timeout();

        let mut ctx = RequestContext::new(request, Arc::clone(&self.registry));
        let span = info_span!(
            "shard_coordination",
            request_id = %ctx.request_id(),
            shards = ctx.shards().len(),
            distributed = ctx.is_distributed(),
        );

        let outcome = async {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Interrupt::Cancelled),
                _ = deadline(request_timeout) => Err(Interrupt::DeadlineExceeded),
                result = self.run(&mut ctx, policy) => Ok(result),
            }
        }
        .instrument(span.clone())
        .await;

        let _entered = span.enter();
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                error!(
                    function = "StageCoordinator::execute",
                    code = e.code(),
                    error = %e,
                    "Request aborted"
                );
                return Err(e);
            }
            Err(Interrupt::Cancelled) => {
                warn!(stage = %ctx.stage(), round = ctx.round(), "Request cancelled");
                return Err(CoordinatorError::Cancelled {
                    request_id: ctx.request_id().to_string(),
                    stage: ctx.stage(),
                });
            }
            Err(Interrupt::DeadlineExceeded) => {
                let timeout_ms = self.config.request_timeout_ms.unwrap_or_default();
                warn!(
                    stage = %ctx.stage(),
                    round = ctx.round(),
                    timeout_ms,
                    "Request deadline exceeded"
                );
                return Err(CoordinatorError::DeadlineExceeded {
                    request_id: ctx.request_id().to_string(),
                    stage: ctx.stage(),
                    timeout_ms,
                });
            }
        }

        let (request_id, result, degradations, rounds) = ctx.into_parts();
        let response = SearchResponse::new(
            request_id,
            result,
            degradations,
            rounds,
            started_at,
            start.elapsed(),
        );
        info!(
            rounds = response.round_count(),
            partial = response.partial,
            elapsed_ms = response.elapsed_ms,
            "Request completed"
        );
        Ok(response)
    }

    async fn run(
        &self,
        ctx: &mut RequestContext,
        policy: PartialResultsPolicy,
    ) -> CoordinatorResult<()> {
        let registry = ctx.registry_handle();

        for entry in registry.iter() {
            entry.component.prepare(ctx).await.map_err(|source| {
                error!(
                    function = "StageCoordinator::run",
                    component = %entry.name(),
                    error = %source,
                    "Component prepare failed"
                );
                CoordinatorError::PrepareFailed {
                    request_id: ctx.request_id().to_string(),
                    component: entry.name().to_string(),
                    source,
                }
            })?;
        }

        if !ctx.is_distributed() {
            for entry in registry.iter() {
                entry.component.process(ctx).await.map_err(|source| {
                    error!(
                        function = "StageCoordinator::run",
                        component = %entry.name(),
                        error = %source,
                        "Component process failed"
                    );
                    CoordinatorError::ProcessFailed {
                        request_id: ctx.request_id().to_string(),
                        component: entry.name().to_string(),
                        source,
                    }
                })?;
            }
            return Ok(());
        }

        loop {
            let votes: Vec<Stage> = registry
                .iter()
                .map(|entry| entry.component.next_stage(ctx))
                .collect();
            let next = stage::earliest(votes.iter().copied());

            if next.is_done() {
                debug!(rounds = ctx.round(), "All components voted done");
                return Ok(());
            }

            if ctx.round() >= self.config.max_rounds {
                return Err(CoordinatorError::NotConverged {
                    request_id: ctx.request_id().to_string(),
                    rounds: ctx.round(),
                    stage: ctx.stage(),
                });
            }

            if next < ctx.stage() {
                warn!(
                    current = %ctx.stage(),
                    voted = %next,
                    "Stage vote below current stage"
                );
            }

            self.run_round(ctx, &registry, &votes, next, policy).await?;
        }
    }

    async fn run_round(
        &self,
        ctx: &mut RequestContext,
        registry: &ComponentRegistry,
        votes: &[Stage],
        next: Stage,
        policy: PartialResultsPolicy,
    ) -> CoordinatorResult<()> {
        let round_start = Instant::now();
        ctx.begin_round(next);
        let round = ctx.round();
        let stage = ctx.stage();
        let degraded_before = ctx.degradations().len();

        // Build: only the components whose vote won, one after another
        let mut builders = Vec::new();
        let mut issued: Vec<(usize, Range<usize>)> = Vec::new();
        for (index, entry) in registry.iter().enumerate() {
            if votes[index] != next {
                continue;
            }
            builders.push(entry.name().to_string());

            match entry.component.build_shard_requests(ctx).await {
                Ok(requests) => {
                    let first = ctx.outgoing().len();
                    for mut request in requests {
                        for other in registry.iter() {
                            other
                                .component
                                .modify_request(ctx, &entry.config, &mut request);
                        }
                        ctx.push_outgoing(Arc::clone(&entry.config), index, request);
                    }
                    let last = ctx.outgoing().len();
                    if last > first {
                        issued.push((index, first..last));
                    }
                }
                Err(e) => {
                    warn!(
                        component = %entry.name(),
                        stage = %stage,
                        error = %e,
                        "Component failed to build shard requests"
                    );
                    ctx.record_degradation(Degradation::component(
                        round,
                        stage,
                        DegradedPhase::BuildRequests,
                        entry.name(),
                        e.to_string(),
                    ));
                }
            }
        }

        // Dispatch and wait for every call: the barrier
        let plan = dispatch::plan(
            ctx.outgoing(),
            ctx.shards(),
            self.config.coalesce_requests,
            self.config.shard_timeout(),
        );
        debug!(
            round,
            stage = %stage,
            builders = ?builders,
            requests = ctx.outgoing().len(),
            calls = plan.calls.len(),
            "Dispatching round"
        );

        let outcomes = if plan.calls.is_empty() {
            Vec::new()
        } else {
            dispatch::send_all(
                self.transport.as_ref(),
                &plan.calls,
                self.config.max_concurrent_calls,
            )
            .await
            .map_err(|down| {
                error!(
                    function = "StageCoordinator::run_round",
                    transport = self.transport.name(),
                    shard = %down.shard,
                    error = %down.message,
                    "Shard transport unavailable"
                );
                CoordinatorError::TransportUnavailable {
                    request_id: ctx.request_id().to_string(),
                    shard: down.shard,
                    message: down.message,
                }
            })?
        };

        let mut failed_calls = 0;
        for outcome in &outcomes {
            if let Err(error) = &outcome.result {
                failed_calls += 1;
                ctx.record_degradation(Degradation::shard(round, stage, error));
            }
        }

        let completed = Arc::new(dispatch::correlate(ctx.outgoing(), &plan, &outcomes));
        ctx.set_completed(Arc::clone(&completed));

        // Deliver each builder exactly its own requests
        for (index, range) in issued {
            let Some(entry) = registry.get(index) else {
                continue;
            };
            let own = &completed[range];
            if let Err(e) = entry.component.handle_responses(ctx, own).await {
                warn!(
                    component = %entry.name(),
                    stage = %stage,
                    error = %e,
                    "Component failed to handle shard responses"
                );
                ctx.record_degradation(Degradation::component(
                    round,
                    stage,
                    DegradedPhase::HandleResponses,
                    entry.name(),
                    e.to_string(),
                ));
            }
        }

        for entry in registry.iter() {
            if let Err(e) = entry.component.finish_stage(ctx).await {
                warn!(
                    component = %entry.name(),
                    stage = %stage,
                    error = %e,
                    "Component failed to finish stage"
                );
                ctx.record_degradation(Degradation::component(
                    round,
                    stage,
                    DegradedPhase::FinishStage,
                    entry.name(),
                    e.to_string(),
                ));
            }
        }

        let requests = ctx.outgoing().len();
        ctx.record_round(RoundSummary {
            round,
            stage,
            builders,
            requests,
            calls: plan.calls.len(),
            failed_calls,
            elapsed_ms: round_start.elapsed().as_millis() as u64,
        });

        if policy == PartialResultsPolicy::Strict {
            if let Some(first) = ctx.degradations().get(degraded_before) {
                return Err(CoordinatorError::PartialResultsRejected {
                    request_id: ctx.request_id().to_string(),
                    stage,
                    reason: first.message.clone(),
                });
            }
        }

        Ok(())
    }
}

async fn deadline(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => tokio::time::sleep(timeout).await,
        None => std::future::pending().await,
    }
}
