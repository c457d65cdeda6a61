//! Round dispatch: coalesce the outbound batch into wire calls, send them
//! concurrently and correlate the responses back to the requests.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use futures::future::join_all;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    context::OutgoingRequest,
    shard::{CompletedRequest, ShardError, ShardId, ShardResponse},
    transport::{ShardCall, ShardTransport, TransportError},
};

/// Wire calls for one round plus the resolved targets of every request
#[derive(Debug)]
pub(crate) struct DispatchPlan {
    pub calls: Vec<ShardCall>,
    /// Resolved shards per outbound request, indexed like the batch
    pub targets: Vec<Vec<ShardId>>,
}

/// Outcome of a single wire call
#[derive(Debug, Clone)]
pub(crate) struct CallOutcome {
    pub result: Result<Value, ShardError>,
    pub elapsed: Duration,
}

/// The transport reported it cannot serve calls at all
#[derive(Debug)]
pub(crate) struct TransportDown {
    pub shard: ShardId,
    pub message: String,
}

/// Group the batch by shard. Calls are ordered by the request's shard order
/// and, within one shard, by the position of their first request.
pub(crate) fn plan(
    outgoing: &[OutgoingRequest],
    shards: &[ShardId],
    coalesce: bool,
    timeout: Duration,
) -> DispatchPlan {
    let targets: Vec<Vec<ShardId>> = outgoing
        .iter()
        .map(|o| o.request.target.resolve(shards))
        .collect();

    let mut calls = Vec::new();
    for shard in shards {
        let mut shard_calls: Vec<ShardCall> = Vec::new();
        for (outgoing, targets) in outgoing.iter().zip(&targets) {
            if !targets.contains(shard) {
                continue;
            }

            let request = &outgoing.request;
            let mut absorbed = false;
            if coalesce {
                for call in shard_calls.iter_mut() {
                    if call.try_absorb(outgoing.id, request.purpose, &request.params) {
                        absorbed = true;
                        break;
                    }
                }
            }

            if !absorbed {
                shard_calls.push(ShardCall::new(
                    shard.clone(),
                    outgoing.id,
                    request.purpose,
                    request.params.clone(),
                    timeout,
                ));
            }
        }
        calls.extend(shard_calls);
    }

    DispatchPlan { calls, targets }
}

async fn send_one(transport: &dyn ShardTransport, call: &ShardCall) -> Result<CallOutcome, TransportDown> {
    let start = Instant::now();
    let sent = tokio::time::timeout(call.timeout, transport.send(call)).await;
    let elapsed = start.elapsed();

    let result = match sent {
        Ok(Ok(payload)) => Ok(payload),
        Ok(Err(TransportError::Unavailable { message })) => {
            return Err(TransportDown {
                shard: call.shard.clone(),
                message,
            });
        }
        Ok(Err(TransportError::ShardFailed { message, .. })) => Err(ShardError::Failed {
            shard: call.shard.clone(),
            message,
        }),
        Ok(Err(TransportError::Unreachable { message, .. })) => Err(ShardError::Unreachable {
            shard: call.shard.clone(),
            message,
        }),
        Err(_) => Err(ShardError::Timeout {
            shard: call.shard.clone(),
            timeout_ms: call.timeout.as_millis() as u64,
        }),
    };

    if let Err(error) = &result {
        warn!(
            shard = %call.shard,
            purpose = %call.purpose,
            elapsed_ms = elapsed.as_millis() as u64,
            error = %error,
            "Shard call failed"
        );
    } else {
        debug!(
            shard = %call.shard,
            purpose = %call.purpose,
            elapsed_ms = elapsed.as_millis() as u64,
            "Shard call completed"
        );
    }

    Ok(CallOutcome { result, elapsed })
}

/// Send every call concurrently and wait for all of them. Outcomes are
/// returned in call order regardless of completion order.
pub(crate) async fn send_all(
    transport: &dyn ShardTransport,
    calls: &[ShardCall],
    max_concurrent: Option<usize>,
) -> Result<Vec<CallOutcome>, TransportDown> {
    let outcomes: Vec<Result<CallOutcome, TransportDown>> = match max_concurrent {
        Some(limit) if limit < calls.len() => {
            stream::iter(calls.iter().map(|call| send_one(transport, call)))
                .buffered(limit)
                .collect()
                .await
        }
        _ => join_all(calls.iter().map(|call| send_one(transport, call))).await,
    };

    outcomes.into_iter().collect()
}

/// Attach every call outcome to the requests it answers
pub(crate) fn correlate(
    outgoing: &[OutgoingRequest],
    plan: &DispatchPlan,
    outcomes: &[CallOutcome],
) -> Vec<CompletedRequest> {
    let mut by_request_and_shard: HashMap<(usize, &ShardId), usize> = HashMap::new();
    for (call_index, call) in plan.calls.iter().enumerate() {
        for request_id in &call.request_ids {
            by_request_and_shard.insert((request_id.index(), &call.shard), call_index);
        }
    }

    outgoing
        .iter()
        .zip(&plan.targets)
        .map(|(outgoing, targets)| {
            let responses = targets
                .iter()
                .filter_map(|shard| {
                    let call_index = by_request_and_shard.get(&(outgoing.id.index(), shard))?;
                    let outcome = &outcomes[*call_index];
                    Some(ShardResponse {
                        shard: shard.clone(),
                        outcome: outcome.result.clone(),
                        elapsed: outcome.elapsed,
                    })
                })
                .collect();

            CompletedRequest {
                id: outgoing.id,
                owner: outgoing.owner.name.clone(),
                request: outgoing.request.clone(),
                shards: targets.clone(),
                responses,
            }
        })
        .collect()
}
