//! Shard transport abstraction
//!
//! The coordinator never talks to the network itself. It hands each coalesced
//! [`ShardCall`] to a [`ShardTransport`] supplied by the embedding application
//! and enforces the per-shard timeout around the returned future.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::shard::{Purpose, RequestId, ShardId};

/// One wire call to one shard, carrying one or more coalesced requests
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShardCall {
    pub shard: ShardId,
    /// Union of the purposes of every request folded into this call
    pub purpose: Purpose,
    pub params: Map<String, Value>,
    /// Requests of the round answered by this call
    pub request_ids: Vec<RequestId>,
    /// Timeout the coordinator will enforce; transports may use it for their
    /// own socket deadlines
    pub timeout: Duration,
}

impl ShardCall {
    pub(crate) fn new(
        shard: ShardId,
        request_id: RequestId,
        purpose: Purpose,
        params: Map<String, Value>,
        timeout: Duration,
    ) -> Self {
        Self {
            shard,
            purpose,
            params,
            request_ids: vec![request_id],
            timeout,
        }
    }

    /// Fold another request into this call when it carries exactly the same
    /// parameters. A key set by only one side counts as a conflict, so no
    /// request ever runs with a parameter it did not send. Returns false and
    /// leaves the call untouched on conflict.
    pub(crate) fn try_absorb(
        &mut self,
        request_id: RequestId,
        purpose: Purpose,
        params: &Map<String, Value>,
    ) -> bool {
        if self.params != *params {
            return false;
        }

        self.purpose |= purpose;
        self.request_ids.push(request_id);
        true
    }

    pub fn carries(&self, request_id: RequestId) -> bool {
        self.request_ids.contains(&request_id)
    }
}

/// Transport-level failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The shard answered with an error
    #[error("Shard {shard} returned an error: {message}")]
    ShardFailed { shard: ShardId, message: String },

    /// The shard could not be reached; other shards are unaffected
    #[error("Shard {shard} unreachable: {message}")]
    Unreachable { shard: ShardId, message: String },

    /// The transport itself cannot serve any call. Fatal for the request.
    #[error("Transport unavailable: {message}")]
    Unavailable { message: String },
}

impl TransportError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Unavailable { .. })
    }
}

/// Send a call to a shard and return its payload
#[async_trait]
pub trait ShardTransport: Send + Sync {
    async fn send(&self, call: &ShardCall) -> Result<Value, TransportError>;

    /// Transport name for logging
    fn name(&self) -> &'static str {
        "shard_transport"
    }
}
