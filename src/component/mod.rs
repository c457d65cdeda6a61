//! Pluggable request components
//!
//! A component contributes one slice of a search response. On the distributed
//! path it is advanced round by round by the [`StageCoordinator`]: it votes for
//! the next stage it needs, builds shard requests when its stage comes up,
//! consumes the responses to those requests and gets a bookkeeping call at the
//! end of every round.
//!
//! Components are shared by every in-flight request. Anything that belongs to
//! a single request lives in the [`RequestContext`], never in the component.
//!
//! # Voting contract
//!
//! Once a component has been serviced at stage `S` it must not vote for a stage
//! `<= S` again. The coordinator does not check this; a component that breaks
//! it keeps the request looping until the configured round ceiling is hit.
//!
//! [`StageCoordinator`]: crate::coordinator::StageCoordinator

mod registry;

use async_trait::async_trait;
pub use registry::{
    ComponentConfig, ComponentFactories, ComponentFactory, ComponentInfo, ComponentRegistry,
    RegisteredComponent,
};

use crate::{
    context::RequestContext,
    error::ComponentResult,
    shard::{CompletedRequest, ShardRequest},
    stage::Stage,
};

/// Coarse grouping of components for introspection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Query,
    Highlighting,
    Faceting,
    Debug,
    #[default]
    Other,
}

/// Capability set of a request component
#[async_trait]
pub trait Component: Send + Sync {
    /// Static type name for logging; the configured instance name lives in
    /// [`ComponentConfig`]
    fn kind(&self) -> &'static str;

    fn description(&self) -> &'static str {
        ""
    }

    fn category(&self) -> Category {
        Category::Other
    }

    /// Called exactly once per request before any other hook, in registration
    /// order. An error aborts the request.
    async fn prepare(&self, ctx: &mut RequestContext) -> ComponentResult<()>;

    /// Single-node path only: produce this component's contribution directly.
    /// An error aborts the request.
    async fn process(&self, ctx: &mut RequestContext) -> ComponentResult<()>;

    /// Earliest stage this component still wants to run, or `Stage::DONE`
    fn next_stage(&self, _ctx: &RequestContext) -> Stage {
        Stage::DONE
    }

    /// Called when this component's vote won the round. Returned requests are
    /// appended to the round's outbound batch in order.
    async fn build_shard_requests(
        &self,
        _ctx: &mut RequestContext,
    ) -> ComponentResult<Vec<ShardRequest>> {
        Ok(Vec::new())
    }

    /// Called on every component each time any component adds a request to
    /// the batch, so parameters or purposes can be piggybacked onto it.
    fn modify_request(
        &self,
        _ctx: &RequestContext,
        _owner: &ComponentConfig,
        _request: &mut ShardRequest,
    ) {
    }

    /// Responses to the requests this component built in the current round.
    /// Only called for components that issued at least one request.
    async fn handle_responses(
        &self,
        _ctx: &mut RequestContext,
        _completed: &[CompletedRequest],
    ) -> ComponentResult<()> {
        Ok(())
    }

    /// End-of-round hook, called on every component after all responses of
    /// the round were handled
    async fn finish_stage(&self, _ctx: &mut RequestContext) -> ComponentResult<()> {
        Ok(())
    }
}
