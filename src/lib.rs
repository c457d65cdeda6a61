//! Stage-barrier coordination of distributed search requests.
//!
//! A request is served by an ordered list of [`Component`]s. On a sharded
//! index the [`StageCoordinator`] advances them round by round: the earliest
//! stage any component still needs is run, the shard requests built for it are
//! sent concurrently, and nobody sees a response before every call of the
//! round has finished.

pub mod component;
pub mod components;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod error;
pub mod observability;
pub mod shard;
pub mod simulation;
pub mod stage;
pub mod transport;

pub use component::{
    Category, Component, ComponentConfig, ComponentFactories, ComponentInfo, ComponentRegistry,
};
pub use config::{
    ConfigError, ConfigResult, CoordinatorConfig, CoordinatorConfigBuilder, PartialResultsPolicy,
};
pub use context::{RequestContext, SearchRequest};
pub use coordinator::{
    cancellation, CancelHandle, CancelSignal, Degradation, DegradedPhase, RoundSummary,
    SearchResponse, StageCoordinator,
};
pub use error::{ComponentError, ComponentResult, CoordinatorError, CoordinatorResult};
pub use shard::{
    CompletedRequest, Purpose, RequestId, ShardError, ShardId, ShardRequest, ShardResponse,
    ShardTarget,
};
pub use stage::Stage;
pub use transport::{ShardCall, ShardTransport, TransportError};
