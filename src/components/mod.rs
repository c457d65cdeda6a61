//! Components shipped with the crate
//!
//! [`QueryComponent`] runs the usual two-phase distributed query. [`DebugComponent`]
//! rides along on the query's shard requests and reports what every shard did.

mod debug;
mod query;

pub use debug::DebugComponent;
pub use query::{QueryComponent, DEFAULT_ROWS};
