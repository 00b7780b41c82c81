//! The request-filter pipeline.
//!
//! - [`registry`]: global, typed and gateway filter registration
//! - [`typed`]: per-operation resolution and caching of typed and attribute filters
//! - [`chain`]: ordered execution with short-circuit and cancellation

pub mod chain;
pub mod registry;
pub mod typed;

pub use chain::{FilterChainExecutor, FilterStages};
pub use registry::{FilterRegistry, TypedFilter};
pub use typed::{ResolvedFilters, TypedFilterDispatcher};
