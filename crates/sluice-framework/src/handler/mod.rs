//! Handler and service system for the Sluice framework.
//!
//! - **Handler** ([`traits`]): the [`Handler`] trait, implemented for async
//!   functions with parameter injection, similar to Axum's system
//! - **Service** ([`service`]): the [`HandlerService`] wrapper implementing
//!   `tower::Service<Invocation>`
//!
//! ```text
//! ServiceBuilder::new()
//!     .layer(TimeoutLayer)      ← any tower layer
//!     .service(HandlerService)  ← calls the handler with extracted params
//! ```

pub mod service;
pub mod traits;

pub use service::{HandlerService, Invocation, OperationService};
pub use traits::{Handler, HandlerResponse};

pub use tower::Layer;
