//! # Sluice Framework
//!
//! The request pipeline of the Sluice service gateway.
//!
//! This layer provides:
//! - Filter registration, per-operation resolution and ordered execution
//! - Handler trait for Axum-style parameter injection, as tower services
//! - Verb routing per operation ([`ServiceController`])
//! - The call pipeline with scopes and cancellation ([`ServiceHost`])
//! - Gateways that run operations in-process or on a remote endpoint
//! - Batched execution ([`BatchDispatcher`]) and request validation
//!
//! ```text
//! request ─▶ gateway ─▶ global ─▶ typed ─▶ attribute ─▶ handler
//!                                                          │
//! response ◀─ gateway ◀─ global ◀─ typed ◀─ attribute ◀────┘
//! ```

pub mod batch;
pub mod controller;
pub mod error;
pub mod extractor;
pub mod filter;
pub mod gateway;
pub mod handler;
pub mod host;
pub mod validation;

pub use batch::{AUTO_BATCH_COMPLETED_HEADER, BatchDispatcher, BatchFailure, BatchResult};
pub use controller::ServiceController;
pub use error::{ExtractError, ExtractResult, GatewayDepthExceeded};
pub use extractor::{FromContext, Inject, Session};
pub use filter::{
    FilterChainExecutor, FilterRegistry, FilterStages, ResolvedFilters, TypedFilter,
    TypedFilterDispatcher,
};
pub use gateway::{
    Gateway, GatewayFactory, GatewayTarget, InProcessGateway, InProcessGatewayFactory,
    RouteTable, RoutingGateway, RoutingGatewayFactory, StaticGatewayFactory,
};
pub use handler::{Handler, HandlerResponse, HandlerService, Invocation, OperationService};
pub use host::{HostBuilder, HostOptions, Outcome, ServiceHost};
pub use validation::{Emptiness, RuleSet, Validator, validate};
