//! # Sluice
//!
//! A typed service gateway with an async request-filter pipeline for Rust.
//!
//! ## Overview
//!
//! Every call, whether it arrives over HTTP, from a message queue or from a
//! handler calling another operation through its gateway, runs through the
//! same pipeline of filters before and after its handler:
//!
//! ```text
//! ┌───────────┐    ┌─────────────┐    ┌──────────────────────────────────┐    ┌─────────┐
//! │ Transport │───▶│ ServiceHost │───▶│ gateway ▶ global ▶ typed ▶ attr  │───▶│ Handler │
//! │ HTTP / MQ │    │  (context,  │    │                                  │    │         │
//! └───────────┘    │   scope)    │◀───│ gateway ◀ global ◀ typed ◀ attr  │◀───│         │
//!                  └─────────────┘    └──────────────────────────────────┘    └─────────┘
//!                         ▲                                                        │
//!                         └──────────────── Gateway (in-process / remote) ◀───────┘
//! ```
//!
//! - **Core**: DTOs, operations, filter contracts, faults, the request context
//! - **Framework**: filter registry and dispatch, handlers, the host, gateways,
//!   batches and validation
//! - **Transport**: the JSON/HTTP server and client
//! - **Runtime**: configuration, logging, the message queue and lifecycle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sluice::prelude::*;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Hello { name: String }
//! impl Describe for Hello {}
//! impl Operation for Hello {
//!     const NAME: &'static str = "Hello";
//!     type Response = HelloResponse;
//! }
//!
//! async fn hello(request: Hello) -> Result<HelloResponse, ServiceError> {
//!     Ok(HelloResponse { result: format!("Hello, {}!", request.name) })
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = SluiceRuntime::builder()
//!         .host(|host| {
//!             host.handler(hello).filters(|f| {
//!                 f.global_request_filter(|ctx, _| {
//!                     ctx.set_item("seen", true);
//!                     Ok(())
//!                 });
//!             })
//!         })
//!         .build()?;
//!
//!     runtime.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Features
//!
//! - `toml-config` / `yaml-config`: configuration file formats
//! - `json-log`: JSON log output
//! - `http-server`: serve the host over JSON/HTTP (default)
//! - `http-client`: route operations to a remote host (default)

pub use sluice_core as core;
pub use sluice_framework as framework;
pub use sluice_runtime as runtime;
pub use sluice_transport as transport;

/// Prelude module for convenient imports.
///
/// ```rust,ignore
/// use sluice::prelude::*;
/// ```
pub mod prelude {
    // Runtime - main entry point
    pub use sluice_runtime::{SluiceConfig, SluiceRuntime};

    // Host and pipeline
    pub use sluice_framework::{
        FilterRegistry, FilterStages, HostBuilder, Outcome, ServiceHost, TypedFilter,
    };

    // Extractors and gateways - for handler parameters
    pub use sluice_framework::{FromContext, Gateway, Inject, Session};

    // Validation
    pub use sluice_framework::{RuleSet, Validator};

    // Core vocabulary
    pub use sluice_core::prelude::*;
    pub use sluice_core::{ResponseError, ResponseStatus};

    #[cfg(feature = "http-client")]
    pub use sluice_transport::JsonServiceClient;
}
