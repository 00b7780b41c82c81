//! Sluice Runtime - Orchestration layer for the Sluice service gateway.
//!
//! This crate provides:
//! - Layered configuration loading and validation (`SluiceConfig`)
//! - Logging configuration
//! - An in-memory background message queue (`BackgroundMq`)
//! - Runtime orchestration (`SluiceRuntime`)
//!
//! # Transports
//!
//! Transports are enabled through cargo features:
//!
//! - `http-server`: serves the host on `host.listen`
//! - `http-client`: routes operations configured as `remote` to
//!   `gateway.remote_url`
//!
//! ```ignore
//! use sluice_runtime::SluiceRuntime;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let runtime = SluiceRuntime::builder()
//!         .host(|host| host.handler(hello))
//!         .build()?;
//!
//!     // Run until Ctrl+C
//!     runtime.run().await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! ```yaml
//! host:
//!   listen: 0.0.0.0:8080
//!   max_gateway_depth: 16
//! gateway:
//!   default_route: local
//!   routes:
//!     GetInvoice: remote
//!   remote_url: http://billing:8080
//! messaging:
//!   enabled: true
//!   workers: 4
//! logging:
//!   level: debug
//! ```

pub mod config;
pub mod error;
pub mod logging;
pub mod mq;
pub mod runtime;

// Re-exports
pub use config::{ConfigError, ConfigLoader, ConfigResult, SluiceConfig};
pub use error::{RuntimeError, RuntimeResult};
pub use logging::{LoggingBuilder, SpanEvents};
pub use mq::{BackgroundMq, MqStats};
pub use runtime::{RuntimeBuilder, SluiceRuntime};

// Re-export tracing for use by other crates
pub use tracing;
pub use tracing_subscriber;

/// Prelude module for convenient imports.
///
/// This provides all the commonly used logging macros:
/// - `trace!`, `debug!`, `info!`, `warn!`, `error!`
/// - `span`, `event`
/// - `instrument` attribute
/// - `Level` for span creation
pub mod prelude {
    pub use tracing::{Level, debug, error, info, instrument, span, trace, warn};
}
