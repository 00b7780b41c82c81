//! Configuration module for the Sluice runtime.
//!
//! Layered loading (defaults, files, environment, overrides) and validation
//! of host, gateway routing, messaging, batch and logging settings.

pub mod error;
pub mod loader;
pub mod schema;
pub mod validation;

pub use error::{ConfigError, ConfigResult};
pub use loader::{ConfigLoader, Profile, load_config, load_config_from_file};
pub use schema::{
    BatchConfig, GatewayConfig, HostConfig, LogFormat, LogLevel, LogOutput, LoggingConfig,
    MessagingConfig, RouteTarget, SluiceConfig, SpanEventConfig,
};
pub use validation::validate_config;
