//! Configuration schema definitions.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SluiceConfig {
    /// The service host.
    #[serde(default)]
    pub host: HostConfig,

    /// Gateway routing.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Background execution of one-way messages.
    #[serde(default)]
    pub messaging: MessagingConfig,

    /// Batch limits.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

// =============================================================================
// Host
// =============================================================================

/// Service host configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    /// Address the HTTP server binds to, e.g. `127.0.0.1:8080`. No server
    /// is started when unset.
    #[serde(default)]
    pub listen: Option<String>,

    /// Deepest allowed nesting of in-process gateway calls.
    #[serde(default = "default_max_gateway_depth")]
    pub max_gateway_depth: u32,

    /// Run global filters for in-process gateway calls too.
    #[serde(default)]
    pub in_process_global_filters: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            listen: None,
            max_gateway_depth: default_max_gateway_depth(),
            in_process_global_filters: false,
        }
    }
}

fn default_max_gateway_depth() -> u32 {
    32
}

// =============================================================================
// Gateway
// =============================================================================

/// Where an operation is routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteTarget {
    /// The local host.
    #[default]
    Local,
    /// The remote host at `gateway.remote_url`.
    Remote,
}

/// Gateway routing configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Target of operations without an explicit route.
    #[serde(default)]
    pub default_route: RouteTarget,

    /// Explicit routes by operation name.
    #[serde(default)]
    pub routes: HashMap<String, RouteTarget>,

    /// Base URL of the remote host.
    #[serde(default)]
    pub remote_url: Option<String>,

    /// Bearer token sent to the remote host.
    #[serde(default)]
    pub bearer_token: Option<String>,

    /// Remote call timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            default_route: RouteTarget::Local,
            routes: HashMap::new(),
            remote_url: None,
            bearer_token: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl GatewayConfig {
    /// Returns `true` if any operation is routed to the remote host.
    pub fn uses_remote(&self) -> bool {
        self.default_route == RouteTarget::Remote
            || self.routes.values().any(|r| *r == RouteTarget::Remote)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_timeout_ms() -> u64 {
    30000
}

// =============================================================================
// Messaging and batches
// =============================================================================

/// Background message queue configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Queue one-way messages instead of running each on its own task.
    #[serde(default)]
    pub enabled: bool,

    /// Number of worker tasks draining the queue.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Queue capacity; publishers wait when it is full.
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            workers: default_workers(),
            capacity: default_capacity(),
        }
    }
}

fn default_workers() -> usize {
    1
}

fn default_capacity() -> usize {
    1024
}

/// Batch configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Most items accepted in one batch; unlimited when unset.
    #[serde(default)]
    pub max_size: Option<usize>,
}

// =============================================================================
// Logging
// =============================================================================

/// Log level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Error => "error",
        }
    }

    pub fn to_tracing_level(self) -> tracing::Level {
        match self {
            Self::Trace => tracing::Level::TRACE,
            Self::Debug => tracing::Level::DEBUG,
            Self::Info => tracing::Level::INFO,
            Self::Warn => tracing::Level::WARN,
            Self::Error => tracing::Level::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Log line format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Full,
    Pretty,
    #[cfg(feature = "json-log")]
    Json,
}

/// Log destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

/// Which span lifecycle events are logged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpanEventConfig {
    #[serde(default)]
    pub new: bool,
    #[serde(default)]
    pub enter: bool,
    #[serde(default)]
    pub exit: bool,
    #[serde(default)]
    pub close: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub level: LogLevel,

    #[serde(default)]
    pub format: LogFormat,

    #[serde(default)]
    pub output: LogOutput,

    /// Log file, for `output = "file"`.
    #[serde(default)]
    pub file_path: Option<PathBuf>,

    #[serde(default)]
    pub span_events: SpanEventConfig,

    /// Include thread IDs.
    #[serde(default)]
    pub thread_ids: bool,

    /// Include source file and line.
    #[serde(default)]
    pub file_location: bool,

    /// Per-target levels, e.g. `sluice_framework = "debug"`.
    #[serde(default)]
    pub filters: HashMap<String, LogLevel>,
}
