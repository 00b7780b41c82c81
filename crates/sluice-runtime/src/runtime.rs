//! Runtime orchestration: configuration, host assembly and lifecycle.
//!
//! The runtime loads a [`SluiceConfig`], installs logging, builds the
//! [`ServiceHost`] with the configured options, gateway routes and message
//! queue, and drives the transports until shutdown.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use sluice_runtime::SluiceRuntime;
//!
//! let runtime = SluiceRuntime::builder()
//!     .config_file("config/sluice.yaml")
//!     .host(|host| host.handler(hello).handler(checkout))
//!     .build()?;
//!
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::signal;
use tracing::{debug, info, warn};

use sluice_framework::{FilterStages, HostBuilder, RoutingGatewayFactory, ServiceHost};
use sluice_transport::ListenerHandle;

use crate::config::{ConfigLoader, GatewayConfig, SluiceConfig, validate_config};
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::mq::BackgroundMq;

type Configure = Box<dyn FnOnce(HostBuilder) -> HostBuilder + Send>;

/// The Sluice runtime: a configured [`ServiceHost`] and its transports.
///
/// # Lifecycle
///
/// [`start`](Self::start) starts the message queue workers and, when
/// `host.listen` is set, the HTTP server. [`stop`](Self::stop) shuts both
/// down. [`run`](Self::run) does both around a wait for Ctrl+C or SIGTERM.
pub struct SluiceRuntime {
    config: SluiceConfig,
    host: Arc<ServiceHost>,
    mq: Option<Arc<BackgroundMq>>,
    listener: Mutex<Option<ListenerHandle>>,
    running: AtomicBool,
}

impl SluiceRuntime {
    /// Creates a runtime builder for custom configuration.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let runtime = SluiceRuntime::builder()
    ///     .config_file("config/production.yaml")
    ///     .profile("production")
    ///     .build()?;
    /// ```
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from a loaded configuration and no handlers.
    pub fn from_config(config: &SluiceConfig) -> RuntimeResult<Self> {
        Self::assemble(config.clone(), Vec::new())
    }

    fn assemble(config: SluiceConfig, configure: Vec<Configure>) -> RuntimeResult<Self> {
        validate_config(&config)?;
        logging::init_from_config(&config.logging);

        let mut builder = ServiceHost::builder().max_gateway_depth(config.host.max_gateway_depth);
        if config.host.in_process_global_filters {
            builder = builder.in_process_stages(FilterStages::ALL);
        }
        if let Some(limit) = config.batch.max_size {
            builder = builder.max_batch_size(limit);
        }

        let mq = config
            .messaging
            .enabled
            .then(|| Arc::new(BackgroundMq::new(&config.messaging)));
        if let Some(mq) = &mq {
            builder = builder.message_producer(mq.clone());
        }

        if let Some(factory) = remote_routes(&config.gateway)? {
            builder = builder.gateway_factory(factory);
        }

        for configure in configure {
            builder = configure(builder);
        }
        let host = builder.build();

        info!(
            log_level = %config.logging.level,
            messaging = config.messaging.enabled,
            remote = config.gateway.uses_remote(),
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config,
            host,
            mq,
            listener: Mutex::new(None),
            running: AtomicBool::new(false),
        })
    }

    /// Returns a reference to the configuration.
    pub fn config(&self) -> &SluiceConfig {
        &self.config
    }

    pub fn host(&self) -> &Arc<ServiceHost> {
        &self.host
    }

    /// The message queue, when messaging is enabled.
    pub fn message_queue(&self) -> Option<&Arc<BackgroundMq>> {
        self.mq.as_ref()
    }

    /// The bound HTTP address while the server is running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.lock().as_ref().map(ListenerHandle::local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Starts the message queue and the configured listeners.
    pub async fn start(&self) -> RuntimeResult<()> {
        if self.running.swap(true, Ordering::AcqRel) {
            warn!("Runtime is already running");
            return Ok(());
        }

        info!("Starting Sluice runtime");

        if let Some(mq) = &self.mq {
            mq.start(&self.host);
        }

        if let Some(addr) = &self.config.host.listen {
            match self.listen(addr).await {
                Ok(handle) => *self.listener.lock() = Some(handle),
                Err(e) => {
                    self.running.store(false, Ordering::Release);
                    if let Some(mq) = &self.mq {
                        mq.stop().await;
                    }
                    return Err(e);
                }
            }
        }

        info!("Runtime started");
        Ok(())
    }

    #[cfg(feature = "http-server")]
    async fn listen(&self, addr: &str) -> RuntimeResult<ListenerHandle> {
        sluice_transport::serve(Arc::clone(&self.host), addr)
            .await
            .map_err(RuntimeError::from)
    }

    #[cfg(not(feature = "http-server"))]
    async fn listen(&self, _addr: &str) -> RuntimeResult<ListenerHandle> {
        Err(RuntimeError::TransportUnavailable("http-server"))
    }

    /// Stops the listeners and the message queue.
    pub async fn stop(&self) -> RuntimeResult<()> {
        if !self.running.swap(false, Ordering::AcqRel) {
            warn!("Runtime is not running");
            return Ok(());
        }

        info!("Stopping Sluice runtime");

        let listener = self.listener.lock().take();
        if let Some(listener) = listener {
            debug!(id = %listener.id, "Stopping listener");
            listener.stop();
        }
        if let Some(mq) = &self.mq {
            mq.stop().await;
        }

        info!("Runtime stopped");
        Ok(())
    }

    /// Runs the runtime until a shutdown signal is received.
    pub async fn run(&self) -> RuntimeResult<()> {
        self.start().await?;

        info!("Sluice runtime is now running. Press Ctrl+C to stop.");

        let signalled = wait_for_shutdown().await;
        self.stop().await?;
        signalled
    }

    /// Runs the runtime with a custom shutdown future.
    pub async fn run_until<F>(&self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;

        shutdown.await;

        self.stop().await
    }
}

impl std::fmt::Debug for SluiceRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SluiceRuntime")
            .field("host", &self.host)
            .field("mq", &self.mq)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Waits for shutdown signals (Ctrl+C or SIGTERM).
async fn wait_for_shutdown() -> RuntimeResult<()> {
    #[cfg(unix)]
    {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

        tokio::select! {
            result = signal::ctrl_c() => {
                result?;
                info!("Received Ctrl+C, shutting down");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
            }
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await?;
        info!("Received Ctrl+C, shutting down");
    }

    Ok(())
}

/// Builds the routing gateway factory for configured remote routes.
#[cfg(feature = "http-client")]
fn remote_routes(config: &GatewayConfig) -> RuntimeResult<Option<RoutingGatewayFactory>> {
    use crate::config::{ConfigError, RouteTarget};
    use sluice_framework::{GatewayTarget, RouteTable};
    use sluice_transport::JsonServiceClient;

    if !config.uses_remote() {
        return Ok(None);
    }

    let url = config
        .remote_url
        .as_deref()
        .ok_or_else(|| ConfigError::missing_field("gateway.remote_url"))?;
    let mut client = JsonServiceClient::with_timeout(url, config.timeout())?;
    if let Some(token) = &config.bearer_token {
        client = client.with_bearer_token(token.clone());
    }
    let remote = GatewayTarget::remote(client);
    let target = |route: RouteTarget| match route {
        RouteTarget::Local => GatewayTarget::Local,
        RouteTarget::Remote => remote.clone(),
    };

    let mut table = RouteTable::new().fallback(target(config.default_route));
    for (name, route) in &config.routes {
        table = table.route_name(name, target(*route));
    }

    debug!(url, routes = config.routes.len(), "Remote gateway routes configured");
    Ok(Some(RoutingGatewayFactory::from_table(table)))
}

#[cfg(not(feature = "http-client"))]
fn remote_routes(config: &GatewayConfig) -> RuntimeResult<Option<RoutingGatewayFactory>> {
    if config.uses_remote() {
        return Err(RuntimeError::TransportUnavailable("http-client"));
    }
    Ok(None)
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Builder for creating a `SluiceRuntime` with custom configuration.
///
/// Handlers, filters and services are registered through
/// [`host`](Self::host); they are applied after the configured options, so
/// code wins over configuration.
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    configure: Vec<Configure>,
}

impl RuntimeBuilder {
    /// Creates a new runtime builder.
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new().with_current_dir(),
            configure: Vec::new(),
        }
    }

    /// Sets a specific configuration file to load.
    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    /// Sets the configuration profile (e.g., "development", "production").
    pub fn profile(mut self, profile: impl Into<String>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    /// Adds a search path for configuration files.
    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    /// Enables loading environment variables (enabled by default).
    pub fn with_env(mut self) -> Self {
        self.config_loader = self.config_loader.with_env();
        self
    }

    /// Disables loading environment variables.
    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Merges additional configuration programmatically.
    pub fn merge(mut self, config: SluiceConfig) -> Self {
        self.config_loader = self.config_loader.merge(config);
        self
    }

    /// Configures the host: handlers, filters, services.
    pub fn host<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(HostBuilder) -> HostBuilder + Send + 'static,
    {
        self.configure.push(Box::new(configure));
        self
    }

    /// Loads the configuration and builds the runtime.
    pub fn build(self) -> RuntimeResult<SluiceRuntime> {
        let config = self.config_loader.load()?;
        SluiceRuntime::assemble(config, self.configure)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde::{Deserialize, Serialize};
    use sluice_core::{Describe, Operation, ServiceError};
    use sluice_framework::Gateway;

    use crate::config::RouteTarget;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Audit {
        entry: String,
    }
    impl Describe for Audit {}
    impl Operation for Audit {
        const NAME: &'static str = "Audit";
        type Response = ();
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Record {
        entry: String,
    }
    impl Describe for Record {}
    impl Operation for Record {
        const NAME: &'static str = "Record";
        type Response = ();
    }

    async fn audit(_request: Audit) -> Result<(), ServiceError> {
        Ok(())
    }

    async fn record(request: Record, gateway: Gateway) -> Result<(), ServiceError> {
        gateway
            .publish(Audit {
                entry: request.entry,
            })
            .await?;
        Ok(())
    }

    #[test]
    fn applies_host_options_from_config() {
        let mut config = SluiceConfig::default();
        config.host.max_gateway_depth = 4;
        config.host.in_process_global_filters = true;
        config.batch.max_size = Some(2);

        let runtime = SluiceRuntime::from_config(&config).unwrap();
        let options = runtime.host().options();
        assert_eq!(options.max_gateway_depth, 4);
        assert_eq!(options.in_process_stages, FilterStages::ALL);
        assert_eq!(options.max_batch_size, Some(2));
        assert!(runtime.message_queue().is_none());
    }

    #[test]
    fn rejects_invalid_config() {
        let mut config = SluiceConfig::default();
        config.messaging.capacity = 0;
        assert!(matches!(
            SluiceRuntime::from_config(&config),
            Err(RuntimeError::Config(_))
        ));
    }

    #[cfg(not(feature = "http-client"))]
    #[test]
    fn remote_routes_need_the_http_client() {
        let mut config = SluiceConfig::default();
        config.gateway.remote_url = Some("http://127.0.0.1:9".to_string());
        config
            .gateway
            .routes
            .insert("Audit".to_string(), RouteTarget::Remote);
        assert!(matches!(
            SluiceRuntime::from_config(&config),
            Err(RuntimeError::TransportUnavailable("http-client"))
        ));
    }

    #[cfg(feature = "http-client")]
    #[test]
    fn remote_routes_build_a_routing_factory() {
        let mut config = SluiceConfig::default();
        config.gateway.remote_url = Some("http://127.0.0.1:9".to_string());
        config
            .gateway
            .routes
            .insert("Audit".to_string(), RouteTarget::Remote);
        assert!(remote_routes(&config.gateway).unwrap().is_some());
        assert!(SluiceRuntime::from_config(&config).is_ok());
    }

    #[tokio::test]
    async fn queued_messages_run_between_start_and_stop() {
        let mut config = SluiceConfig::default();
        config.messaging.enabled = true;
        config.messaging.workers = 1;

        let runtime = SluiceRuntime::assemble(
            config,
            vec![Box::new(|host: HostBuilder| host.handler(audit).handler(record)) as Configure],
        )
        .unwrap();
        runtime.start().await.unwrap();
        assert!(runtime.is_running());

        let host = runtime.host();
        let info = sluice_core::OperationInfo::of::<Record>();
        let ctx = Arc::new(host.new_context(&info, sluice_core::Verb::Post));
        host.execute(
            ctx,
            Box::new(Record {
                entry: "login".to_string(),
            }),
        )
        .await
        .unwrap();

        let mq = runtime.message_queue().unwrap();
        tokio::time::timeout(Duration::from_secs(5), async {
            while mq.stats().processed < 1 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(mq.stats().failed, 0);

        runtime.stop().await.unwrap();
        assert!(!runtime.is_running());
        assert!(!mq.is_running());
    }

    #[tokio::test]
    async fn run_until_starts_and_stops() {
        let runtime = SluiceRuntime::from_config(&SluiceConfig::default()).unwrap();
        runtime.run_until(async {}).await.unwrap();
        assert!(!runtime.is_running());
    }

    #[cfg(feature = "http-server")]
    #[tokio::test]
    async fn start_binds_the_configured_listener() {
        let mut config = SluiceConfig::default();
        config.host.listen = Some("127.0.0.1:0".to_string());

        let runtime = SluiceRuntime::from_config(&config).unwrap();
        runtime.start().await.unwrap();
        assert!(runtime.local_addr().is_some());

        runtime.stop().await.unwrap();
        assert!(runtime.local_addr().is_none());
    }

    #[cfg(not(feature = "http-server"))]
    #[tokio::test]
    async fn listen_without_the_http_server_fails() {
        let mut config = SluiceConfig::default();
        config.host.listen = Some("127.0.0.1:0".to_string());

        let runtime = SluiceRuntime::from_config(&config).unwrap();
        assert!(matches!(
            runtime.start().await,
            Err(RuntimeError::TransportUnavailable("http-server"))
        ));
        assert!(!runtime.is_running());
    }
}
