//! The service host and its request pipeline.
//!
//! A [`ServiceHost`] owns everything a call needs once configuration is
//! over: the frozen filter registry, the typed filter cache, the controller,
//! the dependency container and the gateway policy. Each call runs:
//!
//! ```text
//! route ─▶ request filters ─▶ handler ─▶ response filters ─▶ Outcome
//!              │ ended / cancelled           │ cancelled
//!              └──────────────▶ Outcome ◀────┘
//! ```
//!
//! The call's dependency scope is attached before the first filter and
//! released exactly once when the call finishes, whichever way it finishes.

use std::fmt;
use std::sync::Arc;

use tower::{Layer, Service, ServiceExt};
use tracing::{Instrument, debug, debug_span, warn};

use sluice_core::{
    BoxedDto, ChainFlow, Container, MessageProducer, NotImplementedError, Operation,
    OperationInfo, Provenance, QueuedMessage, RequestContext, ServiceError, ServiceResult,
    Verb,
};

use crate::batch::{BatchDispatcher, BatchResult};
use crate::controller::ServiceController;
use crate::error::GatewayDepthExceeded;
use crate::filter::{FilterChainExecutor, FilterRegistry, FilterStages, TypedFilterDispatcher};
use crate::gateway::{Gateway, GatewayFactory, InProcessGatewayFactory};
use crate::handler::{Handler, HandlerService, Invocation};

// ============================================================================
// Outcome
// ============================================================================

/// How a call finished, when it did not fail.
#[derive(Debug)]
pub enum Outcome {
    /// The handler ran; carries the (filtered) response.
    Completed(BoxedDto),
    /// A request filter ended the call, optionally writing a response.
    ShortCircuited(Option<BoxedDto>),
    /// The call was cancelled. There is no response.
    Cancelled,
}

impl Outcome {
    /// The response, if the call produced one.
    pub fn into_response(self) -> Option<BoxedDto> {
        match self {
            Self::Completed(response) => Some(response),
            Self::ShortCircuited(response) => response,
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

// ============================================================================
// Options
// ============================================================================

/// Tunables of a [`ServiceHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostOptions {
    /// Filter groups for external and queued calls.
    pub external_stages: FilterStages,
    /// Filter groups for in-process gateway calls.
    pub in_process_stages: FilterStages,
    /// Deepest allowed nesting of in-process gateway calls.
    pub max_gateway_depth: u32,
    /// Most items accepted in one batch; unlimited when `None`.
    pub max_batch_size: Option<usize>,
}

impl Default for HostOptions {
    fn default() -> Self {
        Self {
            external_stages: FilterStages::EXTERNAL,
            in_process_stages: FilterStages::IN_PROCESS,
            max_gateway_depth: 32,
            max_batch_size: None,
        }
    }
}

type ErrorHandler = Arc<dyn Fn(&RequestContext, &ServiceError) + Send + Sync>;

// ============================================================================
// HostBuilder
// ============================================================================

/// Configures a [`ServiceHost`].
///
/// ```rust,ignore
/// let host = ServiceHost::builder()
///     .handler(hello)
///     .filters(|f| {
///         f.global_request_filter(|ctx, _| { ctx.set_item("seen", true); Ok(()) });
///     })
///     .services(|c| {
///         c.scoped(|_| UnitOfWork::default());
///     })
///     .build();
/// ```
#[derive(Default)]
pub struct HostBuilder {
    controller: ServiceController,
    registry: FilterRegistry,
    container: Container,
    producer: Option<Arc<dyn MessageProducer>>,
    gateway_factory: Option<Arc<dyn GatewayFactory>>,
    options: HostOptions,
    error_handlers: Vec<ErrorHandler>,
}

impl HostBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler under any verb.
    pub fn handler<Op, H, T>(mut self, handler: H) -> Self
    where
        Op: Operation,
        H: Handler<Op, T>,
        T: Send + 'static,
    {
        self.controller.register(handler);
        self
    }

    /// Registers a handler under one verb.
    pub fn handler_for<Op, H, T>(mut self, verb: Verb, handler: H) -> Self
    where
        Op: Operation,
        H: Handler<Op, T>,
        T: Send + 'static,
    {
        self.controller.register_verb(verb, handler);
        self
    }

    /// Registers a handler wrapped in a tower layer.
    pub fn layered_handler<Op, H, T, L>(mut self, layer: L, handler: H) -> Self
    where
        Op: Operation,
        H: Handler<Op, T>,
        T: Send + 'static,
        L: Layer<HandlerService<H, Op, T>>,
        L::Service: Service<Invocation, Response = BoxedDto, Error = ServiceError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Invocation>>::Future: Send + 'static,
    {
        self.controller.register_layered(layer, handler);
        self
    }

    /// Configures the filter registry.
    pub fn filters(mut self, configure: impl FnOnce(&mut FilterRegistry)) -> Self {
        configure(&mut self.registry);
        self
    }

    /// Configures the dependency container.
    pub fn services(mut self, configure: impl FnOnce(&mut Container)) -> Self {
        configure(&mut self.container);
        self
    }

    /// Sends published messages to `producer` instead of running them on
    /// detached tasks.
    pub fn message_producer(mut self, producer: Arc<dyn MessageProducer>) -> Self {
        self.producer = Some(producer);
        self
    }

    /// Sets the factory building the gateway handed to handlers.
    pub fn gateway_factory(mut self, factory: impl GatewayFactory + 'static) -> Self {
        self.gateway_factory = Some(Arc::new(factory));
        self
    }

    pub fn options(mut self, options: HostOptions) -> Self {
        self.options = options;
        self
    }

    /// Selects the filter groups run for in-process gateway calls.
    pub fn in_process_stages(mut self, stages: FilterStages) -> Self {
        self.options.in_process_stages = stages;
        self
    }

    pub fn max_gateway_depth(mut self, depth: u32) -> Self {
        self.options.max_gateway_depth = depth;
        self
    }

    pub fn max_batch_size(mut self, limit: usize) -> Self {
        self.options.max_batch_size = Some(limit);
        self
    }

    /// Observes every fault at the call boundary.
    pub fn on_service_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&RequestContext, &ServiceError) + Send + Sync + 'static,
    {
        self.error_handlers.push(Arc::new(handler));
        self
    }

    /// Freezes the configuration.
    pub fn build(self) -> Arc<ServiceHost> {
        let registry = Arc::new(self.registry);
        debug!(
            operations = self.controller.operations().count(),
            registry = ?registry,
            "Service host built"
        );
        Arc::new(ServiceHost {
            dispatcher: TypedFilterDispatcher::new(Arc::clone(&registry)),
            chain: FilterChainExecutor::new(Arc::clone(&registry)),
            registry,
            controller: self.controller,
            container: Arc::new(self.container),
            producer: self.producer,
            gateway_factory: self
                .gateway_factory
                .unwrap_or_else(|| Arc::new(InProcessGatewayFactory)),
            options: self.options,
            error_handlers: self.error_handlers,
        })
    }
}

// ============================================================================
// ServiceHost
// ============================================================================

/// Executes operations through the filter pipeline.
pub struct ServiceHost {
    controller: ServiceController,
    registry: Arc<FilterRegistry>,
    dispatcher: TypedFilterDispatcher,
    chain: FilterChainExecutor,
    container: Arc<Container>,
    producer: Option<Arc<dyn MessageProducer>>,
    gateway_factory: Arc<dyn GatewayFactory>,
    options: HostOptions,
    error_handlers: Vec<ErrorHandler>,
}

/// Releases the call's scope when the call ends, even if its future is
/// dropped midway.
struct ScopeGuard<'a>(&'a RequestContext);

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        self.0.release_scope();
    }
}

impl ServiceHost {
    pub fn builder() -> HostBuilder {
        HostBuilder::new()
    }

    /// Creates the context of an external call to `info`.
    pub fn new_context(&self, info: &OperationInfo, verb: Verb) -> RequestContext {
        RequestContext::new(info.name(), verb)
    }

    /// Looks up an operation by name.
    pub fn operation(&self, name: &str) -> Option<OperationInfo> {
        self.controller.operation(name)
    }

    /// Returns the gateway bound to `ctx`.
    pub fn gateway(self: &Arc<Self>, ctx: &Arc<RequestContext>) -> Gateway {
        self.gateway_factory.gateway(self, ctx)
    }

    pub fn controller(&self) -> &ServiceController {
        &self.controller
    }

    pub fn registry(&self) -> &FilterRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &TypedFilterDispatcher {
        &self.dispatcher
    }

    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    pub fn options(&self) -> &HostOptions {
        &self.options
    }

    /// Executes one call through the full pipeline.
    pub async fn execute(
        self: &Arc<Self>,
        ctx: Arc<RequestContext>,
        request: BoxedDto,
    ) -> ServiceResult<Outcome> {
        let span = debug_span!(
            "dispatch",
            id = ctx.id(),
            operation = ctx.operation(),
            verb = %ctx.verb(),
            provenance = ?ctx.provenance(),
        );

        async move {
            ctx.set_extension(Arc::clone(self));
            ctx.attach_scope(self.container.scope());
            let _scope = ScopeGuard(&ctx);

            let result = self.run(&ctx, request).await;
            match &result {
                Ok(Outcome::Completed(_)) => debug!("Call completed"),
                Ok(Outcome::ShortCircuited(response)) => {
                    debug!(has_response = response.is_some(), "Call ended by a filter")
                }
                Ok(Outcome::Cancelled) => debug!("Call cancelled"),
                Err(err) => self.report(&ctx, err),
            }
            result
        }
        .instrument(span)
        .await
    }

    /// Executes a batch of requests of one operation.
    pub async fn execute_batch(
        self: &Arc<Self>,
        parent: &Arc<RequestContext>,
        info: &OperationInfo,
        requests: Vec<BoxedDto>,
    ) -> BatchResult {
        BatchDispatcher::new(Arc::clone(self))
            .execute(parent, info, requests)
            .await
    }

    /// Executes a message taken off a queue.
    pub async fn execute_message(
        self: &Arc<Self>,
        message: QueuedMessage,
    ) -> ServiceResult<Outcome> {
        let ctx = RequestContext::with_provenance(
            message.info.name(),
            message.info.gateway_verb(),
            Provenance::Message,
        );
        self.execute(Arc::new(ctx), message.body).await
    }

    /// Publishes a one-way request: hands it to the message producer, or
    /// runs it on a detached task. Never waits for the handler.
    pub async fn enqueue(
        self: &Arc<Self>,
        ctx: &RequestContext,
        info: &OperationInfo,
        request: BoxedDto,
    ) -> ServiceResult<()> {
        if self.controller.info_of(info.request_type()).is_none() && self.producer.is_none() {
            return Err(NotImplementedError::new(format!(
                "No handler registered for '{}'",
                info.name()
            ))
            .into());
        }

        if let Some(producer) = &self.producer {
            debug!(operation = info.name(), "Publishing message");
            return Ok(producer.publish(QueuedMessage::new(*info, request)).await?);
        }

        let message = Arc::new(ctx.detached(info.name(), info.gateway_verb()));
        let host = Arc::clone(self);
        tokio::spawn(async move {
            // Faults are already reported by execute.
            let _ = host.execute(message, request).await;
        });
        Ok(())
    }

    fn stages_for(&self, ctx: &RequestContext) -> FilterStages {
        match ctx.provenance() {
            Provenance::InProcess { .. } => self.options.in_process_stages,
            Provenance::External | Provenance::Message => self.options.external_stages,
        }
    }

    async fn run(&self, ctx: &Arc<RequestContext>, mut request: BoxedDto) -> ServiceResult<Outcome> {
        let depth = ctx.provenance().depth();
        if depth > self.options.max_gateway_depth {
            return Err(GatewayDepthExceeded {
                depth,
                limit: self.options.max_gateway_depth,
            }
            .into());
        }

        let info = self
            .controller
            .info_of(request.dto_type_id())
            .ok_or_else(|| {
                ServiceError::from(NotImplementedError::new(format!(
                    "No handler registered for '{}'",
                    request.type_name()
                )))
            })?;
        let service = self.controller.route(&info, ctx.verb())?;
        let resolved = self.dispatcher.resolve(&info);
        let stages = self.stages_for(ctx);

        match self
            .chain
            .run_request_filters(ctx, request.as_mut(), &resolved, stages)
            .await?
        {
            // A response set without ending the request is discarded.
            ChainFlow::Continue => drop(ctx.take_response()),
            ChainFlow::Ended => return Ok(Outcome::ShortCircuited(ctx.take_response())),
            ChainFlow::Cancelled => return Ok(Outcome::Cancelled),
        }

        let invocation = Invocation::new(Arc::clone(ctx), request);
        let mut response = tokio::select! {
            biased;
            _ = ctx.cancellation_token().cancelled() => return Ok(Outcome::Cancelled),
            response = service.oneshot(invocation) => response?,
        };
        if ctx.is_cancelled() {
            return Ok(Outcome::Cancelled);
        }

        let flow = self
            .chain
            .run_response_filters(ctx, response.as_mut(), &resolved, stages)
            .await?;
        if flow == ChainFlow::Cancelled {
            return Ok(Outcome::Cancelled);
        }

        // A response filter may replace the response outright.
        if let Some(replaced) = ctx.take_response() {
            response = replaced;
        }
        Ok(Outcome::Completed(response))
    }

    fn report(&self, ctx: &RequestContext, err: &ServiceError) {
        if err.status_code() >= 500 {
            warn!(error = %err, "Call failed");
        } else {
            debug!(error = %err, "Call failed");
        }
        for handler in &self.error_handlers {
            handler(ctx, err);
        }
    }
}

impl fmt::Debug for ServiceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHost")
            .field("controller", &self.controller)
            .field("registry", &self.registry)
            .field("options", &self.options)
            .field("has_producer", &self.producer.is_some())
            .finish_non_exhaustive()
    }
}
