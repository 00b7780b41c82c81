//! Per-call gateway routing.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use sluice_core::{
    BoxedDto, GatewayResult, Operation, OperationInfo, RequestContext, ServiceGateway,
};

use super::{Gateway, GatewayFactory, InProcessGateway};
use crate::host::ServiceHost;

// =============================================================================
// Targets and route tables
// =============================================================================

/// Where a gateway call is executed.
#[derive(Clone)]
pub enum GatewayTarget {
    /// On the local host.
    Local,
    /// Through another gateway, typically a remote HTTP client.
    Remote(Arc<dyn ServiceGateway>),
}

impl GatewayTarget {
    pub fn remote(gateway: impl ServiceGateway + 'static) -> Self {
        Self::Remote(Arc::new(gateway))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local)
    }
}

impl fmt::Debug for GatewayTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => f.write_str("Local"),
            Self::Remote(_) => f.write_str("Remote"),
        }
    }
}

/// Explicit routes by operation type or name, with a fallback.
///
/// Type routes win over name routes; names are matched ignoring case.
#[derive(Debug, Clone)]
pub struct RouteTable {
    by_type: HashMap<TypeId, GatewayTarget>,
    by_name: HashMap<String, GatewayTarget>,
    fallback: GatewayTarget,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            by_type: HashMap::new(),
            by_name: HashMap::new(),
            fallback: GatewayTarget::Local,
        }
    }
}

impl RouteTable {
    /// Creates a table routing everything locally.
    pub fn new() -> Self {
        Self::default()
    }

    /// Routes `Op` to `target`.
    pub fn route<Op: Operation>(mut self, target: GatewayTarget) -> Self {
        self.by_type.insert(TypeId::of::<Op>(), target);
        self
    }

    /// Routes the operation named `name` to `target`.
    pub fn route_name(mut self, name: impl AsRef<str>, target: GatewayTarget) -> Self {
        self.by_name
            .insert(name.as_ref().to_ascii_lowercase(), target);
        self
    }

    /// Routes everything else to `target`.
    pub fn fallback(mut self, target: GatewayTarget) -> Self {
        self.fallback = target;
        self
    }

    /// Resolves the target of `info`.
    pub fn resolve(&self, info: &OperationInfo) -> GatewayTarget {
        self.by_type
            .get(&info.request_type())
            .or_else(|| self.by_name.get(&info.name().to_ascii_lowercase()))
            .unwrap_or(&self.fallback)
            .clone()
    }
}

// =============================================================================
// RoutingGateway
// =============================================================================

type Resolver = Arc<dyn Fn(&OperationInfo) -> GatewayTarget + Send + Sync>;

/// A gateway that picks its target on every call.
#[derive(Clone)]
pub struct RoutingGateway {
    resolver: Resolver,
    local: InProcessGateway,
}

impl RoutingGateway {
    fn target(&self, info: &OperationInfo) -> GatewayTarget {
        let target = (self.resolver)(info);
        trace!(operation = info.name(), ?target, "Resolved gateway target");
        target
    }
}

#[async_trait]
impl ServiceGateway for RoutingGateway {
    async fn send_dto(
        &self,
        info: &OperationInfo,
        request: BoxedDto,
    ) -> GatewayResult<Option<BoxedDto>> {
        match self.target(info) {
            GatewayTarget::Local => self.local.send_dto(info, request).await,
            GatewayTarget::Remote(remote) => remote.send_dto(info, request).await,
        }
    }

    async fn send_all_dtos(
        &self,
        info: &OperationInfo,
        requests: Vec<BoxedDto>,
    ) -> GatewayResult<Option<Vec<BoxedDto>>> {
        match self.target(info) {
            GatewayTarget::Local => self.local.send_all_dtos(info, requests).await,
            GatewayTarget::Remote(remote) => remote.send_all_dtos(info, requests).await,
        }
    }

    async fn publish_dto(&self, info: &OperationInfo, request: BoxedDto) -> GatewayResult<()> {
        match self.target(info) {
            GatewayTarget::Local => self.local.publish_dto(info, request).await,
            GatewayTarget::Remote(remote) => remote.publish_dto(info, request).await,
        }
    }

    async fn publish_all_dtos(
        &self,
        info: &OperationInfo,
        requests: Vec<BoxedDto>,
    ) -> GatewayResult<()> {
        match self.target(info) {
            GatewayTarget::Local => self.local.publish_all_dtos(info, requests).await,
            GatewayTarget::Remote(remote) => remote.publish_all_dtos(info, requests).await,
        }
    }
}

// =============================================================================
// Factories
// =============================================================================

/// Runs every gateway call on the local host. The default.
#[derive(Debug, Clone, Copy, Default)]
pub struct InProcessGatewayFactory;

impl GatewayFactory for InProcessGatewayFactory {
    fn gateway(&self, host: &Arc<ServiceHost>, ctx: &Arc<RequestContext>) -> Gateway {
        Gateway::from_service(InProcessGateway::new(Arc::clone(host), Arc::clone(ctx)))
    }
}

/// Sends every gateway call through one fixed gateway.
#[derive(Debug, Clone)]
pub struct StaticGatewayFactory {
    gateway: Gateway,
}

impl StaticGatewayFactory {
    pub fn new(gateway: Gateway) -> Self {
        Self { gateway }
    }
}

impl GatewayFactory for StaticGatewayFactory {
    fn gateway(&self, _host: &Arc<ServiceHost>, _ctx: &Arc<RequestContext>) -> Gateway {
        self.gateway.clone()
    }
}

/// Routes each gateway call by a resolver function, evaluated per call.
#[derive(Clone)]
pub struct RoutingGatewayFactory {
    resolver: Resolver,
}

impl RoutingGatewayFactory {
    pub fn new<F>(resolver: F) -> Self
    where
        F: Fn(&OperationInfo) -> GatewayTarget + Send + Sync + 'static,
    {
        Self {
            resolver: Arc::new(resolver),
        }
    }

    /// Routes by an explicit table.
    pub fn from_table(table: RouteTable) -> Self {
        Self::new(move |info| table.resolve(info))
    }
}

impl fmt::Debug for RoutingGatewayFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingGatewayFactory").finish_non_exhaustive()
    }
}

impl GatewayFactory for RoutingGatewayFactory {
    fn gateway(&self, host: &Arc<ServiceHost>, ctx: &Arc<RequestContext>) -> Gateway {
        Gateway::from_service(RoutingGateway {
            resolver: Arc::clone(&self.resolver),
            local: InProcessGateway::new(Arc::clone(host), Arc::clone(ctx)),
        })
    }
}
