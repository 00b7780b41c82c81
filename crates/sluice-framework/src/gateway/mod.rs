//! Gateways: one API for in-process and remote calls.
//!
//! Handlers receive a [`Gateway`] bound to their call. Whether an operation
//! runs in-process or on a remote endpoint is decided per call by the host's
//! [`GatewayFactory`]; the caller sees the same responses and the same
//! [`ServiceError`](sluice_core::ServiceError) faults either way.
//!
//! ```text
//! Gateway::send ─▶ RoutingGateway ─┬─▶ InProcessGateway ─▶ ServiceHost::execute
//!                                  └─▶ remote ServiceGateway (HTTP, ...)
//! ```

pub mod in_process;
pub mod routing;

use std::fmt;
use std::sync::Arc;

use sluice_core::{
    BoxedDto, GatewayError, GatewayResult, Operation, OperationInfo, RequestContext,
    ServiceGateway, TransportError,
};

use crate::host::ServiceHost;

pub use in_process::InProcessGateway;
pub use routing::{
    GatewayTarget, InProcessGatewayFactory, RouteTable, RoutingGateway, RoutingGatewayFactory,
    StaticGatewayFactory,
};

/// Builds the gateway handed to a call.
///
/// Called once per call that asks for a gateway; gateways are never cached
/// across calls because they are bound to the calling context.
pub trait GatewayFactory: Send + Sync {
    fn gateway(&self, host: &Arc<ServiceHost>, ctx: &Arc<RequestContext>) -> Gateway;
}

/// The typed gateway facade.
#[derive(Clone)]
pub struct Gateway {
    inner: Arc<dyn ServiceGateway>,
}

impl Gateway {
    pub fn new(inner: Arc<dyn ServiceGateway>) -> Self {
        Self { inner }
    }

    /// Wraps a gateway implementation.
    pub fn from_service(gateway: impl ServiceGateway + 'static) -> Self {
        Self::new(Arc::new(gateway))
    }

    /// The underlying untyped gateway.
    pub fn inner(&self) -> &Arc<dyn ServiceGateway> {
        &self.inner
    }

    /// Sends a request and waits for its response.
    ///
    /// Returns `Ok(None)` if the call was cancelled or ended without a
    /// response.
    pub async fn send<Op: Operation>(&self, request: Op) -> GatewayResult<Option<Op::Response>> {
        let info = OperationInfo::of::<Op>();
        match self.inner.send_dto(&info, Box::new(request)).await? {
            Some(response) => downcast_response::<Op>(response).map(Some),
            None => Ok(None),
        }
    }

    /// Sends a batch of requests; responses keep the input order.
    pub async fn send_all<Op: Operation>(
        &self,
        requests: Vec<Op>,
    ) -> GatewayResult<Option<Vec<Op::Response>>> {
        let info = OperationInfo::of::<Op>();
        let requests = requests
            .into_iter()
            .map(|r| Box::new(r) as BoxedDto)
            .collect();
        match self.inner.send_all_dtos(&info, requests).await? {
            Some(responses) => responses
                .into_iter()
                .map(downcast_response::<Op>)
                .collect::<GatewayResult<Vec<_>>>()
                .map(Some),
            None => Ok(None),
        }
    }

    /// Publishes a one-way request.
    pub async fn publish<Op: Operation>(&self, request: Op) -> GatewayResult<()> {
        let info = OperationInfo::of::<Op>();
        self.inner.publish_dto(&info, Box::new(request)).await
    }

    /// Publishes a batch of one-way requests.
    pub async fn publish_all<Op: Operation>(&self, requests: Vec<Op>) -> GatewayResult<()> {
        let info = OperationInfo::of::<Op>();
        let requests = requests
            .into_iter()
            .map(|r| Box::new(r) as BoxedDto)
            .collect();
        self.inner.publish_all_dtos(&info, requests).await
    }

    /// Blocking form of [`send`](Self::send) for synchronous code running on
    /// a multi-threaded tokio runtime.
    ///
    /// Fails with [`TransportError::RuntimeUnavailable`] outside of a tokio
    /// runtime.
    ///
    /// # Panics
    ///
    /// Panics when called from a current-thread runtime.
    pub fn send_blocking<Op: Operation>(&self, request: Op) -> GatewayResult<Option<Op::Response>> {
        let handle = tokio::runtime::Handle::try_current()
            .map_err(|e| TransportError::RuntimeUnavailable(e.to_string()))?;
        tokio::task::block_in_place(|| handle.block_on(self.send(request)))
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway").finish_non_exhaustive()
    }
}

fn downcast_response<Op: Operation>(response: BoxedDto) -> GatewayResult<Op::Response> {
    response
        .downcast::<Op::Response>()
        .map(|response| *response)
        .map_err(|other| GatewayError::ResponseType {
            expected: std::any::type_name::<Op::Response>(),
            got: other.type_name(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use sluice_core::{Describe, ServiceError, Verb};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping;
    impl Describe for Ping {}
    impl Operation for Ping {
        const NAME: &'static str = "Ping";
        type Response = String;
    }

    async fn ping(_request: Ping) -> Result<String, ServiceError> {
        Ok("pong".to_string())
    }

    fn gateway() -> Gateway {
        let host = ServiceHost::builder().handler(ping).build();
        let ctx = Arc::new(host.new_context(&OperationInfo::of::<Ping>(), Verb::Post));
        host.gateway(&ctx)
    }

    #[test]
    fn blocking_send_needs_a_runtime() {
        let err = gateway().send_blocking(Ping).unwrap_err();
        match err {
            GatewayError::Transport(TransportError::RuntimeUnavailable(_)) => {}
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn blocking_send_runs_on_a_multi_thread_runtime() {
        let gateway = gateway();
        let response = gateway.send_blocking(Ping).unwrap();
        assert_eq!(response.as_deref(), Some("pong"));
    }
}
