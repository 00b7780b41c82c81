//! The in-process gateway.

use std::sync::Arc;

use async_trait::async_trait;

use sluice_core::{
    BoxedDto, GatewayError, GatewayResult, OperationInfo, RequestContext, ServiceGateway,
};

use crate::batch::BatchDispatcher;
use crate::host::ServiceHost;

/// Executes operations on the local host, nested in the calling context.
///
/// Each call runs in a child context tagged as in-process: it inherits the
/// caller's session and is cancelled with it, uses the operation's declared
/// verb (or `POST`), and runs the host's in-process filter groups.
#[derive(Debug, Clone)]
pub struct InProcessGateway {
    host: Arc<ServiceHost>,
    ctx: Arc<RequestContext>,
}

impl InProcessGateway {
    pub fn new(host: Arc<ServiceHost>, ctx: Arc<RequestContext>) -> Self {
        Self { host, ctx }
    }

    fn child(&self, info: &OperationInfo) -> Arc<RequestContext> {
        Arc::new(self.ctx.child(info.name(), info.gateway_verb()))
    }
}

#[async_trait]
impl ServiceGateway for InProcessGateway {
    async fn send_dto(
        &self,
        info: &OperationInfo,
        request: BoxedDto,
    ) -> GatewayResult<Option<BoxedDto>> {
        let outcome = self.host.execute(self.child(info), request).await?;
        Ok(outcome.into_response())
    }

    async fn send_all_dtos(
        &self,
        info: &OperationInfo,
        requests: Vec<BoxedDto>,
    ) -> GatewayResult<Option<Vec<BoxedDto>>> {
        BatchDispatcher::new(Arc::clone(&self.host))
            .execute(&self.child(info), info, requests)
            .await
            .map_err(|failure| GatewayError::Service(failure.error))
    }

    async fn publish_dto(&self, info: &OperationInfo, request: BoxedDto) -> GatewayResult<()> {
        Ok(self.host.enqueue(&self.ctx, info, request).await?)
    }
}
