//! Core handler service for the Sluice framework.
//!
//! [`HandlerService<F, Op, T>`] wraps a single handler and implements
//! `tower::Service<Invocation>`. Cross-cutting concerns around one operation
//! are expressed as ordinary tower [`Layer`](tower::Layer)s stacked on top;
//! the controller erases the result into an [`OperationService`].

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::future::BoxFuture;
use tower::Service;
use tower::util::BoxCloneSyncService;

use sluice_core::{ArgumentError, BoxedDto, Operation, RequestContext, ServiceError};

use super::traits::Handler;

/// One handler call: the context and the (already filtered) request.
pub struct Invocation {
    pub ctx: Arc<RequestContext>,
    pub request: BoxedDto,
}

impl Invocation {
    pub fn new(ctx: Arc<RequestContext>, request: BoxedDto) -> Self {
        Self { ctx, request }
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("operation", &self.ctx.operation())
            .field("request", &self.request)
            .finish()
    }
}

/// A type-erased, `Clone + Send + Sync` service executing one operation.
pub type OperationService = BoxCloneSyncService<Invocation, BoxedDto, ServiceError>;

/// A tower [`Service`] that calls a single handler.
pub struct HandlerService<F, Op, T> {
    handler: F,
    _marker: PhantomData<fn() -> (Op, T)>,
}

impl<F, Op, T> HandlerService<F, Op, T> {
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

impl<F: Clone, Op, T> Clone for HandlerService<F, Op, T> {
    fn clone(&self) -> Self {
        HandlerService {
            handler: self.handler.clone(),
            _marker: PhantomData,
        }
    }
}

impl<F, Op, T> From<F> for HandlerService<F, Op, T> {
    fn from(handler: F) -> Self {
        HandlerService::new(handler)
    }
}

impl<F, Op, T> Service<Invocation> for HandlerService<F, Op, T>
where
    F: Handler<Op, T>,
    Op: Operation,
    T: 'static,
{
    type Response = BoxedDto;
    type Error = ServiceError;
    type Future = BoxFuture<'static, Result<BoxedDto, ServiceError>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, invocation: Invocation) -> Self::Future {
        let handler = self.handler.clone();
        async move {
            let Invocation { ctx, request } = invocation;
            let request = request.downcast::<Op>().map_err(|other| {
                ArgumentError::new(format!(
                    "'{}' cannot handle a '{}' request",
                    Op::NAME,
                    other.type_name()
                ))
            })?;
            let response = Handler::<Op, T>::call(handler, ctx, *request).await?;
            Ok::<BoxedDto, ServiceError>(Box::new(response))
        }
        .boxed()
    }
}
