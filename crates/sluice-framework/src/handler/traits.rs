//! Handler system for the Sluice framework.
//!
//! This module defines the [`Handler`] trait. Handlers are plain async
//! functions taking the request DTO first, followed by any number of
//! extractors, and returning `Result<Op::Response, E>`:
//!
//! ```rust,ignore
//! async fn hello(request: Hello) -> Result<HelloResponse, ServiceError> {
//!     Ok(HelloResponse { result: format!("Hello, {}!", request.name) })
//! }
//!
//! async fn checkout(
//!     request: Checkout,
//!     gateway: Gateway,
//!     Inject(repo): Inject<OrderRepository>,
//! ) -> Result<CheckoutResponse, ServiceError> {
//!     let total = gateway.send(PriceCart { id: request.cart }).await?;
//!     // ...
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use sluice_core::{Operation, RequestContext, ServiceError, ServiceResult};

use crate::extractor::FromContext;

// ============================================================================
// HandlerResponse
// ============================================================================

/// A handler return value that resolves to a response or a fault.
pub trait HandlerResponse<R>: Send + 'static {
    fn into_result(self) -> ServiceResult<R>;
}

impl<R, E> HandlerResponse<R> for Result<R, E>
where
    R: Send + 'static,
    E: Into<ServiceError> + Send + 'static,
{
    fn into_result(self) -> ServiceResult<R> {
        self.map_err(Into::into)
    }
}

// ============================================================================
// Handler Trait
// ============================================================================

/// The handler of an operation `Op`.
///
/// Automatically implemented for async functions that:
/// - Take `Op` followed by 0-8 parameters implementing [`FromContext`]
/// - Return a type implementing [`HandlerResponse`]
///
/// A failing extractor fails the call with the extractor's fault.
#[async_trait]
pub trait Handler<Op: Operation, T>: Clone + Send + Sync + 'static {
    /// Calls the handler.
    async fn call(self, ctx: Arc<RequestContext>, request: Op) -> ServiceResult<Op::Response>;
}

macro_rules! impl_handler {
    (
        $($ty:ident),*
    ) => {
        #[allow(non_snake_case)]
        #[async_trait]
        impl<F, Fut, Res, Op, $($ty,)*> Handler<Op, ($($ty,)*)> for F
        where
            Op: Operation,
            F: FnOnce(Op, $($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Res> + Send + 'static,
            Res: HandlerResponse<Op::Response>,
            $( $ty: FromContext + Send + 'static, )*
        {
            async fn call(self, ctx: Arc<RequestContext>, request: Op) -> ServiceResult<Op::Response> {
                $(
                    let $ty = $ty::from_context(&ctx)?;
                )*

                (self)(request, $($ty,)*).await.into_result()
            }
        }
    };
}

// Generate implementations for 0-8 extractors
impl_handler!();
impl_handler!(T1);
impl_handler!(T1, T2);
impl_handler!(T1, T2, T3);
impl_handler!(T1, T2, T3, T4);
impl_handler!(T1, T2, T3, T4, T5);
impl_handler!(T1, T2, T3, T4, T5, T6);
impl_handler!(T1, T2, T3, T4, T5, T6, T7);
impl_handler!(T1, T2, T3, T4, T5, T6, T7, T8);
