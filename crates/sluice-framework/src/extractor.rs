//! Extractor system for the Sluice framework.
//!
//! Any type implementing [`FromContext`] can be used as a handler parameter
//! after the request DTO:
//!
//! - [`Arc<RequestContext>`]: the call's context
//! - [`Verb`]: the verb the call was made with
//! - [`Gateway`]: a gateway bound to the call, for nested calls
//! - [`Inject<T>`]: a dependency resolved from the call's scope
//! - [`Session<T>`]: the authenticated session
//! - [`Option<T>`]: any of the above, never failing
//!
//! If an extractor fails, the call fails with its fault and the handler is
//! not invoked.

use std::ops::Deref;
use std::sync::Arc;

use sluice_core::{RequestContext, Verb};

use crate::error::{ExtractError, ExtractResult};
use crate::gateway::Gateway;
use crate::host::ServiceHost;

/// A trait for types that can be extracted from a [`RequestContext`].
pub trait FromContext: Sized {
    /// Attempts to extract this type from the given context.
    fn from_context(ctx: &Arc<RequestContext>) -> ExtractResult<Self>;
}

impl FromContext for Arc<RequestContext> {
    fn from_context(ctx: &Arc<RequestContext>) -> ExtractResult<Self> {
        Ok(Arc::clone(ctx))
    }
}

impl FromContext for Verb {
    fn from_context(ctx: &Arc<RequestContext>) -> ExtractResult<Self> {
        Ok(ctx.verb())
    }
}

/// Implementation for `Option<T>` where `T: FromContext`.
impl<T: FromContext> FromContext for Option<T> {
    fn from_context(ctx: &Arc<RequestContext>) -> ExtractResult<Self> {
        Ok(T::from_context(ctx).ok())
    }
}

/// Extracts a gateway bound to the current call.
///
/// ```rust,ignore
/// async fn outer(request: Outer, gateway: Gateway) -> Result<OuterResponse, ServiceError> {
///     let inner = gateway.send(Inner { id: request.id }).await?;
///     Ok(OuterResponse { inner })
/// }
/// ```
impl FromContext for Gateway {
    fn from_context(ctx: &Arc<RequestContext>) -> ExtractResult<Self> {
        let host = ctx.extension::<ServiceHost>().ok_or(ExtractError::NoHost)?;
        Ok(host.gateway(ctx))
    }
}

/// A dependency resolved from the call's scope.
///
/// Scoped dependencies are shared by everything in the same call and
/// released when the call ends.
#[derive(Debug)]
pub struct Inject<T: ?Sized>(pub Arc<T>);

impl<T: Send + Sync + 'static> FromContext for Inject<T> {
    fn from_context(ctx: &Arc<RequestContext>) -> ExtractResult<Self> {
        ctx.resolve::<T>()
            .map(Inject)
            .ok_or(ExtractError::MissingDependency {
                type_name: std::any::type_name::<T>(),
            })
    }
}

impl<T: ?Sized> Deref for Inject<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: ?Sized> Clone for Inject<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

/// The authenticated session of the call.
///
/// Fails with a 401 fault when the call has no session of type `T`.
#[derive(Debug)]
pub struct Session<T: ?Sized>(pub Arc<T>);

impl<T: Send + Sync + 'static> FromContext for Session<T> {
    fn from_context(ctx: &Arc<RequestContext>) -> ExtractResult<Self> {
        ctx.session::<T>()
            .map(Session)
            .ok_or(ExtractError::MissingSession {
                type_name: std::any::type_name::<T>(),
            })
    }
}

impl<T: ?Sized> Deref for Session<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<T: ?Sized> Clone for Session<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}
