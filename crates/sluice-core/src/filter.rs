//! Filter contracts.
//!
//! Every filter, synchronous or not, is invoked through the same async
//! contract: [`RequestFilter`] before the handler and [`ResponseFilter`]
//! after it. Plain closures are adapted with [`FilterFn`] (already-completed
//! futures) and [`AsyncFilterFn`].
//!
//! Filters attached to a DTO type's metadata are described by a
//! [`FilterAttribute`], which carries a priority, a verb mask and a factory
//! producing a fresh filter instance for every call.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::context::RequestContext;
use crate::dto::Dto;
use crate::error::{ServiceError, StatusError};
use crate::verb::{ApplyTo, Verb};

// ============================================================================
// Filter outcomes
// ============================================================================

/// Why a filter stopped the chain.
#[derive(Debug, Clone, Error)]
pub enum FilterError {
    /// The pending operation was cancelled. Not a fault: the call ends
    /// without a response.
    #[error("request cancelled")]
    Cancelled,

    /// The filter failed with a structured fault.
    #[error(transparent)]
    Fault(#[from] ServiceError),
}

impl<E: StatusError> From<E> for FilterError {
    fn from(err: E) -> Self {
        Self::Fault(ServiceError::from(err))
    }
}

/// Result type for filter execution.
pub type FilterResult = Result<(), FilterError>;

/// How a chain of filters finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainFlow {
    /// Every filter ran; continue with the next stage.
    Continue,
    /// A filter ended the request (short-circuit).
    Ended,
    /// A filter cancelled the call.
    Cancelled,
}

// ============================================================================
// Filter traits
// ============================================================================

/// A filter that runs before the handler and may mutate the request.
#[async_trait]
pub trait RequestFilter: Send + Sync {
    /// Runs the filter against the inbound request.
    async fn execute(&self, ctx: &RequestContext, request: &mut dyn Dto) -> FilterResult;
}

/// A filter that runs after the handler and may mutate the response.
#[async_trait]
pub trait ResponseFilter: Send + Sync {
    /// Runs the filter against the outbound response.
    async fn execute(&self, ctx: &RequestContext, response: &mut dyn Dto) -> FilterResult;
}

/// A synchronous closure adapted to the filter contracts.
#[derive(Clone)]
pub struct FilterFn<F>(F);

impl<F> FilterFn<F>
where
    F: Fn(&RequestContext, &mut dyn Dto) -> FilterResult + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> RequestFilter for FilterFn<F>
where
    F: Fn(&RequestContext, &mut dyn Dto) -> FilterResult + Send + Sync,
{
    async fn execute(&self, ctx: &RequestContext, request: &mut dyn Dto) -> FilterResult {
        (self.0)(ctx, request)
    }
}

#[async_trait]
impl<F> ResponseFilter for FilterFn<F>
where
    F: Fn(&RequestContext, &mut dyn Dto) -> FilterResult + Send + Sync,
{
    async fn execute(&self, ctx: &RequestContext, response: &mut dyn Dto) -> FilterResult {
        (self.0)(ctx, response)
    }
}

/// An asynchronous closure adapted to the filter contracts.
///
/// ```rust,ignore
/// AsyncFilterFn::new(|ctx, dto| Box::pin(async move {
///     tokio::task::yield_now().await;
///     Ok(())
/// }))
/// ```
#[derive(Clone)]
pub struct AsyncFilterFn<F>(F);

impl<F> AsyncFilterFn<F>
where
    F: for<'a> Fn(&'a RequestContext, &'a mut dyn Dto) -> BoxFuture<'a, FilterResult>
        + Send
        + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> RequestFilter for AsyncFilterFn<F>
where
    F: for<'a> Fn(&'a RequestContext, &'a mut dyn Dto) -> BoxFuture<'a, FilterResult>
        + Send
        + Sync,
{
    async fn execute(&self, ctx: &RequestContext, request: &mut dyn Dto) -> FilterResult {
        (self.0)(ctx, request).await
    }
}

#[async_trait]
impl<F> ResponseFilter for AsyncFilterFn<F>
where
    F: for<'a> Fn(&'a RequestContext, &'a mut dyn Dto) -> BoxFuture<'a, FilterResult>
        + Send
        + Sync,
{
    async fn execute(&self, ctx: &RequestContext, response: &mut dyn Dto) -> FilterResult {
        (self.0)(ctx, response).await
    }
}

// ============================================================================
// FilterAttribute
// ============================================================================

type Factory<F> = Arc<dyn Fn(&RequestContext) -> Box<F> + Send + Sync>;

/// A filter declared on a DTO type's metadata.
///
/// The attribute itself is immutable and shared; [`instantiate`](Self::instantiate)
/// produces the instance that actually runs, once per call, so state kept by
/// a filter never leaks between concurrent calls.
pub struct FilterAttribute<F: ?Sized> {
    name: Cow<'static, str>,
    priority: i32,
    apply_to: ApplyTo,
    factory: Factory<F>,
}

/// A request filter attribute.
pub type RequestFilterAttribute = FilterAttribute<dyn RequestFilter>;

/// A response filter attribute.
pub type ResponseFilterAttribute = FilterAttribute<dyn ResponseFilter>;

impl<F: ?Sized> FilterAttribute<F> {
    /// The name used in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Lower priorities run first.
    pub fn priority(&self) -> i32 {
        self.priority
    }

    /// The verbs this attribute fires for.
    pub fn apply_to(&self) -> ApplyTo {
        self.apply_to
    }

    /// Returns `true` if the attribute fires for `verb`.
    pub fn applies_to(&self, verb: Verb) -> bool {
        self.apply_to.contains(verb)
    }

    /// Restricts the attribute to the given verbs.
    pub fn with_apply_to(mut self, apply_to: ApplyTo) -> Self {
        self.apply_to = apply_to;
        self
    }

    /// Sets the name used in logs.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    /// Creates the filter instance for one call.
    pub fn instantiate(&self, ctx: &RequestContext) -> Box<F> {
        (self.factory)(ctx)
    }
}

impl<F: ?Sized> fmt::Debug for FilterAttribute<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterAttribute")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("apply_to", &self.apply_to)
            .finish_non_exhaustive()
    }
}

impl FilterAttribute<dyn RequestFilter> {
    /// Declares a request filter built by `make` for every call.
    pub fn new<T, M>(priority: i32, make: M) -> Self
    where
        T: RequestFilter + 'static,
        M: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_context(priority, move |_| make())
    }

    /// Declares a request filter whose per-call instance is built from the
    /// call's context, e.g. to resolve scoped dependencies.
    pub fn with_context<T, M>(priority: i32, make: M) -> Self
    where
        T: RequestFilter + 'static,
        M: Fn(&RequestContext) -> T + Send + Sync + 'static,
    {
        Self {
            name: Cow::Borrowed(std::any::type_name::<T>()),
            priority,
            apply_to: ApplyTo::ALL,
            factory: Arc::new(move |ctx: &RequestContext| -> Box<dyn RequestFilter> {
                Box::new(make(ctx))
            }),
        }
    }

    /// Declares a stateless request filter from a closure.
    pub fn from_fn<F>(priority: i32, f: F) -> Self
    where
        F: Fn(&RequestContext, &mut dyn Dto) -> FilterResult + Clone + Send + Sync + 'static,
    {
        Self::new(priority, move || FilterFn::new(f.clone())).named("fn")
    }
}

impl FilterAttribute<dyn ResponseFilter> {
    /// Declares a response filter built by `make` for every call.
    pub fn new<T, M>(priority: i32, make: M) -> Self
    where
        T: ResponseFilter + 'static,
        M: Fn() -> T + Send + Sync + 'static,
    {
        Self::with_context(priority, move |_| make())
    }

    /// Declares a response filter whose per-call instance is built from the
    /// call's context.
    pub fn with_context<T, M>(priority: i32, make: M) -> Self
    where
        T: ResponseFilter + 'static,
        M: Fn(&RequestContext) -> T + Send + Sync + 'static,
    {
        Self {
            name: Cow::Borrowed(std::any::type_name::<T>()),
            priority,
            apply_to: ApplyTo::ALL,
            factory: Arc::new(move |ctx: &RequestContext| -> Box<dyn ResponseFilter> {
                Box::new(make(ctx))
            }),
        }
    }

    /// Declares a stateless response filter from a closure.
    pub fn from_fn<F>(priority: i32, f: F) -> Self
    where
        F: Fn(&RequestContext, &mut dyn Dto) -> FilterResult + Clone + Send + Sync + 'static,
    {
        Self::new(priority, move || FilterFn::new(f.clone())).named("fn")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ArgumentError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl RequestFilter for Counting {
        async fn execute(&self, _ctx: &RequestContext, _request: &mut dyn Dto) -> FilterResult {
            if self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
                return Err(ArgumentError::new("instance reused").into());
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn attribute_instances_are_per_call() {
        let attr = RequestFilterAttribute::new(0, || Counting {
            calls: AtomicUsize::new(0),
        });
        let ctx = RequestContext::new("Test", Verb::Post);
        let mut dto = String::from("x");
        for _ in 0..3 {
            let filter = attr.instantiate(&ctx);
            assert!(filter.execute(&ctx, &mut dto).await.is_ok());
        }
    }

    #[tokio::test]
    async fn closures_run_through_async_contract() {
        let ctx = RequestContext::new("Test", Verb::Post);
        let mut dto = String::from("a");

        let sync = FilterFn::new(|_, dto| {
            dto.downcast_mut::<String>().unwrap().push('b');
            Ok(())
        });
        RequestFilter::execute(&sync, &ctx, &mut dto).await.unwrap();

        let asynchronous = AsyncFilterFn::new(|_, dto| {
            Box::pin(async move {
                tokio::task::yield_now().await;
                dto.downcast_mut::<String>().unwrap().push('c');
                Ok(())
            })
        });
        RequestFilter::execute(&asynchronous, &ctx, &mut dto).await.unwrap();

        assert_eq!(dto, "abc");
    }

    #[test]
    fn apply_to_mask() {
        let attr = ResponseFilterAttribute::from_fn(5, |_, _| Ok(()))
            .with_apply_to(ApplyTo::GET)
            .named("get-only");
        assert_eq!(attr.priority(), 5);
        assert_eq!(attr.name(), "get-only");
        assert!(attr.applies_to(Verb::Get));
        assert!(!attr.applies_to(Verb::Post));
    }
}
