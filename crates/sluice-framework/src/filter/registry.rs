//! Registration of global, typed and gateway filters.
//!
//! The registry is filled during host configuration and frozen into the
//! [`ServiceHost`](crate::ServiceHost) before any traffic; it is never
//! mutated while requests run.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use sluice_core::{
    AsyncFilterFn, Cast, Dto, FilterFn, FilterResult, RequestContext, RequestFilter,
    ResponseFilter, TypeMeta,
};

// ============================================================================
// Typed filters
// ============================================================================

/// A filter registered against capability `C`, bound to one DTO type.
struct CastFilter<C: ?Sized + 'static, F> {
    cast: Cast<C>,
    f: Arc<F>,
}

impl<C, F> CastFilter<C, F>
where
    C: ?Sized + 'static,
    F: Fn(&RequestContext, &mut C) -> FilterResult,
{
    fn run(&self, ctx: &RequestContext, dto: &mut dyn Dto) -> FilterResult {
        match self.cast.apply(dto) {
            Some(target) => (self.f)(ctx, target),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<C, F> RequestFilter for CastFilter<C, F>
where
    C: ?Sized + 'static,
    F: Fn(&RequestContext, &mut C) -> FilterResult + Send + Sync,
{
    async fn execute(&self, ctx: &RequestContext, request: &mut dyn Dto) -> FilterResult {
        self.run(ctx, request)
    }
}

#[async_trait]
impl<C, F> ResponseFilter for CastFilter<C, F>
where
    C: ?Sized + 'static,
    F: Fn(&RequestContext, &mut C) -> FilterResult + Send + Sync,
{
    async fn execute(&self, ctx: &RequestContext, response: &mut dyn Dto) -> FilterResult {
        self.run(ctx, response)
    }
}

/// The asynchronous counterpart of [`CastFilter`].
struct AsyncCastFilter<C: ?Sized + 'static, F> {
    cast: Cast<C>,
    f: Arc<F>,
}

#[async_trait]
impl<C, F> RequestFilter for AsyncCastFilter<C, F>
where
    C: ?Sized + Send + 'static,
    F: for<'a> Fn(&'a RequestContext, &'a mut C) -> BoxFuture<'a, FilterResult> + Send + Sync,
{
    async fn execute(&self, ctx: &RequestContext, request: &mut dyn Dto) -> FilterResult {
        match self.cast.apply(request) {
            Some(target) => (self.f)(ctx, target).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<C, F> ResponseFilter for AsyncCastFilter<C, F>
where
    C: ?Sized + Send + 'static,
    F: for<'a> Fn(&'a RequestContext, &'a mut C) -> BoxFuture<'a, FilterResult> + Send + Sync,
{
    async fn execute(&self, ctx: &RequestContext, response: &mut dyn Dto) -> FilterResult {
        match self.cast.apply(response) {
            Some(target) => (self.f)(ctx, target).await,
            None => Ok(()),
        }
    }
}

type Bind<F> = Arc<dyn Fn(&TypeMeta) -> Option<Arc<F>> + Send + Sync>;

/// A typed filter registration: binds to every DTO type implementing its
/// capability.
pub struct TypedFilter<F: ?Sized> {
    capability: &'static str,
    bind: Bind<F>,
}

impl<F: ?Sized> TypedFilter<F> {
    /// The name of the capability the filter was registered against.
    pub fn capability(&self) -> &'static str {
        self.capability
    }

    /// Binds the filter to a DTO type, or `None` if the type does not
    /// implement the capability.
    pub fn bind(&self, meta: &TypeMeta) -> Option<Arc<F>> {
        (self.bind)(meta)
    }
}

impl<F: ?Sized> Clone for TypedFilter<F> {
    fn clone(&self) -> Self {
        Self {
            capability: self.capability,
            bind: Arc::clone(&self.bind),
        }
    }
}

fn typed_request<C, T>(
    make: impl Fn(Cast<C>) -> T + Send + Sync + 'static,
) -> TypedFilter<dyn RequestFilter>
where
    C: ?Sized + 'static,
    T: RequestFilter + 'static,
{
    TypedFilter {
        capability: std::any::type_name::<C>(),
        bind: Arc::new(move |meta: &TypeMeta| {
            meta.cast::<C>()
                .map(|cast| Arc::new(make(cast)) as Arc<dyn RequestFilter>)
        }),
    }
}

fn typed_response<C, T>(
    make: impl Fn(Cast<C>) -> T + Send + Sync + 'static,
) -> TypedFilter<dyn ResponseFilter>
where
    C: ?Sized + 'static,
    T: ResponseFilter + 'static,
{
    TypedFilter {
        capability: std::any::type_name::<C>(),
        bind: Arc::new(move |meta: &TypeMeta| {
            meta.cast::<C>()
                .map(|cast| Arc::new(make(cast)) as Arc<dyn ResponseFilter>)
        }),
    }
}

// ============================================================================
// FilterRegistry
// ============================================================================

/// Holds every filter that is not declared on a DTO type.
///
/// - **Global** filters run for every external call, in registration order.
/// - **Typed** filters run for every DTO implementing their capability.
/// - **Gateway** filters run only for in-process gateway calls, outermost on
///   both sides of the handler.
///
/// Synchronous and asynchronous registrations share one list per group, so
/// they interleave in registration order.
#[derive(Default, Clone)]
pub struct FilterRegistry {
    request: Vec<Arc<dyn RequestFilter>>,
    response: Vec<Arc<dyn ResponseFilter>>,
    typed_request: Vec<TypedFilter<dyn RequestFilter>>,
    typed_response: Vec<TypedFilter<dyn ResponseFilter>>,
    gateway_request: Vec<Arc<dyn RequestFilter>>,
    gateway_response: Vec<Arc<dyn ResponseFilter>>,
}

impl FilterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // ----- global -------------------------------------------------------------

    /// Appends a synchronous global request filter.
    pub fn global_request_filter<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&RequestContext, &mut dyn Dto) -> FilterResult + Send + Sync + 'static,
    {
        self.register_global_request_filter(FilterFn::new(f))
    }

    /// Appends an asynchronous global request filter.
    pub fn global_request_filter_async<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a RequestContext, &'a mut dyn Dto) -> BoxFuture<'a, FilterResult>
            + Send
            + Sync
            + 'static,
    {
        self.register_global_request_filter(AsyncFilterFn::new(f))
    }

    /// Appends a global request filter.
    pub fn register_global_request_filter(
        &mut self,
        filter: impl RequestFilter + 'static,
    ) -> &mut Self {
        self.request.push(Arc::new(filter));
        self
    }

    /// Appends a synchronous global response filter.
    pub fn global_response_filter<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&RequestContext, &mut dyn Dto) -> FilterResult + Send + Sync + 'static,
    {
        self.register_global_response_filter(FilterFn::new(f))
    }

    /// Appends an asynchronous global response filter.
    pub fn global_response_filter_async<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a RequestContext, &'a mut dyn Dto) -> BoxFuture<'a, FilterResult>
            + Send
            + Sync
            + 'static,
    {
        self.register_global_response_filter(AsyncFilterFn::new(f))
    }

    /// Appends a global response filter.
    pub fn register_global_response_filter(
        &mut self,
        filter: impl ResponseFilter + 'static,
    ) -> &mut Self {
        self.response.push(Arc::new(filter));
        self
    }

    // ----- typed --------------------------------------------------------------

    /// Appends a request filter for every request DTO implementing `C`.
    ///
    /// `C` is either a concrete DTO type or a capability declared through
    /// [`MetaBuilder::implements`](sluice_core::MetaBuilder::implements).
    pub fn typed_request_filter<C, F>(&mut self, f: F) -> &mut Self
    where
        C: ?Sized + 'static,
        F: Fn(&RequestContext, &mut C) -> FilterResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.typed_request.push(typed_request::<C, _>(move |cast| CastFilter {
            cast,
            f: Arc::clone(&f),
        }));
        self
    }

    /// Appends an asynchronous request filter for every request DTO
    /// implementing `C`.
    pub fn typed_request_filter_async<C, F>(&mut self, f: F) -> &mut Self
    where
        C: ?Sized + Send + 'static,
        F: for<'a> Fn(&'a RequestContext, &'a mut C) -> BoxFuture<'a, FilterResult>
            + Send
            + Sync
            + 'static,
    {
        let f = Arc::new(f);
        self.typed_request.push(typed_request::<C, _>(move |cast| AsyncCastFilter {
            cast,
            f: Arc::clone(&f),
        }));
        self
    }

    /// Appends a response filter for every response DTO implementing `C`.
    pub fn typed_response_filter<C, F>(&mut self, f: F) -> &mut Self
    where
        C: ?Sized + 'static,
        F: Fn(&RequestContext, &mut C) -> FilterResult + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        self.typed_response.push(typed_response::<C, _>(move |cast| CastFilter {
            cast,
            f: Arc::clone(&f),
        }));
        self
    }

    /// Appends an asynchronous response filter for every response DTO
    /// implementing `C`.
    pub fn typed_response_filter_async<C, F>(&mut self, f: F) -> &mut Self
    where
        C: ?Sized + Send + 'static,
        F: for<'a> Fn(&'a RequestContext, &'a mut C) -> BoxFuture<'a, FilterResult>
            + Send
            + Sync
            + 'static,
    {
        let f = Arc::new(f);
        self.typed_response.push(typed_response::<C, _>(move |cast| AsyncCastFilter {
            cast,
            f: Arc::clone(&f),
        }));
        self
    }

    // ----- gateway ------------------------------------------------------------

    /// Appends a request filter for in-process gateway calls.
    pub fn gateway_request_filter<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&RequestContext, &mut dyn Dto) -> FilterResult + Send + Sync + 'static,
    {
        self.gateway_request.push(Arc::new(FilterFn::new(f)));
        self
    }

    /// Appends an asynchronous request filter for in-process gateway calls.
    pub fn gateway_request_filter_async<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a RequestContext, &'a mut dyn Dto) -> BoxFuture<'a, FilterResult>
            + Send
            + Sync
            + 'static,
    {
        self.gateway_request.push(Arc::new(AsyncFilterFn::new(f)));
        self
    }

    /// Appends a response filter for in-process gateway calls.
    pub fn gateway_response_filter<F>(&mut self, f: F) -> &mut Self
    where
        F: Fn(&RequestContext, &mut dyn Dto) -> FilterResult + Send + Sync + 'static,
    {
        self.gateway_response.push(Arc::new(FilterFn::new(f)));
        self
    }

    /// Appends an asynchronous response filter for in-process gateway calls.
    pub fn gateway_response_filter_async<F>(&mut self, f: F) -> &mut Self
    where
        F: for<'a> Fn(&'a RequestContext, &'a mut dyn Dto) -> BoxFuture<'a, FilterResult>
            + Send
            + Sync
            + 'static,
    {
        self.gateway_response.push(Arc::new(AsyncFilterFn::new(f)));
        self
    }

    // ----- accessors ----------------------------------------------------------

    pub fn request_filters(&self) -> &[Arc<dyn RequestFilter>] {
        &self.request
    }

    pub fn response_filters(&self) -> &[Arc<dyn ResponseFilter>] {
        &self.response
    }

    pub fn typed_request_filters(&self) -> &[TypedFilter<dyn RequestFilter>] {
        &self.typed_request
    }

    pub fn typed_response_filters(&self) -> &[TypedFilter<dyn ResponseFilter>] {
        &self.typed_response
    }

    pub fn gateway_request_filters(&self) -> &[Arc<dyn RequestFilter>] {
        &self.gateway_request
    }

    pub fn gateway_response_filters(&self) -> &[Arc<dyn ResponseFilter>] {
        &self.gateway_response
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterRegistry")
            .field("request", &self.request.len())
            .field("response", &self.response.len())
            .field(
                "typed_request",
                &self
                    .typed_request
                    .iter()
                    .map(TypedFilter::capability)
                    .collect::<Vec<_>>(),
            )
            .field(
                "typed_response",
                &self
                    .typed_response
                    .iter()
                    .map(TypedFilter::capability)
                    .collect::<Vec<_>>(),
            )
            .field("gateway_request", &self.gateway_request.len())
            .field("gateway_response", &self.gateway_response.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use sluice_core::{Describe, MetaBuilder, Verb};

    trait Tagged: Send + Sync {
        fn tags(&mut self) -> &mut Vec<String>;
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Order {
        tags: Vec<String>,
    }

    impl Tagged for Order {
        fn tags(&mut self) -> &mut Vec<String> {
            &mut self.tags
        }
    }

    impl Describe for Order {
        fn describe(meta: &mut MetaBuilder<Self>) {
            meta.implements::<dyn Tagged>(|o| o);
        }
    }

    #[tokio::test]
    async fn typed_filters_bind_by_capability() {
        let mut registry = FilterRegistry::new();
        registry
            .typed_request_filter::<dyn Tagged, _>(|_, dto| {
                dto.tags().push("sync".into());
                Ok(())
            })
            .typed_request_filter_async::<Order, _>(|_, order| {
                Box::pin(async move {
                    order.tags.push("async".into());
                    Ok(())
                })
            })
            .typed_request_filter::<String, _>(|_, _| Ok(()));

        let meta = TypeMeta::of::<Order>();
        let bound: Vec<_> = registry
            .typed_request_filters()
            .iter()
            .filter_map(|t| t.bind(&meta))
            .collect();
        assert_eq!(bound.len(), 2);

        let ctx = RequestContext::new("Order", Verb::Post);
        let mut order = Order { tags: Vec::new() };
        for filter in &bound {
            filter.execute(&ctx, &mut order).await.unwrap();
        }
        assert_eq!(order.tags, vec!["sync", "async"]);
    }

    #[test]
    fn groups_keep_registration_order() {
        let mut registry = FilterRegistry::new();
        registry
            .global_request_filter(|_, _| Ok(()))
            .global_request_filter_async(|_, _| Box::pin(async { Ok(()) }))
            .global_response_filter(|_, _| Ok(()))
            .gateway_request_filter(|_, _| Ok(()));

        assert_eq!(registry.request_filters().len(), 2);
        assert_eq!(registry.response_filters().len(), 1);
        assert_eq!(registry.gateway_request_filters().len(), 1);
        assert!(registry.gateway_response_filters().is_empty());
    }
}
