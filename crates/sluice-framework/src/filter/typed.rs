//! Per-operation filter resolution.
//!
//! For every operation the [`TypedFilterDispatcher`] computes, once, the
//! attribute filters declared on its request and response types (sorted by
//! priority) and the typed filters whose capability those types implement.
//! The result is cached per request type and shared by every call.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use sluice_core::{
    OperationInfo, RequestFilter, RequestFilterAttribute, ResponseFilter,
    ResponseFilterAttribute,
};

use super::registry::FilterRegistry;

/// The filters that apply to one operation.
pub struct ResolvedFilters {
    request_attributes: Vec<Arc<RequestFilterAttribute>>,
    typed_request: Vec<Arc<dyn RequestFilter>>,
    response_attributes: Vec<Arc<ResponseFilterAttribute>>,
    typed_response: Vec<Arc<dyn ResponseFilter>>,
}

impl ResolvedFilters {
    /// Request attribute filters, in execution order.
    pub fn request_attributes(&self) -> &[Arc<RequestFilterAttribute>] {
        &self.request_attributes
    }

    /// Typed request filters, in registration order.
    pub fn typed_request(&self) -> &[Arc<dyn RequestFilter>] {
        &self.typed_request
    }

    /// Response attribute filters, in execution order.
    pub fn response_attributes(&self) -> &[Arc<ResponseFilterAttribute>] {
        &self.response_attributes
    }

    /// Typed response filters, in registration order.
    pub fn typed_response(&self) -> &[Arc<dyn ResponseFilter>] {
        &self.typed_response
    }

    /// Returns `true` if no typed or attribute filter applies.
    pub fn is_empty(&self) -> bool {
        self.request_attributes.is_empty()
            && self.typed_request.is_empty()
            && self.response_attributes.is_empty()
            && self.typed_response.is_empty()
    }
}

impl fmt::Debug for ResolvedFilters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolvedFilters")
            .field("request_attributes", &self.request_attributes)
            .field("typed_request", &self.typed_request.len())
            .field("response_attributes", &self.response_attributes)
            .field("typed_response", &self.typed_response.len())
            .finish()
    }
}

/// Resolves and caches the typed and attribute filters of each operation.
///
/// Lookups take a shared lock; the first resolution of a type takes the
/// exclusive lock once. Two calls racing on an unseen type may both resolve
/// it, but only the first result is stored.
pub struct TypedFilterDispatcher {
    registry: Arc<FilterRegistry>,
    cache: RwLock<HashMap<TypeId, Arc<ResolvedFilters>>>,
}

impl TypedFilterDispatcher {
    pub fn new(registry: Arc<FilterRegistry>) -> Self {
        Self {
            registry,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Returns the filters for `info`, resolving them on first use.
    pub fn resolve(&self, info: &OperationInfo) -> Arc<ResolvedFilters> {
        if let Some(resolved) = self.cache.read().get(&info.request_type()) {
            return Arc::clone(resolved);
        }

        let resolved = Arc::new(self.compute(info));
        debug!(
            operation = info.name(),
            request_attributes = resolved.request_attributes.len(),
            typed_request = resolved.typed_request.len(),
            response_attributes = resolved.response_attributes.len(),
            typed_response = resolved.typed_response.len(),
            "Resolved operation filters"
        );

        Arc::clone(
            self.cache
                .write()
                .entry(info.request_type())
                .or_insert(resolved),
        )
    }

    /// Returns the number of operations resolved so far.
    pub fn cached(&self) -> usize {
        self.cache.read().len()
    }

    fn compute(&self, info: &OperationInfo) -> ResolvedFilters {
        let request_meta = info.request_meta();
        let response_meta = info.response_meta();

        let mut request_attributes = request_meta.request_filters().to_vec();
        request_attributes.sort_by_key(|attr| attr.priority());

        let mut response_attributes: Vec<_> = request_meta
            .response_filters()
            .iter()
            .chain(response_meta.response_filters())
            .cloned()
            .collect();
        response_attributes.sort_by_key(|attr| attr.priority());

        let typed_request = self
            .registry
            .typed_request_filters()
            .iter()
            .filter_map(|typed| typed.bind(&request_meta))
            .collect();
        let typed_response = self
            .registry
            .typed_response_filters()
            .iter()
            .filter_map(|typed| typed.bind(&response_meta))
            .collect();

        ResolvedFilters {
            request_attributes,
            typed_request,
            response_attributes,
            typed_response,
        }
    }
}

impl fmt::Debug for TypedFilterDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedFilterDispatcher")
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use sluice_core::{Describe, MetaBuilder, Operation};

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ranked;

    impl Describe for Ranked {
        fn describe(meta: &mut MetaBuilder<Self>) {
            for (i, priority) in [-100, i32::MIN, 0, -80, 0, -90].into_iter().enumerate() {
                meta.request_filter(
                    RequestFilterAttribute::from_fn(priority, |_, _| Ok(())).named(format!("f{i}")),
                );
            }
            meta.response_filter(ResponseFilterAttribute::from_fn(5, |_, _| Ok(())));
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct RankedResponse;

    impl Describe for RankedResponse {
        fn describe(meta: &mut MetaBuilder<Self>) {
            meta.response_filter(ResponseFilterAttribute::from_fn(-5, |_, _| Ok(())));
        }
    }

    impl Operation for Ranked {
        const NAME: &'static str = "Ranked";
        type Response = RankedResponse;
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Plain;

    impl Describe for Plain {}

    impl Operation for Plain {
        const NAME: &'static str = "Plain";
        type Response = ();
    }

    #[test]
    fn attributes_sort_by_priority_stably() {
        let dispatcher = TypedFilterDispatcher::new(Arc::new(FilterRegistry::new()));
        let resolved = dispatcher.resolve(&OperationInfo::of::<Ranked>());

        let order: Vec<_> = resolved
            .request_attributes()
            .iter()
            .map(|a| (a.priority(), a.name().to_string()))
            .collect();
        assert_eq!(
            order,
            vec![
                (i32::MIN, "f1".to_string()),
                (-100, "f0".to_string()),
                (-90, "f5".to_string()),
                (-80, "f3".to_string()),
                (0, "f2".to_string()),
                (0, "f4".to_string()),
            ]
        );

        let response: Vec<_> = resolved
            .response_attributes()
            .iter()
            .map(|a| a.priority())
            .collect();
        assert_eq!(response, vec![-5, 5]);
    }

    #[test]
    fn resolution_is_cached_per_type() {
        let mut registry = FilterRegistry::new();
        registry.typed_request_filter::<Plain, _>(|_, _| Ok(()));
        let dispatcher = TypedFilterDispatcher::new(Arc::new(registry));

        let first = dispatcher.resolve(&OperationInfo::of::<Plain>());
        let second = dispatcher.resolve(&OperationInfo::of::<Plain>());
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.typed_request().len(), 1);
        assert!(first.request_attributes().is_empty());

        let ranked = dispatcher.resolve(&OperationInfo::of::<Ranked>());
        assert!(ranked.typed_request().is_empty());
        assert_eq!(dispatcher.cached(), 2);
    }

    #[test]
    fn concurrent_resolution_stores_one_entry() {
        let dispatcher = Arc::new(TypedFilterDispatcher::new(Arc::new(FilterRegistry::new())));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dispatcher = Arc::clone(&dispatcher);
                std::thread::spawn(move || dispatcher.resolve(&OperationInfo::of::<Ranked>()))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        let stored = dispatcher.resolve(&OperationInfo::of::<Ranked>());
        assert!(results.iter().all(|r| Arc::ptr_eq(r, &stored)));
        assert_eq!(dispatcher.cached(), 1);
    }
}
