//! Static per-type metadata.
//!
//! A DTO type declares its filter attributes and the capabilities it
//! implements through [`Describe`]. The declaration is evaluated once into a
//! [`TypeMeta`], which the typed filter dispatcher consults and caches.
//!
//! ```rust,ignore
//! trait HasSharedProperty: Send + Sync {
//!     fn shared_mut(&mut self) -> &mut String;
//! }
//!
//! impl Describe for CreateOrder {
//!     fn describe(meta: &mut MetaBuilder<Self>) {
//!         meta.request_filter(RequestFilterAttribute::new(-100, || AuditFilter::default()))
//!             .implements::<dyn HasSharedProperty>(|dto| dto)
//!             .inherit::<AuditedBase>();
//!     }
//! }
//! ```

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use serde_json::Value;

use crate::dto::Dto;
use crate::filter::{RequestFilterAttribute, ResponseFilterAttribute};

/// Declares the static metadata of a DTO type.
///
/// The default declares nothing: no filter attributes, and no capability
/// beyond the type itself.
pub trait Describe {
    fn describe(_meta: &mut MetaBuilder<Self>) {}
}

impl Describe for () {}
impl Describe for String {}
impl Describe for Value {}
impl<T> Describe for Vec<T> {}
impl<T> Describe for Option<T> {}

// ============================================================================
// Cast
// ============================================================================

/// A checked view of a DTO as capability `C`.
pub struct Cast<C: ?Sized + 'static>(
    Arc<dyn for<'a> Fn(&'a mut dyn Dto) -> Option<&'a mut C> + Send + Sync>,
);

impl<C: ?Sized + 'static> Cast<C> {
    fn of<D: Dto>(cast: fn(&mut D) -> &mut C) -> Self {
        fn constrain<T: ?Sized, F>(f: F) -> F
        where
            F: for<'a> Fn(&'a mut dyn Dto) -> Option<&'a mut T>,
        {
            f
        }

        Self(Arc::new(constrain::<C, _>(move |dto: &mut dyn Dto| {
            dto.downcast_mut::<D>().map(cast)
        })))
    }

    /// Views `dto` as `C`, or `None` if `dto` is not the type this cast was
    /// declared on.
    pub fn apply<'a>(&self, dto: &'a mut dyn Dto) -> Option<&'a mut C> {
        (self.0)(dto)
    }
}

impl<C: ?Sized + 'static> Clone for Cast<C> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

fn identity<T>(value: &mut T) -> &mut T {
    value
}

// ============================================================================
// MetaBuilder
// ============================================================================

/// Collects the metadata declared by [`Describe::describe`].
pub struct MetaBuilder<D: ?Sized> {
    request_filters: Vec<Arc<RequestFilterAttribute>>,
    response_filters: Vec<Arc<ResponseFilterAttribute>>,
    casts: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    capabilities: Vec<&'static str>,
    _marker: PhantomData<fn(&mut D)>,
}

impl<D: ?Sized> MetaBuilder<D> {
    fn empty() -> Self {
        Self {
            request_filters: Vec::new(),
            response_filters: Vec::new(),
            casts: HashMap::new(),
            capabilities: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Attaches a request filter attribute.
    pub fn request_filter(&mut self, attr: RequestFilterAttribute) -> &mut Self {
        self.request_filters.push(Arc::new(attr));
        self
    }

    /// Attaches a response filter attribute.
    pub fn response_filter(&mut self, attr: ResponseFilterAttribute) -> &mut Self {
        self.response_filters.push(Arc::new(attr));
        self
    }

    /// Inherits the filter attributes declared on `B`.
    ///
    /// Inherited attributes are appended after the ones declared so far.
    pub fn inherit<B: Describe + ?Sized>(&mut self) -> &mut Self {
        let mut base = MetaBuilder::<B>::empty();
        B::describe(&mut base);
        self.request_filters.extend(base.request_filters);
        self.response_filters.extend(base.response_filters);
        self
    }
}

impl<D: Dto> MetaBuilder<D> {
    /// Declares that `D` implements capability `C`, typically a trait object
    /// type such as `dyn HasSharedProperty`.
    pub fn implements<C: ?Sized + 'static>(&mut self, cast: fn(&mut D) -> &mut C) -> &mut Self {
        let previous = self
            .casts
            .insert(TypeId::of::<C>(), Arc::new(Cast::of(cast)));
        if previous.is_none() {
            self.capabilities.push(std::any::type_name::<C>());
        }
        self
    }
}

// ============================================================================
// TypeMeta
// ============================================================================

/// The resolved metadata of one DTO type.
pub struct TypeMeta {
    type_id: TypeId,
    type_name: &'static str,
    request_filters: Vec<Arc<RequestFilterAttribute>>,
    response_filters: Vec<Arc<ResponseFilterAttribute>>,
    casts: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    capabilities: Vec<&'static str>,
}

impl TypeMeta {
    /// Evaluates the metadata declared by `D`.
    ///
    /// `D` always implements itself as a capability.
    pub fn of<D: Dto + Describe>() -> Self {
        let mut builder = MetaBuilder::<D>::empty();
        builder.implements::<D>(identity::<D>);
        D::describe(&mut builder);

        Self {
            type_id: TypeId::of::<D>(),
            type_name: std::any::type_name::<D>(),
            request_filters: builder.request_filters,
            response_filters: builder.response_filters,
            casts: builder.casts,
            capabilities: builder.capabilities,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Request filter attributes, in declaration order.
    pub fn request_filters(&self) -> &[Arc<RequestFilterAttribute>] {
        &self.request_filters
    }

    /// Response filter attributes, in declaration order.
    pub fn response_filters(&self) -> &[Arc<ResponseFilterAttribute>] {
        &self.response_filters
    }

    /// Returns `true` if the type implements the capability with `capability` id.
    pub fn implements(&self, capability: TypeId) -> bool {
        self.casts.contains_key(&capability)
    }

    /// Names of the implemented capabilities, in declaration order.
    pub fn capabilities(&self) -> &[&'static str] {
        &self.capabilities
    }

    /// Returns the cast to capability `C`, if implemented.
    pub fn cast<C: ?Sized + 'static>(&self) -> Option<Cast<C>> {
        self.casts
            .get(&TypeId::of::<C>())?
            .downcast_ref::<Cast<C>>()
            .cloned()
    }
}

impl fmt::Debug for TypeMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeMeta")
            .field("type_name", &self.type_name)
            .field("request_filters", &self.request_filters.len())
            .field("response_filters", &self.response_filters.len())
            .field("capabilities", &self.capabilities)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    trait Named: Send + Sync {
        fn name_mut(&mut self) -> &mut String;
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Person {
        name: String,
    }

    impl Named for Person {
        fn name_mut(&mut self) -> &mut String {
            &mut self.name
        }
    }

    struct Base;

    impl Describe for Base {
        fn describe(meta: &mut MetaBuilder<Self>) {
            meta.request_filter(RequestFilterAttribute::from_fn(7, |_, _| Ok(())));
        }
    }

    impl Describe for Person {
        fn describe(meta: &mut MetaBuilder<Self>) {
            meta.request_filter(RequestFilterAttribute::from_fn(-1, |_, _| Ok(())))
                .implements::<dyn Named>(|p| p)
                .inherit::<Base>();
        }
    }

    #[test]
    fn capabilities_and_casts() {
        let meta = TypeMeta::of::<Person>();
        assert!(meta.implements(TypeId::of::<Person>()));
        assert!(meta.implements(TypeId::of::<dyn Named>()));
        assert!(!meta.implements(TypeId::of::<String>()));
        assert_eq!(meta.capabilities().len(), 2);

        let mut dto: Box<dyn Dto> = Box::new(Person { name: "a".into() });
        let cast = meta.cast::<dyn Named>().unwrap();
        cast.apply(dto.as_mut()).unwrap().name_mut().push('b');
        assert_eq!(dto.downcast_ref::<Person>().unwrap().name, "ab");

        let mut other: Box<dyn Dto> = Box::new(String::new());
        assert!(cast.apply(other.as_mut()).is_none());
    }

    #[test]
    fn inherited_filters_follow_own() {
        let meta = TypeMeta::of::<Person>();
        let priorities: Vec<_> = meta.request_filters().iter().map(|f| f.priority()).collect();
        assert_eq!(priorities, vec![-1, 7]);
    }

    #[test]
    fn plain_types_only_implement_themselves() {
        let meta = TypeMeta::of::<String>();
        assert!(meta.request_filters().is_empty());
        assert!(meta.cast::<String>().is_some());
        assert!(meta.cast::<dyn Named>().is_none());
    }
}
