//! Dependency container with per-call scopes.
//!
//! Services are registered by type with one of three [`Lifetime`]s. A
//! [`Scope`] is opened for every call; scoped instances are created at most
//! once per scope and released when the scope is dropped, whether the call
//! completed, failed or was cancelled.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tracing::trace;

/// Type alias for the values stored in the container and its scopes.
pub type ServiceArc = Arc<dyn Any + Send + Sync>;

type ServiceFactory = Arc<dyn Fn(&Scope) -> ServiceArc + Send + Sync>;

/// How long a resolved instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifetime {
    /// One instance for the whole process.
    Singleton,
    /// One instance per call.
    Scoped,
    /// A new instance on every resolve.
    Transient,
}

struct Registration {
    lifetime: Lifetime,
    name: &'static str,
    factory: ServiceFactory,
    singleton: OnceLock<ServiceArc>,
}

/// Registry of injectable services.
#[derive(Default)]
pub struct Container {
    registrations: HashMap<TypeId, Registration>,
}

impl Container {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a ready-made singleton instance.
    pub fn singleton<T: Send + Sync + 'static>(&mut self, value: T) -> &mut Self {
        let value: ServiceArc = Arc::new(value);
        let cell = OnceLock::new();
        let _ = cell.set(Arc::clone(&value));
        self.registrations.insert(
            TypeId::of::<T>(),
            Registration {
                lifetime: Lifetime::Singleton,
                name: type_name::<T>(),
                factory: Arc::new(move |_: &Scope| Arc::clone(&value)),
                singleton: cell,
            },
        );
        self
    }

    /// Registers a lazily created singleton.
    pub fn lazy_singleton<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> T + Send + Sync + 'static,
    {
        self.register(Lifetime::Singleton, factory)
    }

    /// Registers a service created once per call.
    pub fn scoped<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> T + Send + Sync + 'static,
    {
        self.register(Lifetime::Scoped, factory)
    }

    /// Registers a service created on every resolve.
    pub fn transient<T, F>(&mut self, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> T + Send + Sync + 'static,
    {
        self.register(Lifetime::Transient, factory)
    }

    fn register<T, F>(&mut self, lifetime: Lifetime, factory: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Scope) -> T + Send + Sync + 'static,
    {
        self.registrations.insert(
            TypeId::of::<T>(),
            Registration {
                lifetime,
                name: type_name::<T>(),
                factory: Arc::new(move |scope: &Scope| -> ServiceArc { Arc::new(factory(scope)) }),
                singleton: OnceLock::new(),
            },
        );
        self
    }

    /// Returns the lifetime `T` was registered with.
    pub fn lifetime_of<T: 'static>(&self) -> Option<Lifetime> {
        self.registrations
            .get(&TypeId::of::<T>())
            .map(|r| r.lifetime)
    }

    /// Returns the number of registrations.
    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    /// Returns `true` if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    /// Opens a new scope for one call.
    pub fn scope(self: &Arc<Self>) -> Scope {
        Scope {
            container: Arc::clone(self),
            instances: Mutex::new(HashMap::new()),
        }
    }
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field(
                "registrations",
                &self.registrations.values().map(|r| r.name).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// A per-call resolution scope.
pub struct Scope {
    container: Arc<Container>,
    instances: Mutex<HashMap<TypeId, ServiceArc>>,
}

impl Scope {
    /// Resolves `T`, or `None` if it is not registered.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let id = TypeId::of::<T>();
        let registration = self.container.registrations.get(&id)?;

        let instance = match registration.lifetime {
            Lifetime::Singleton => Arc::clone(
                registration
                    .singleton
                    .get_or_init(|| (registration.factory)(self)),
            ),
            Lifetime::Scoped => {
                if let Some(existing) = self.instances.lock().get(&id) {
                    return Arc::clone(existing).downcast::<T>().ok();
                }
                // Created outside the lock so factories may resolve other services.
                let created = (registration.factory)(self);
                trace!(service = registration.name, "Created scoped service");
                Arc::clone(self.instances.lock().entry(id).or_insert(created))
            }
            Lifetime::Transient => (registration.factory)(self),
        };

        instance.downcast::<T>().ok()
    }

    /// Returns the container this scope resolves from.
    pub fn container(&self) -> &Arc<Container> {
        &self.container
    }

    /// Returns the number of scoped instances created so far.
    pub fn instance_count(&self) -> usize {
        self.instances.lock().len()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scope")
            .field("instances", &self.instance_count())
            .finish_non_exhaustive()
    }
}
