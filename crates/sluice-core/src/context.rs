//! Per-call request context.
//!
//! One [`RequestContext`] wraps one logical call: an inbound request, a
//! gateway-originated call, a queued message, or a single item of a batch.
//! It carries the verb, the call's provenance, a string-keyed items map, the
//! session, the response slot and end-of-request flag used to short-circuit
//! the pipeline, a cancellation token, and the call's dependency [`Scope`].
//!
//! Contexts are never shared between concurrent calls; nested calls get a
//! [`child`](RequestContext::child) context whose cancellation token is a
//! child of the parent's.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::container::{Scope, ServiceArc};
use crate::dto::{BoxedDto, Dto};
use crate::verb::Verb;

/// Item key holding the index of the current batch item.
pub const AUTO_BATCH_INDEX: &str = "AutoBatchIndex";

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Where a call came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provenance {
    /// An external request delivered by a transport.
    External,
    /// A gateway call made from inside another call; `depth` counts the
    /// nesting level, starting at 1.
    InProcess { depth: u32 },
    /// A message taken off a queue.
    Message,
}

impl Provenance {
    /// Returns `true` for gateway-originated calls.
    pub fn is_in_process(&self) -> bool {
        matches!(self, Self::InProcess { .. })
    }

    /// The gateway nesting depth; 0 for anything but in-process calls.
    pub fn depth(&self) -> u32 {
        match self {
            Self::InProcess { depth } => *depth,
            _ => 0,
        }
    }
}

/// The context of a single call.
pub struct RequestContext {
    id: u64,
    operation: &'static str,
    verb: Verb,
    provenance: Provenance,
    items: Mutex<HashMap<String, Value>>,
    session: Option<ServiceArc>,
    extensions: RwLock<HashMap<TypeId, ServiceArc>>,
    response: Mutex<Option<BoxedDto>>,
    closed: AtomicBool,
    cancel: CancellationToken,
    status: Mutex<Option<u16>>,
    headers: Mutex<Vec<(String, String)>>,
    scope: Mutex<Option<Scope>>,
}

impl RequestContext {
    /// Creates a context for an external call.
    pub fn new(operation: &'static str, verb: Verb) -> Self {
        Self::with_provenance(operation, verb, Provenance::External)
    }

    /// Creates a context with an explicit provenance.
    pub fn with_provenance(operation: &'static str, verb: Verb, provenance: Provenance) -> Self {
        Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            operation,
            verb,
            provenance,
            items: Mutex::new(HashMap::new()),
            session: None,
            extensions: RwLock::new(HashMap::new()),
            response: Mutex::new(None),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            status: Mutex::new(None),
            headers: Mutex::new(Vec::new()),
            scope: Mutex::new(None),
        }
    }

    /// Attaches the authenticated session.
    pub fn with_session<T: Send + Sync + 'static>(mut self, session: Arc<T>) -> Self {
        self.session = Some(session as ServiceArc);
        self
    }

    /// Uses `token` as this call's cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Creates the context of a gateway call made from within this one.
    ///
    /// The child inherits the session and extensions, gets its own items and
    /// response slot, and is cancelled when this context is.
    pub fn child(&self, operation: &'static str, verb: Verb) -> Self {
        let provenance = Provenance::InProcess {
            depth: self.provenance.depth() + 1,
        };
        let mut child = Self::with_provenance(operation, verb, provenance)
            .with_cancellation(self.cancel.child_token());
        child.session = self.session.clone();
        *child.extensions.get_mut() = self.extensions.read().clone();
        child
    }

    /// Creates the context of a one-way message published from this call.
    ///
    /// The message keeps the session and extensions but not the
    /// cancellation token: it outlives the call that published it.
    pub fn detached(&self, operation: &'static str, verb: Verb) -> Self {
        let mut message = Self::with_provenance(operation, verb, Provenance::Message);
        message.session = self.session.clone();
        *message.extensions.get_mut() = self.extensions.read().clone();
        message
    }

    /// Creates the context of item `index` of a batch issued through this one.
    ///
    /// The item keeps this call's operation, verb and provenance, copies its
    /// items and records [`AUTO_BATCH_INDEX`].
    pub fn for_batch_item(&self, index: usize) -> Self {
        let mut item = Self::with_provenance(self.operation, self.verb, self.provenance)
            .with_cancellation(self.cancel.child_token());
        item.session = self.session.clone();
        *item.extensions.get_mut() = self.extensions.read().clone();
        let mut items = self.items.lock().clone();
        items.insert(AUTO_BATCH_INDEX.to_string(), Value::from(index));
        *item.items.get_mut() = items;
        item
    }

    /// A process-unique id, used in logs.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The name of the operation being executed.
    pub fn operation(&self) -> &'static str {
        self.operation
    }

    pub fn verb(&self) -> Verb {
        self.verb
    }

    pub fn provenance(&self) -> Provenance {
        self.provenance
    }

    /// Returns `true` for gateway-originated calls.
    pub fn is_in_process(&self) -> bool {
        self.provenance.is_in_process()
    }

    // ----- items -------------------------------------------------------------

    /// Returns a copy of the item stored under `key`.
    pub fn item(&self, key: &str) -> Option<Value> {
        self.items.lock().get(key).cloned()
    }

    /// Stores an item, replacing any previous value.
    pub fn set_item(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.items.lock().insert(key.into(), value.into());
    }

    /// Removes and returns an item.
    pub fn remove_item(&self, key: &str) -> Option<Value> {
        self.items.lock().remove(key)
    }

    /// The index of this batch item, if the call is part of a batch.
    pub fn batch_index(&self) -> Option<usize> {
        self.item(AUTO_BATCH_INDEX)
            .and_then(|v| v.as_u64())
            .map(|i| i as usize)
    }

    // ----- session and extensions ---------------------------------------------

    /// Returns the session if it is a `T`.
    pub fn session<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.session.clone()?.downcast::<T>().ok()
    }

    /// Returns the extension of type `T`.
    pub fn extension<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.extensions
            .read()
            .get(&TypeId::of::<T>())
            .cloned()?
            .downcast::<T>()
            .ok()
    }

    /// Stores an extension, shared with child contexts created afterwards.
    pub fn set_extension<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.extensions.write().insert(TypeId::of::<T>(), value);
    }

    // ----- response and short-circuit -----------------------------------------

    /// Writes the response and ends the request, stopping all remaining
    /// filters and the handler.
    pub fn write_response<T: Dto>(&self, response: T) {
        self.set_response(Box::new(response));
        self.end_request();
    }

    /// Sets the response without ending the request.
    pub fn set_response(&self, response: BoxedDto) {
        *self.response.lock() = Some(response);
    }

    /// Takes the response out of the context.
    pub fn take_response(&self) -> Option<BoxedDto> {
        self.response.lock().take()
    }

    /// Returns `true` if a response has been written.
    pub fn has_response(&self) -> bool {
        self.response.lock().is_some()
    }

    /// Ends the request.
    pub fn end_request(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once the request has been ended.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // ----- cancellation -------------------------------------------------------

    /// Cancels this call and every call nested in it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // ----- transport metadata -------------------------------------------------

    /// Overrides the status code reported by the transport.
    pub fn set_status(&self, status: u16) {
        *self.status.lock() = Some(status);
    }

    pub fn status(&self) -> Option<u16> {
        *self.status.lock()
    }

    /// Adds a response header, replacing an existing one with the same name.
    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let mut headers = self.headers.lock();
        headers.retain(|(n, _)| !n.eq_ignore_ascii_case(&name));
        headers.push((name, value.into()));
    }

    pub fn header(&self, name: &str) -> Option<String> {
        self.headers
            .lock()
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.clone())
    }

    /// Returns a copy of all response headers.
    pub fn headers(&self) -> Vec<(String, String)> {
        self.headers.lock().clone()
    }

    // ----- dependency scope ---------------------------------------------------

    /// Attaches the call's dependency scope unless one is already attached.
    ///
    /// Returns `true` if `scope` was attached.
    pub fn attach_scope(&self, scope: Scope) -> bool {
        let mut slot = self.scope.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(scope);
        true
    }

    /// Resolves a dependency from the call's scope.
    pub fn resolve<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.scope.lock().as_ref()?.resolve::<T>()
    }

    /// Releases the call's scope and every scoped instance it created.
    ///
    /// Returns `false` if there was nothing to release.
    pub fn release_scope(&self) -> bool {
        let scope = self.scope.lock().take();
        scope.is_some()
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("id", &self.id)
            .field("operation", &self.operation)
            .field("verb", &self.verb)
            .field("provenance", &self.provenance)
            .field("closed", &self.is_closed())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::Container;

    #[test]
    fn child_inherits_session_and_cancellation() {
        let parent = RequestContext::new("Outer", Verb::Get).with_session(Arc::new(42u32));
        parent.set_extension(Arc::new(String::from("host")));
        parent.set_item("trace", "abc");

        let child = parent.child("Inner", Verb::Post);
        assert_eq!(child.provenance(), Provenance::InProcess { depth: 1 });
        assert_eq!(child.child("Deeper", Verb::Post).provenance().depth(), 2);
        assert_eq!(*child.session::<u32>().unwrap(), 42);
        assert_eq!(*child.extension::<String>().unwrap(), "host");
        assert!(child.item("trace").is_none());

        parent.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn batch_items_carry_index() {
        let parent = RequestContext::new("Batch", Verb::Post);
        parent.set_item("tenant", "t1");
        let item = parent.for_batch_item(2);
        assert_eq!(item.batch_index(), Some(2));
        assert_eq!(item.item("tenant"), Some(Value::from("t1")));
        assert_eq!(item.provenance(), Provenance::External);
        assert_eq!(parent.batch_index(), None);
    }

    #[test]
    fn short_circuit_and_headers() {
        let ctx = RequestContext::new("Op", Verb::Post);
        assert!(!ctx.is_closed());
        ctx.write_response(String::from("done"));
        assert!(ctx.is_closed());
        assert!(ctx.has_response());
        assert_eq!(
            ctx.take_response().unwrap().downcast_ref::<String>().unwrap(),
            "done"
        );

        ctx.set_header("X-Test", "1");
        ctx.set_header("x-test", "2");
        assert_eq!(ctx.headers().len(), 1);
        assert_eq!(ctx.header("X-TEST").as_deref(), Some("2"));
    }

    #[test]
    fn scope_is_released_once() {
        let mut container = Container::new();
        container.scoped(|_| 7u8);
        let container = Arc::new(container);

        let ctx = RequestContext::new("Op", Verb::Post);
        assert!(ctx.attach_scope(container.scope()));
        assert!(!ctx.attach_scope(container.scope()));
        assert_eq!(*ctx.resolve::<u8>().unwrap(), 7);
        assert!(ctx.release_scope());
        assert!(!ctx.release_scope());
        assert!(ctx.resolve::<u8>().is_none());
    }
}
