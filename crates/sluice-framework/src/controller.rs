//! Operation routing.
//!
//! The [`ServiceController`] maps each registered operation to its handler
//! services, one per verb plus an optional catch-all. Lookups never fail
//! silently: a call with no matching route yields a
//! [`NotImplementedError`] fault (405).

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;

use tower::util::BoxCloneSyncService;
use tower::{Layer, Service, ServiceExt};
use tracing::{debug, warn};

use sluice_core::{
    BoxedDto, NotImplementedError, Operation, OperationInfo, ServiceError, ServiceResult, Verb,
};

use crate::handler::{Handler, HandlerService, Invocation, OperationService};

struct OperationRoutes {
    info: OperationInfo,
    any: Option<OperationService>,
    verbs: HashMap<Verb, OperationService>,
}

/// Routes operations to their handler services.
#[derive(Default)]
pub struct ServiceController {
    routes: HashMap<TypeId, OperationRoutes>,
    names: HashMap<String, TypeId>,
}

impl ServiceController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `Op` under any verb.
    pub fn register<Op, H, T>(&mut self, handler: H) -> &mut Self
    where
        Op: Operation,
        H: Handler<Op, T>,
        T: Send + 'static,
    {
        self.register_service::<Op, _>(None, HandlerService::<H, Op, T>::new(handler))
    }

    /// Registers `handler` for `Op` under a single verb.
    pub fn register_verb<Op, H, T>(&mut self, verb: Verb, handler: H) -> &mut Self
    where
        Op: Operation,
        H: Handler<Op, T>,
        T: Send + 'static,
    {
        self.register_service::<Op, _>(Some(verb), HandlerService::<H, Op, T>::new(handler))
    }

    /// Registers `handler` for `Op` wrapped in a tower layer.
    ///
    /// ```rust,ignore
    /// controller.register_layered::<Hello, _, _, _>(
    ///     MapRequestLayer::new(|inv: Invocation| inv),
    ///     hello,
    /// );
    /// ```
    pub fn register_layered<Op, H, T, L>(&mut self, layer: L, handler: H) -> &mut Self
    where
        Op: Operation,
        H: Handler<Op, T>,
        T: Send + 'static,
        L: Layer<HandlerService<H, Op, T>>,
        L::Service: Service<Invocation, Response = BoxedDto, Error = ServiceError>
            + Clone
            + Send
            + Sync
            + 'static,
        <L::Service as Service<Invocation>>::Future: Send + 'static,
    {
        let service = layer.layer(HandlerService::new(handler));
        self.register_service::<Op, _>(None, service)
    }

    /// Registers a prebuilt service for `Op`, under one verb or, with `None`,
    /// any verb.
    pub fn register_service<Op, S>(&mut self, verb: Option<Verb>, service: S) -> &mut Self
    where
        Op: Operation,
        S: Service<Invocation, Response = BoxedDto, Error = ServiceError>
            + Clone
            + Send
            + Sync
            + 'static,
        S::Future: Send + 'static,
    {
        let info = OperationInfo::of::<Op>();
        let service = BoxCloneSyncService::new(service);

        let key = info.name().to_ascii_lowercase();
        if let Some(existing) = self.names.insert(key, info.request_type())
            && existing != info.request_type()
        {
            warn!(
                operation = info.name(),
                "Operation name already registered for another type, replacing the name lookup"
            );
        }

        let routes = self
            .routes
            .entry(info.request_type())
            .or_insert_with(|| OperationRoutes {
                info,
                any: None,
                verbs: HashMap::new(),
            });
        let replaced = match verb {
            Some(verb) => routes.verbs.insert(verb, service).is_some(),
            None => routes.any.replace(service).is_some(),
        };
        if replaced {
            warn!(operation = info.name(), ?verb, "Replaced existing handler");
        } else {
            debug!(operation = info.name(), ?verb, "Registered handler");
        }
        self
    }

    /// Looks up an operation by name, ignoring case.
    pub fn operation(&self, name: &str) -> Option<OperationInfo> {
        let id = self.names.get(&name.to_ascii_lowercase())?;
        self.routes.get(id).map(|r| r.info)
    }

    /// Looks up an operation by request type.
    pub fn info_of(&self, request_type: TypeId) -> Option<OperationInfo> {
        self.routes.get(&request_type).map(|r| r.info)
    }

    /// All registered operations.
    pub fn operations(&self) -> impl Iterator<Item = OperationInfo> + '_ {
        self.routes.values().map(|r| r.info)
    }

    /// Selects the service for `info` and `verb`: the verb's route, falling
    /// back to the catch-all.
    pub fn route(&self, info: &OperationInfo, verb: Verb) -> ServiceResult<OperationService> {
        self.routes
            .get(&info.request_type())
            .and_then(|routes| routes.verbs.get(&verb).or(routes.any.as_ref()))
            .cloned()
            .ok_or_else(|| {
                NotImplementedError::new(format!(
                    "Could not find method named {verb}({name}) or Any({name})",
                    name = info.name()
                ))
                .into()
            })
    }

    /// Routes and calls a handler.
    pub async fn invoke(&self, invocation: Invocation) -> ServiceResult<BoxedDto> {
        let info = self
            .info_of(invocation.request.dto_type_id())
            .ok_or_else(|| {
                ServiceError::from(NotImplementedError::new(format!(
                    "No handler registered for '{}'",
                    invocation.request.type_name()
                )))
            })?;
        let service = self.route(&info, invocation.ctx.verb())?;
        service.oneshot(invocation).await
    }
}

impl fmt::Debug for ServiceController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceController")
            .field(
                "operations",
                &self.routes.values().map(|r| r.info.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};
    use sluice_core::{Describe, RequestContext};
    use tower::util::MapRequestLayer;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Echo {
        text: String,
    }

    impl Describe for Echo {}

    impl Operation for Echo {
        const NAME: &'static str = "Echo";
        type Response = String;
    }

    async fn echo(request: Echo) -> Result<String, ServiceError> {
        Ok(request.text)
    }

    async fn shout(request: Echo, verb: Verb) -> Result<String, ServiceError> {
        Ok(format!("{} {}", verb, request.text.to_uppercase()))
    }

    fn invocation(verb: Verb, text: &str) -> Invocation {
        Invocation::new(
            Arc::new(RequestContext::new("Echo", verb)),
            Box::new(Echo { text: text.into() }),
        )
    }

    #[tokio::test]
    async fn routes_by_verb_with_fallback() {
        let mut controller = ServiceController::new();
        controller.register(echo).register_verb(Verb::Put, shout);

        let response = controller.invoke(invocation(Verb::Post, "hi")).await.unwrap();
        assert_eq!(response.downcast_ref::<String>().unwrap(), "hi");

        let response = controller.invoke(invocation(Verb::Put, "hi")).await.unwrap();
        assert_eq!(response.downcast_ref::<String>().unwrap(), "PUT HI");

        assert_eq!(controller.operation("echo").unwrap().name(), "Echo");
    }

    #[tokio::test]
    async fn missing_route_is_not_implemented() {
        let mut controller = ServiceController::new();
        controller.register_verb(Verb::Get, echo);

        let err = controller.invoke(invocation(Verb::Delete, "x")).await.unwrap_err();
        assert_eq!(err.status_code(), 405);
        assert_eq!(err.error_code(), "NotImplementedError");

        let err = ServiceController::new()
            .invoke(invocation(Verb::Get, "x"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 405);
    }

    #[tokio::test]
    async fn layers_wrap_the_handler() {
        let mut controller = ServiceController::new();
        controller.register_layered(
            MapRequestLayer::new(|mut inv: Invocation| {
                if let Some(echo) = inv.request.downcast_mut::<Echo>() {
                    echo.text.push('!');
                }
                inv
            }),
            echo,
        );

        let response = controller.invoke(invocation(Verb::Get, "hey")).await.unwrap();
        assert_eq!(response.downcast_ref::<String>().unwrap(), "hey!");
    }
}
