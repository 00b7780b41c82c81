//! Ordered execution of filter groups.
//!
//! Request filters run in four groups:
//!
//! ```text
//! gateway ─▶ global ─▶ typed ─▶ attribute (by priority) ─▶ handler
//! ```
//!
//! Response filters run the same groups in reverse. Each filter is awaited
//! before the next one starts. After every filter the context is checked:
//! an ended request or a cancelled call stops the chain at once.

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, trace};

use sluice_core::{
    ChainFlow, Dto, FilterError, FilterResult, RequestContext, ServiceResult,
};

use super::registry::FilterRegistry;
use super::typed::ResolvedFilters;

/// Selects which filter groups run for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterStages {
    pub gateway: bool,
    pub global: bool,
    pub typed: bool,
    pub attribute: bool,
}

impl FilterStages {
    /// Every group.
    pub const ALL: Self = Self {
        gateway: true,
        global: true,
        typed: true,
        attribute: true,
    };

    /// External calls: everything but the gateway group.
    pub const EXTERNAL: Self = Self {
        gateway: false,
        global: true,
        typed: true,
        attribute: true,
    };

    /// In-process gateway calls by default: global filters are skipped.
    pub const IN_PROCESS: Self = Self {
        gateway: true,
        global: false,
        typed: true,
        attribute: true,
    };

    /// No filters at all.
    pub const NONE: Self = Self {
        gateway: false,
        global: false,
        typed: false,
        attribute: false,
    };
}

impl Default for FilterStages {
    fn default() -> Self {
        Self::EXTERNAL
    }
}

/// Runs the filter groups of a call.
#[derive(Debug, Clone)]
pub struct FilterChainExecutor {
    registry: Arc<FilterRegistry>,
}

impl FilterChainExecutor {
    pub fn new(registry: Arc<FilterRegistry>) -> Self {
        Self { registry }
    }

    /// Runs the request filters.
    ///
    /// Returns the fault of the first failing filter. Filters that already
    /// ran are not rolled back.
    pub async fn run_request_filters(
        &self,
        ctx: &RequestContext,
        request: &mut dyn Dto,
        resolved: &ResolvedFilters,
        stages: FilterStages,
    ) -> ServiceResult<ChainFlow> {
        if let Some(flow) = settled(ctx) {
            return Ok(flow);
        }

        if stages.gateway {
            for filter in self.registry.gateway_request_filters() {
                trace!(stage = "gateway", "Running request filter");
                if let Some(flow) = step(ctx, filter.execute(ctx, &mut *request)).await? {
                    return Ok(flow);
                }
            }
        }

        if stages.global {
            for filter in self.registry.request_filters() {
                trace!(stage = "global", "Running request filter");
                if let Some(flow) = step(ctx, filter.execute(ctx, &mut *request)).await? {
                    return Ok(flow);
                }
            }
        }

        if stages.typed {
            for filter in resolved.typed_request() {
                trace!(stage = "typed", "Running request filter");
                if let Some(flow) = step(ctx, filter.execute(ctx, &mut *request)).await? {
                    return Ok(flow);
                }
            }
        }

        if stages.attribute {
            for attr in resolved.request_attributes() {
                if !attr.applies_to(ctx.verb()) {
                    continue;
                }
                trace!(
                    stage = "attribute",
                    filter = attr.name(),
                    priority = attr.priority(),
                    "Running request filter"
                );
                let filter = attr.instantiate(ctx);
                if let Some(flow) = step(ctx, filter.execute(ctx, &mut *request)).await? {
                    return Ok(flow);
                }
            }
        }

        Ok(ChainFlow::Continue)
    }

    /// Runs the response filters, innermost group first.
    pub async fn run_response_filters(
        &self,
        ctx: &RequestContext,
        response: &mut dyn Dto,
        resolved: &ResolvedFilters,
        stages: FilterStages,
    ) -> ServiceResult<ChainFlow> {
        if let Some(flow) = settled(ctx) {
            return Ok(flow);
        }

        if stages.attribute {
            for attr in resolved.response_attributes() {
                if !attr.applies_to(ctx.verb()) {
                    continue;
                }
                trace!(
                    stage = "attribute",
                    filter = attr.name(),
                    priority = attr.priority(),
                    "Running response filter"
                );
                let filter = attr.instantiate(ctx);
                if let Some(flow) = step(ctx, filter.execute(ctx, &mut *response)).await? {
                    return Ok(flow);
                }
            }
        }

        if stages.typed {
            for filter in resolved.typed_response() {
                trace!(stage = "typed", "Running response filter");
                if let Some(flow) = step(ctx, filter.execute(ctx, &mut *response)).await? {
                    return Ok(flow);
                }
            }
        }

        if stages.global {
            for filter in self.registry.response_filters() {
                trace!(stage = "global", "Running response filter");
                if let Some(flow) = step(ctx, filter.execute(ctx, &mut *response)).await? {
                    return Ok(flow);
                }
            }
        }

        if stages.gateway {
            for filter in self.registry.gateway_response_filters() {
                trace!(stage = "gateway", "Running response filter");
                if let Some(flow) = step(ctx, filter.execute(ctx, &mut *response)).await? {
                    return Ok(flow);
                }
            }
        }

        Ok(ChainFlow::Continue)
    }
}

/// Returns the terminal state of `ctx`, if it has one.
fn settled(ctx: &RequestContext) -> Option<ChainFlow> {
    if ctx.is_cancelled() {
        Some(ChainFlow::Cancelled)
    } else if ctx.is_closed() {
        Some(ChainFlow::Ended)
    } else {
        None
    }
}

/// Awaits one filter, racing the call's cancellation.
///
/// Returns `Some` when the chain must stop.
async fn step(
    ctx: &RequestContext,
    filter: impl Future<Output = FilterResult>,
) -> ServiceResult<Option<ChainFlow>> {
    let result = tokio::select! {
        biased;
        _ = ctx.cancellation_token().cancelled() => {
            debug!("Call cancelled while a filter was pending");
            return Ok(Some(ChainFlow::Cancelled));
        }
        result = filter => result,
    };

    match result {
        Ok(()) => {
            let flow = settled(ctx);
            if let Some(flow) = flow {
                debug!(?flow, "Filter stopped the chain");
            }
            Ok(flow)
        }
        Err(FilterError::Cancelled) => {
            debug!("Filter cancelled the call");
            ctx.cancel();
            Ok(Some(ChainFlow::Cancelled))
        }
        Err(FilterError::Fault(err)) => {
            debug!(error = %err, "Filter failed");
            Err(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::typed::TypedFilterDispatcher;
    use parking_lot::Mutex;
    use serde::{Deserialize, Serialize};
    use sluice_core::{
        ApplyTo, ArgumentError, Describe, MetaBuilder, Operation, OperationInfo,
        RequestFilterAttribute, ResponseFilterAttribute, Verb,
    };

    type Log = Arc<Mutex<Vec<String>>>;

    fn log() -> Log {
        Arc::new(Mutex::new(Vec::new()))
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Traced;

    impl Describe for Traced {
        fn describe(meta: &mut MetaBuilder<Self>) {
            meta.request_filter(RequestFilterAttribute::from_fn(10, |ctx, _| {
                ctx.set_item("attr-10", true);
                Ok(())
            }))
            .request_filter(RequestFilterAttribute::from_fn(-10, |ctx, _| {
                if ctx.item("attr-10").is_some() {
                    return Err(ArgumentError::new("priority order violated").into());
                }
                ctx.set_item("attr-neg", true);
                Ok(())
            }))
            .request_filter(
                RequestFilterAttribute::from_fn(20, |ctx, _| {
                    ctx.set_item("get-only", true);
                    Ok(())
                })
                .with_apply_to(ApplyTo::GET),
            )
            .response_filter(ResponseFilterAttribute::from_fn(0, |ctx, _| {
                ctx.set_item("response-attr", true);
                Ok(())
            }));
        }
    }

    impl Operation for Traced {
        const NAME: &'static str = "Traced";
        type Response = String;
    }

    fn executor(registry: FilterRegistry) -> (FilterChainExecutor, Arc<ResolvedFilters>) {
        let registry = Arc::new(registry);
        let resolved =
            TypedFilterDispatcher::new(Arc::clone(&registry)).resolve(&OperationInfo::of::<Traced>());
        (FilterChainExecutor::new(registry), resolved)
    }

    fn recording(registry: &mut FilterRegistry, log: &Log) {
        let (a, b, c, d) = (log.clone(), log.clone(), log.clone(), log.clone());
        registry
            .global_request_filter(move |_, _| {
                a.lock().push("global".into());
                Ok(())
            })
            .gateway_request_filter(move |_, _| {
                b.lock().push("gateway".into());
                Ok(())
            })
            .typed_request_filter::<Traced, _>(move |_, _| {
                c.lock().push("typed".into());
                Ok(())
            })
            .global_response_filter(move |_, _| {
                d.lock().push("global-response".into());
                Ok(())
            });
    }

    #[tokio::test]
    async fn groups_run_in_order() {
        let log = log();
        let mut registry = FilterRegistry::new();
        recording(&mut registry, &log);
        let (executor, resolved) = executor(registry);

        let ctx = RequestContext::new("Traced", Verb::Post);
        let flow = executor
            .run_request_filters(&ctx, &mut Traced, &resolved, FilterStages::ALL)
            .await
            .unwrap();
        assert_eq!(flow, ChainFlow::Continue);
        assert_eq!(*log.lock(), vec!["gateway", "global", "typed"]);
        assert!(ctx.item("attr-neg").is_some());
        assert!(ctx.item("attr-10").is_some());
        assert!(ctx.item("get-only").is_none());

        let flow = executor
            .run_response_filters(&ctx, &mut String::new(), &resolved, FilterStages::ALL)
            .await
            .unwrap();
        assert_eq!(flow, ChainFlow::Continue);
        assert!(ctx.item("response-attr").is_some());
        assert_eq!(log.lock().last().map(String::as_str), Some("global-response"));
    }

    #[tokio::test]
    async fn in_process_stages_skip_global_filters() {
        let log = log();
        let mut registry = FilterRegistry::new();
        recording(&mut registry, &log);
        let (executor, resolved) = executor(registry);

        let ctx = RequestContext::new("Traced", Verb::Get);
        executor
            .run_request_filters(&ctx, &mut Traced, &resolved, FilterStages::IN_PROCESS)
            .await
            .unwrap();
        assert_eq!(*log.lock(), vec!["gateway", "typed"]);
        assert!(ctx.item("get-only").is_some());
    }

    #[tokio::test]
    async fn short_circuit_stops_remaining_filters() {
        let log = log();
        let mut registry = FilterRegistry::new();
        registry.global_request_filter(|ctx, _| {
            ctx.write_response(String::from("cached"));
            Ok(())
        });
        recording(&mut registry, &log);
        let (executor, resolved) = executor(registry);

        let ctx = RequestContext::new("Traced", Verb::Post);
        let flow = executor
            .run_request_filters(&ctx, &mut Traced, &resolved, FilterStages::EXTERNAL)
            .await
            .unwrap();
        assert_eq!(flow, ChainFlow::Ended);
        assert!(log.lock().is_empty());
        assert!(ctx.item("attr-neg").is_none());
        assert!(ctx.has_response());
    }

    #[tokio::test]
    async fn faults_abort_the_chain() {
        let log = log();
        let mut registry = FilterRegistry::new();
        registry.global_request_filter(|_, _| Err(ArgumentError::new("rejected").into()));
        recording(&mut registry, &log);
        let (executor, resolved) = executor(registry);

        let ctx = RequestContext::new("Traced", Verb::Post);
        let err = executor
            .run_request_filters(&ctx, &mut Traced, &resolved, FilterStages::EXTERNAL)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "ArgumentError");
        assert!(log.lock().is_empty());
    }

    #[tokio::test]
    async fn cancellation_while_pending() {
        let log = log();
        let mut registry = FilterRegistry::new();
        registry.global_request_filter_async(|ctx, _| {
            Box::pin(async move {
                ctx.cancel();
                std::future::pending::<()>().await;
                Ok(())
            })
        });
        recording(&mut registry, &log);
        let (executor, resolved) = executor(registry);

        let ctx = RequestContext::new("Traced", Verb::Post);
        let flow = executor
            .run_request_filters(&ctx, &mut Traced, &resolved, FilterStages::EXTERNAL)
            .await
            .unwrap();
        assert_eq!(flow, ChainFlow::Cancelled);
        assert!(log.lock().is_empty());
        assert!(!ctx.has_response());
    }

    #[tokio::test]
    async fn cancelled_error_marks_the_context() {
        let mut registry = FilterRegistry::new();
        registry.global_request_filter(|_, _| Err(FilterError::Cancelled));
        let (executor, resolved) = executor(registry);

        let ctx = RequestContext::new("Traced", Verb::Post);
        let flow = executor
            .run_request_filters(&ctx, &mut Traced, &resolved, FilterStages::EXTERNAL)
            .await
            .unwrap();
        assert_eq!(flow, ChainFlow::Cancelled);
        assert!(ctx.is_cancelled());
        assert!(ctx.item("attr-neg").is_none());
    }
}
