//! HTTP server exposing a [`ServiceHost`].

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
};
use serde_json::Value;
use tracing::{Instrument, debug, error, info, info_span};

use sluice_core::{
    ArgumentError, BoxedDto, Codec, JsonCodec, NotFoundError, NotImplementedError, OperationInfo,
    RequestContext, ServiceError, TransportResult, Verb,
};
use sluice_framework::{Outcome, ServiceHost};

use super::{METHOD_OVERRIDE_HEADER, split_batch};
use crate::handle::ListenerHandle;

/// Serves a [`ServiceHost`] over JSON/HTTP.
#[derive(Debug, Clone)]
pub struct HttpServer {
    host: Arc<ServiceHost>,
}

impl HttpServer {
    pub fn new(host: Arc<ServiceHost>) -> Self {
        Self { host }
    }

    /// The axum router of the JSON routes, for embedding in a larger app.
    pub fn router(&self) -> Router {
        Router::new()
            .route("/json/reply/{name}", any(reply))
            .route("/json/oneway/{name}", any(oneway))
            .with_state(Arc::clone(&self.host))
    }

    /// Binds `addr` and serves until the returned handle is stopped or
    /// dropped.
    pub async fn listen(&self, addr: &str) -> TransportResult<ListenerHandle> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let router = self.router();

        info!(addr = %local_addr, "HTTP server listening");

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();

        tokio::spawn(async move {
            let server = axum::serve(listener, router).with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
                info!("HTTP server shutting down");
            });
            if let Err(e) = server.await {
                error!(error = %e, "HTTP server error");
            }
        });

        Ok(ListenerHandle::new(
            format!("http-server-{local_addr}"),
            local_addr,
            shutdown_tx,
        ))
    }
}

/// Serves `host` on `addr`.
pub async fn serve(host: Arc<ServiceHost>, addr: &str) -> TransportResult<ListenerHandle> {
    HttpServer::new(host).listen(addr).await
}

// =============================================================================
// Route handlers
// =============================================================================

/// A parsed inbound call.
struct Call {
    info: OperationInfo,
    batch: bool,
    ctx: Arc<RequestContext>,
    body: Value,
}

impl Call {
    fn parse(
        host: &ServiceHost,
        name: &str,
        method: &Method,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<Self, ServiceError> {
        let (name, batch) = split_batch(name);
        let info = host
            .operation(name)
            .ok_or_else(|| NotFoundError::new(format!("Unknown operation '{name}'")))?;

        let verb = headers
            .get(METHOD_OVERRIDE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or(method.as_str());
        let verb: Verb = verb
            .parse()
            .map_err(|_| NotImplementedError::new(format!("Unsupported verb '{verb}'")))?;

        let body = JsonCodec
            .decode(body)
            .map_err(|e| ArgumentError::new(e.to_string()))?;

        Ok(Self {
            ctx: Arc::new(host.new_context(&info, verb)),
            info,
            batch,
            body,
        })
    }

    fn decode(&self, value: Value) -> Result<BoxedDto, ServiceError> {
        self.info.decode_request(value).map_err(|e| {
            ArgumentError::new(format!("Invalid '{}' request: {e}", self.info.name())).into()
        })
    }

    fn decode_all(&mut self) -> Result<Vec<BoxedDto>, ServiceError> {
        match self.body.take() {
            Value::Array(items) => items.into_iter().map(|item| self.decode(item)).collect(),
            _ => Err(ArgumentError::new(format!(
                "Batch of '{}' must be a JSON array",
                self.info.name()
            ))
            .into()),
        }
    }
}

async fn reply(
    State(host): State<Arc<ServiceHost>>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let span = info_span!("http", route = "reply", name = %name);
    async move {
        let mut call = match Call::parse(&host, &name, &method, &headers, &body) {
            Ok(call) => call,
            Err(err) => return fault(&err, None),
        };

        if call.batch {
            let requests = match call.decode_all() {
                Ok(requests) => requests,
                Err(err) => return fault(&err, Some(call.ctx.as_ref())),
            };
            match host.execute_batch(&call.ctx, &call.info, requests).await {
                Ok(Some(responses)) => {
                    let values = responses
                        .iter()
                        .map(|r| r.to_value())
                        .collect::<Result<Vec<_>, _>>();
                    match values {
                        Ok(values) => ok(&call.ctx, Value::Array(values)),
                        Err(e) => fault(&encode_error(e), Some(call.ctx.as_ref())),
                    }
                }
                Ok(None) => no_content(&call.ctx),
                Err(failure) => fault(&failure.error, Some(call.ctx.as_ref())),
            }
        } else {
            let body = call.body.take();
            let request = match call.decode(body) {
                Ok(request) => request,
                Err(err) => return fault(&err, Some(call.ctx.as_ref())),
            };
            match host.execute(Arc::clone(&call.ctx), request).await {
                Ok(outcome) => respond(&call.ctx, outcome),
                Err(err) => fault(&err, Some(call.ctx.as_ref())),
            }
        }
    }
    .instrument(span)
    .await
}

async fn oneway(
    State(host): State<Arc<ServiceHost>>,
    Path(name): Path<String>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let span = info_span!("http", route = "oneway", name = %name);
    async move {
        let mut call = match Call::parse(&host, &name, &method, &headers, &body) {
            Ok(call) => call,
            Err(err) => return fault(&err, None),
        };

        let requests = if call.batch {
            call.decode_all()
        } else {
            let body = call.body.take();
            call.decode(body).map(|r| vec![r])
        };
        let requests = match requests {
            Ok(requests) => requests,
            Err(err) => return fault(&err, Some(call.ctx.as_ref())),
        };

        for request in requests {
            if let Err(err) = host.enqueue(&call.ctx, &call.info, request).await {
                return fault(&err, Some(call.ctx.as_ref()));
            }
        }
        no_content(&call.ctx)
    }
    .instrument(span)
    .await
}

// =============================================================================
// Responses
// =============================================================================

fn respond(ctx: &RequestContext, outcome: Outcome) -> Response {
    match outcome.into_response() {
        Some(response) => match response.to_value() {
            Ok(value) => ok(ctx, value),
            Err(e) => fault(&encode_error(e), Some(ctx)),
        },
        None => no_content(ctx),
    }
}

fn ok(ctx: &RequestContext, value: Value) -> Response {
    let status = ctx
        .status()
        .and_then(|s| StatusCode::from_u16(s).ok())
        .unwrap_or(StatusCode::OK);
    with_headers(ctx, (status, Json(value)).into_response())
}

fn no_content(ctx: &RequestContext) -> Response {
    with_headers(ctx, StatusCode::NO_CONTENT.into_response())
}

fn fault(err: &ServiceError, ctx: Option<&RequestContext>) -> Response {
    debug!(status = err.status_code(), error = %err, "Answering with a fault");
    let status =
        StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let response = (status, Json(err.to_response())).into_response();
    match ctx {
        Some(ctx) => with_headers(ctx, response),
        None => response,
    }
}

fn encode_error(err: serde_json::Error) -> ServiceError {
    ServiceError::new(500, "SerializationException", err.to_string())
}

fn with_headers(ctx: &RequestContext, mut response: Response) -> Response {
    for (name, value) in ctx.headers() {
        match (
            HeaderName::try_from(name.as_str()),
            HeaderValue::try_from(value.as_str()),
        ) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => debug!(header = %name, "Skipping invalid response header"),
        }
    }
    response
}
