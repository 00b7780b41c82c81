//! HTTP service client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, ClientBuilder, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, trace};

use sluice_core::{
    BoxedDto, Codec, ErrorResponse, GatewayError, GatewayResult, JsonCodec, OperationInfo,
    ServiceError, ServiceGateway, TransportError, TransportResult,
};

use super::{BATCH_SUFFIX, METHOD_OVERRIDE_HEADER, oneway_path, reply_path};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A [`ServiceGateway`] calling a remote Sluice host over JSON/HTTP.
///
/// Remote faults come back as the same [`ServiceError`] the remote handler
/// raised; connection problems and timeouts are [`TransportError`]s.
///
/// ```rust,ignore
/// let client = JsonServiceClient::new("http://billing:8080")?;
/// let gateway = Gateway::from_service(client);
/// let invoice = gateway.send(GetInvoice { id: 7 }).await?;
/// ```
#[derive(Debug, Clone)]
pub struct JsonServiceClient {
    client: Client,
    base_url: String,
    bearer_token: Option<String>,
}

impl JsonServiceClient {
    /// Creates a client for the host at `base_url`.
    pub fn new(base_url: impl Into<String>) -> TransportResult<Self> {
        Self::with_timeout(base_url, DEFAULT_TIMEOUT)
    }

    /// Creates a client with a custom request timeout.
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> TransportResult<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(TransportError::InvalidConfig(format!(
                "base URL must start with http:// or https://, got '{base_url}'"
            )));
        }

        let client = ClientBuilder::new()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::InvalidConfig(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: None,
        })
    }

    /// Sends `token` as a bearer token with every call.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        self.bearer_token = Some(token.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, info: &OperationInfo, path: String, body: &Value) -> GatewayResult<Response> {
        let url = format!("{}{path}", self.base_url);
        trace!(url = %url, verb = %info.gateway_verb(), "Sending request");

        let mut request = self
            .client
            .post(&url)
            .header(METHOD_OVERRIDE_HEADER, info.gateway_verb().as_str())
            .header(reqwest::header::CONTENT_TYPE, JsonCodec.content_type())
            .body(JsonCodec.encode(body)?);
        if let Some(token) = &self.bearer_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                TransportError::Timeout { url: url.clone() }
            } else {
                TransportError::ConnectionFailed {
                    url: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        match serde_json::from_slice::<ErrorResponse>(&body) {
            Ok(fault) => {
                debug!(url = %url, status = status.as_u16(), "Remote call failed");
                Err(ServiceError::from_status(status.as_u16(), fault.response_status).into())
            }
            Err(_) => Err(TransportError::UnexpectedStatus {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            }
            .into()),
        }
    }
}

/// Reads a success body; `None` for `204 No Content`.
async fn read_body(response: Response) -> TransportResult<Option<Value>> {
    if response.status() == StatusCode::NO_CONTENT {
        return Ok(None);
    }
    let bytes = response
        .bytes()
        .await
        .map_err(|e| TransportError::Io(e.to_string()))?;
    JsonCodec.decode(&bytes).map(Some)
}

fn encode_all(requests: &[BoxedDto]) -> TransportResult<Value> {
    requests
        .iter()
        .map(|r| r.to_value())
        .collect::<Result<Vec<_>, _>>()
        .map(Value::Array)
        .map_err(TransportError::from)
}

fn decode_response(info: &OperationInfo, value: Value) -> GatewayResult<BoxedDto> {
    info.decode_response(value)
        .map_err(|e| GatewayError::Transport(e.into()))
}

#[async_trait]
impl ServiceGateway for JsonServiceClient {
    async fn send_dto(
        &self,
        info: &OperationInfo,
        request: BoxedDto,
    ) -> GatewayResult<Option<BoxedDto>> {
        let body = request.to_value().map_err(TransportError::from)?;
        let response = self.post(info, reply_path(info.name()), &body).await?;
        match read_body(response).await? {
            Some(value) => decode_response(info, value).map(Some),
            None => Ok(None),
        }
    }

    async fn send_all_dtos(
        &self,
        info: &OperationInfo,
        requests: Vec<BoxedDto>,
    ) -> GatewayResult<Option<Vec<BoxedDto>>> {
        let body = encode_all(&requests)?;
        let path = reply_path(&format!("{}{BATCH_SUFFIX}", info.name()));
        let response = self.post(info, path, &body).await?;

        match read_body(response).await? {
            Some(Value::Array(items)) => items
                .into_iter()
                .map(|item| decode_response(info, item))
                .collect::<GatewayResult<Vec<_>>>()
                .map(Some),
            Some(other) => Err(TransportError::Codec(format!(
                "expected a JSON array of responses, got {other}"
            ))
            .into()),
            None => Ok(None),
        }
    }

    async fn publish_dto(&self, info: &OperationInfo, request: BoxedDto) -> GatewayResult<()> {
        let body = request.to_value().map_err(TransportError::from)?;
        self.post(info, oneway_path(info.name()), &body).await?;
        Ok(())
    }

    async fn publish_all_dtos(
        &self,
        info: &OperationInfo,
        requests: Vec<BoxedDto>,
    ) -> GatewayResult<()> {
        let body = encode_all(&requests)?;
        let path = oneway_path(&format!("{}{BATCH_SUFFIX}", info.name()));
        self.post(info, path, &body).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            JsonServiceClient::new("ftp://example.com"),
            Err(TransportError::InvalidConfig(_))
        ));

        let client = JsonServiceClient::new("http://localhost:8080/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:8080");
    }

    #[tokio::test]
    async fn unreachable_host_is_a_transport_error() {
        #[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
        struct Ping;
        impl sluice_core::Describe for Ping {}
        impl sluice_core::Operation for Ping {
            const NAME: &'static str = "Ping";
            type Response = ();
        }

        let client = JsonServiceClient::with_timeout("http://127.0.0.1:9", Duration::from_secs(2))
            .unwrap();
        let info = OperationInfo::of::<Ping>();
        let err = client.send_dto(&info, Box::new(Ping)).await.unwrap_err();
        assert!(matches!(err, GatewayError::Transport(_)));
    }
}
