//! Interfaces the dispatch core consumes from outside.
//!
//! # Overview
//!
//! - [`ServiceGateway`]: sends boxed DTOs to some target, in-process or
//!   remote. The typed `Gateway` facade in `sluice-framework` sits on top.
//! - [`MessageProducer`]: enqueues one-way messages for later execution.
//! - [`Codec`]: converts JSON values to and from wire bytes.

use async_trait::async_trait;
use serde_json::Value;

use crate::dto::BoxedDto;
use crate::error::{GatewayResult, TransportError, TransportResult};
use crate::operation::OperationInfo;

// =============================================================================
// Service Gateway
// =============================================================================

/// A target that executes operations on behalf of a caller.
///
/// `Ok(None)` means the call completed without a response: it was
/// cancelled, or a filter ended it without writing one.
#[async_trait]
pub trait ServiceGateway: Send + Sync {
    /// Sends one request and waits for its response.
    async fn send_dto(
        &self,
        info: &OperationInfo,
        request: BoxedDto,
    ) -> GatewayResult<Option<BoxedDto>>;

    /// Sends a batch of requests of the same operation.
    async fn send_all_dtos(
        &self,
        info: &OperationInfo,
        requests: Vec<BoxedDto>,
    ) -> GatewayResult<Option<Vec<BoxedDto>>>;

    /// Sends a one-way request without waiting for the handler.
    async fn publish_dto(&self, info: &OperationInfo, request: BoxedDto) -> GatewayResult<()>;

    /// Sends a batch of one-way requests.
    async fn publish_all_dtos(
        &self,
        info: &OperationInfo,
        requests: Vec<BoxedDto>,
    ) -> GatewayResult<()> {
        for request in requests {
            self.publish_dto(info, request).await?;
        }
        Ok(())
    }
}

// =============================================================================
// Messaging
// =============================================================================

/// A one-way message waiting to be executed.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    pub info: OperationInfo,
    pub body: BoxedDto,
}

impl QueuedMessage {
    pub fn new(info: OperationInfo, body: BoxedDto) -> Self {
        Self { info, body }
    }
}

/// Accepts one-way messages for background execution.
#[async_trait]
pub trait MessageProducer: Send + Sync {
    /// Enqueues a message. Returns once the message is accepted, not once it
    /// has been handled.
    async fn publish(&self, message: QueuedMessage) -> TransportResult<()>;
}

// =============================================================================
// Codec
// =============================================================================

/// Serializes DTO values for a transport.
pub trait Codec: Send + Sync {
    /// The content type written on the wire.
    fn content_type(&self) -> &'static str;

    fn encode(&self, value: &Value) -> TransportResult<Vec<u8>>;

    fn decode(&self, bytes: &[u8]) -> TransportResult<Value>;
}

/// The JSON codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn encode(&self, value: &Value) -> TransportResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn decode(&self, bytes: &[u8]) -> TransportResult<Value> {
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_slice(bytes).map_err(|e| TransportError::Codec(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn json_codec_handles_empty_bodies() {
        let codec = JsonCodec;
        assert_eq!(codec.decode(b"").unwrap(), Value::Null);

        let bytes = codec.encode(&serde_json::json!({ "a": 1 })).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap()["a"], 1);
        assert!(matches!(codec.decode(b"{"), Err(TransportError::Codec(_))));
    }
}
