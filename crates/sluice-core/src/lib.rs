//! # Sluice Core
//!
//! Core types of the Sluice service gateway.
//!
//! This crate defines the vocabulary shared by every other Sluice crate:
//!
//! - **DTOs**: type-erased request and response payloads ([`Dto`], [`BoxedDto`])
//! - **Operations**: request types bound to a response type ([`Operation`], [`OperationInfo`])
//! - **Metadata**: per-type filter attributes and capabilities ([`Describe`], [`TypeMeta`])
//! - **Filters**: the async request and response filter contracts ([`RequestFilter`], [`ResponseFilter`])
//! - **Context**: per-call state, short-circuit and cancellation ([`RequestContext`])
//! - **Faults**: structured errors identical across transports ([`ServiceError`])
//! - **Container**: dependency registrations with per-call scopes ([`Container`], [`Scope`])
//! - **Capabilities**: gateways, message producers and codecs the core consumes
//!
//! ## Example
//!
//! ```rust,ignore
//! use sluice_core::prelude::*;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Hello { name: String }
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct HelloResponse { result: String }
//!
//! impl Describe for Hello {
//!     fn describe(meta: &mut MetaBuilder<Self>) {
//!         meta.request_filter(RequestFilterAttribute::from_fn(-10, |_, _| Ok(())));
//!     }
//! }
//! impl Describe for HelloResponse {}
//!
//! impl Operation for Hello {
//!     const NAME: &'static str = "Hello";
//!     type Response = HelloResponse;
//! }
//! ```

pub mod capability;
pub mod container;
pub mod context;
pub mod dto;
pub mod error;
pub mod filter;
pub mod meta;
pub mod operation;
pub mod verb;

pub use capability::{Codec, JsonCodec, MessageProducer, QueuedMessage, ServiceGateway};
pub use container::{Container, Lifetime, Scope, ServiceArc};
pub use context::{AUTO_BATCH_INDEX, Provenance, RequestContext};
pub use dto::{BoxedDto, Dto, decode_boxed};
pub use error::{
    ArgumentError, ErrorResponse, ForbiddenError, GatewayError, GatewayResult, NotFoundError,
    NotImplementedError, ResponseError, ResponseStatus, ServiceError, ServiceResult, Severity,
    StatusError, TransportError, TransportResult, UnauthorizedError, short_type_name,
};
pub use filter::{
    AsyncFilterFn, ChainFlow, FilterAttribute, FilterError, FilterFn, FilterResult,
    RequestFilter, RequestFilterAttribute, ResponseFilter, ResponseFilterAttribute,
};
pub use futures::future::BoxFuture;
pub use meta::{Cast, Describe, MetaBuilder, TypeMeta};
pub use operation::{Operation, OperationInfo};
pub use verb::{ApplyTo, UnknownVerb, Verb};

/// Prelude for common imports.
pub mod prelude {
    pub use super::context::RequestContext;
    pub use super::dto::{BoxedDto, Dto};
    pub use super::error::{ServiceError, ServiceResult, StatusError};
    pub use super::filter::{
        FilterError, FilterResult, RequestFilter, RequestFilterAttribute, ResponseFilter,
        ResponseFilterAttribute,
    };
    pub use super::meta::{Describe, MetaBuilder};
    pub use super::operation::Operation;
    pub use super::verb::{ApplyTo, Verb};
    pub use serde::{Deserialize, Serialize};
}
