//! Operations: request DTOs bound to a response type.

use std::any::TypeId;
use std::fmt;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::dto::{BoxedDto, Dto, decode_boxed};
use crate::meta::{Describe, TypeMeta};
use crate::verb::Verb;

/// A request DTO that names an operation and declares its response type.
///
/// ```rust,ignore
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Hello { name: String }
///
/// impl Describe for Hello {}
///
/// impl Operation for Hello {
///     const NAME: &'static str = "Hello";
///     type Response = HelloResponse;
/// }
/// ```
pub trait Operation: Dto + Describe + Serialize + DeserializeOwned + Clone {
    /// The operation name used for routing and on the wire.
    const NAME: &'static str;

    /// The verb the operation is declared for, if any. Gateway calls use it,
    /// falling back to `POST`.
    const VERB: Option<Verb> = None;

    /// The response type. `()` for operations that return nothing.
    type Response: Dto + Describe + Serialize + DeserializeOwned + Clone;
}

/// The erased descriptor of an [`Operation`].
#[derive(Clone, Copy)]
pub struct OperationInfo {
    name: &'static str,
    verb: Option<Verb>,
    request_type: TypeId,
    request_type_name: &'static str,
    response_type: TypeId,
    response_type_name: &'static str,
    request_meta: fn() -> TypeMeta,
    response_meta: fn() -> TypeMeta,
    decode_request: fn(Value) -> Result<BoxedDto, serde_json::Error>,
    decode_response: fn(Value) -> Result<BoxedDto, serde_json::Error>,
}

impl OperationInfo {
    /// Describes `Op`.
    pub fn of<Op: Operation>() -> Self {
        Self {
            name: Op::NAME,
            verb: Op::VERB,
            request_type: TypeId::of::<Op>(),
            request_type_name: std::any::type_name::<Op>(),
            response_type: TypeId::of::<Op::Response>(),
            response_type_name: std::any::type_name::<Op::Response>(),
            request_meta: TypeMeta::of::<Op>,
            response_meta: TypeMeta::of::<Op::Response>,
            decode_request: decode_boxed::<Op>,
            decode_response: decode_boxed::<Op::Response>,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// The declared verb.
    pub fn declared_verb(&self) -> Option<Verb> {
        self.verb
    }

    /// The verb used for gateway calls: the declared verb, or `POST`.
    pub fn gateway_verb(&self) -> Verb {
        self.verb.unwrap_or(Verb::Post)
    }

    pub fn request_type(&self) -> TypeId {
        self.request_type
    }

    pub fn request_type_name(&self) -> &'static str {
        self.request_type_name
    }

    pub fn response_type(&self) -> TypeId {
        self.response_type
    }

    pub fn response_type_name(&self) -> &'static str {
        self.response_type_name
    }

    /// Evaluates the request type's metadata.
    pub fn request_meta(&self) -> TypeMeta {
        (self.request_meta)()
    }

    /// Evaluates the response type's metadata.
    pub fn response_meta(&self) -> TypeMeta {
        (self.response_meta)()
    }

    /// Decodes a request body.
    pub fn decode_request(&self, value: Value) -> Result<BoxedDto, serde_json::Error> {
        (self.decode_request)(value)
    }

    /// Decodes a response body.
    pub fn decode_response(&self, value: Value) -> Result<BoxedDto, serde_json::Error> {
        (self.decode_response)(value)
    }

    /// Returns `true` if `dto` is a request of this operation.
    pub fn accepts(&self, dto: &dyn Dto) -> bool {
        dto.dto_type_id() == self.request_type
    }
}

impl fmt::Debug for OperationInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationInfo")
            .field("name", &self.name)
            .field("verb", &self.verb)
            .field("request", &self.request_type_name)
            .field("response", &self.response_type_name)
            .finish()
    }
}

impl PartialEq for OperationInfo {
    fn eq(&self, other: &Self) -> bool {
        self.request_type == other.request_type
    }
}

impl Eq for OperationInfo {}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    impl Describe for Ping {}

    impl Operation for Ping {
        const NAME: &'static str = "Ping";
        const VERB: Option<Verb> = Some(Verb::Get);
        type Response = String;
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Fire;

    impl Describe for Fire {}

    impl Operation for Fire {
        const NAME: &'static str = "Fire";
        type Response = ();
    }

    #[test]
    fn describes_operation() {
        let info = OperationInfo::of::<Ping>();
        assert_eq!(info.name(), "Ping");
        assert_eq!(info.gateway_verb(), Verb::Get);
        assert_eq!(info.response_type(), TypeId::of::<String>());

        let request = info.decode_request(serde_json::json!({ "seq": 3 })).unwrap();
        assert!(info.accepts(request.as_ref()));
        assert_eq!(request.downcast_ref::<Ping>().unwrap().seq, 3);

        let response = info.decode_response(Value::from("pong")).unwrap();
        assert_eq!(response.downcast_ref::<String>().unwrap(), "pong");
    }

    #[test]
    fn undeclared_verb_defaults_to_post() {
        let info = OperationInfo::of::<Fire>();
        assert_eq!(info.declared_verb(), None);
        assert_eq!(info.gateway_verb(), Verb::Post);
        assert_ne!(info, OperationInfo::of::<Ping>());
    }
}
