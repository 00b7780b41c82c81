//! Type-erased data transfer objects.
//!
//! Request and response payloads travel through the pipeline as [`BoxedDto`]
//! so that filters, gateways and queues can handle any operation uniformly.
//! Typed code recovers the concrete value with [`downcast_ref`](dyn Dto::downcast_ref)
//! and friends.

use std::any::{Any, TypeId};
use std::fmt::Debug;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

/// A boxed, type-erased DTO.
pub type BoxedDto = Box<dyn Dto>;

/// A request or response payload.
///
/// Implemented for every `Serialize + DeserializeOwned + Clone + Debug` type
/// that is `Send + Sync + 'static`; there is no need to implement it by hand.
pub trait Dto: Any + Send + Sync + Debug + 'static {
    /// Returns `self` as [`Any`] for downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Returns `self` as mutable [`Any`] for downcasting.
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Converts the box into a boxed [`Any`].
    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;

    /// The [`TypeId`] of the concrete DTO type.
    fn dto_type_id(&self) -> TypeId;

    /// The fully qualified name of the concrete DTO type.
    fn type_name(&self) -> &'static str;

    /// Serializes the DTO into a JSON value.
    fn to_value(&self) -> Result<Value, serde_json::Error>;

    /// Clones the DTO into a new box.
    fn clone_boxed(&self) -> BoxedDto;
}

impl<T> Dto for T
where
    T: Serialize + DeserializeOwned + Clone + Debug + Send + Sync + 'static,
{
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }

    fn dto_type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }

    fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }

    fn clone_boxed(&self) -> BoxedDto {
        Box::new(self.clone())
    }
}

impl dyn Dto {
    /// Returns `true` if the concrete type is `T`.
    pub fn is<T: Dto>(&self) -> bool {
        self.dto_type_id() == TypeId::of::<T>()
    }

    /// Returns a reference to the concrete value if it is a `T`.
    pub fn downcast_ref<T: Dto>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Returns a mutable reference to the concrete value if it is a `T`.
    pub fn downcast_mut<T: Dto>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }

    /// Unboxes the concrete value, handing the box back if it is not a `T`.
    pub fn downcast<T: Dto>(self: Box<Self>) -> Result<Box<T>, BoxedDto> {
        if !self.is::<T>() {
            return Err(self);
        }
        self.into_any()
            .downcast::<T>()
            .map_err(|_| unreachable!("type id checked above"))
    }
}

impl Clone for BoxedDto {
    fn clone(&self) -> Self {
        self.clone_boxed()
    }
}

/// Decodes a JSON value into a boxed `T`.
pub fn decode_boxed<T>(value: Value) -> Result<BoxedDto, serde_json::Error>
where
    T: Dto + DeserializeOwned,
{
    Ok(Box::new(serde_json::from_value::<T>(value)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Hello {
        name: String,
    }

    #[test]
    fn downcast_round_trip() {
        let mut dto: BoxedDto = Box::new(Hello {
            name: "World".into(),
        });
        assert!(dto.is::<Hello>());
        assert!(!dto.is::<String>());

        dto.downcast_mut::<Hello>().unwrap().name = "Sluice".into();
        assert_eq!(dto.downcast_ref::<Hello>().unwrap().name, "Sluice");

        let dto = dto.downcast::<String>().unwrap_err();
        let hello = dto.downcast::<Hello>().unwrap();
        assert_eq!(hello.name, "Sluice");
    }

    #[test]
    fn clone_and_serialize() {
        let dto: BoxedDto = Box::new(Hello { name: "a".into() });
        let copy = dto.clone();
        assert_eq!(copy.to_value().unwrap(), serde_json::json!({ "name": "a" }));
        assert!(copy.type_name().ends_with("Hello"));
    }

    #[test]
    fn decode_into_box() {
        let dto = decode_boxed::<Hello>(serde_json::json!({ "name": "b" })).unwrap();
        assert_eq!(dto.downcast_ref::<Hello>().unwrap().name, "b");
    }
}
