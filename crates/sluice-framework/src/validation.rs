//! Request validation.
//!
//! Validators run as typed request filters, so they apply to external
//! calls and in-process gateway calls alike. A failed validation ends the
//! call with a 400 fault carrying one [`ResponseError`] per failed rule.
//!
//! ```rust,ignore
//! let rules = RuleSet::<CreateOrder>::new()
//!     .not_empty("Required", |o| &o.required)
//!     .must("Quantity", "GreaterThan", "'Quantity' must be positive.", |o| o.quantity > 0);
//!
//! registry.add_validator(rules);
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use sluice_core::{Dto, ResponseError, ServiceError};

use crate::filter::FilterRegistry;

/// Validates values of type `T`.
pub trait Validator<T: ?Sized>: Send + Sync {
    /// Returns the failed rules; empty when `value` is valid.
    fn validate(&self, value: &T) -> Vec<ResponseError>;
}

impl<T: ?Sized, F> Validator<T> for F
where
    F: Fn(&T) -> Vec<ResponseError> + Send + Sync,
{
    fn validate(&self, value: &T) -> Vec<ResponseError> {
        self(value)
    }
}

// =============================================================================
// Emptiness
// =============================================================================

/// Values with an "empty" state, for [`RuleSet::not_empty`].
pub trait Emptiness {
    fn is_empty_value(&self) -> bool;
}

impl Emptiness for str {
    fn is_empty_value(&self) -> bool {
        self.trim().is_empty()
    }
}

impl Emptiness for String {
    fn is_empty_value(&self) -> bool {
        self.as_str().is_empty_value()
    }
}

impl<T> Emptiness for Vec<T> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<K, V, S> Emptiness for HashMap<K, V, S> {
    fn is_empty_value(&self) -> bool {
        self.is_empty()
    }
}

impl<T: Emptiness> Emptiness for Option<T> {
    fn is_empty_value(&self) -> bool {
        self.as_ref().is_none_or(Emptiness::is_empty_value)
    }
}

macro_rules! impl_emptiness_for_numbers {
    ($($ty:ty => $zero:expr),* $(,)?) => {
        $(
            impl Emptiness for $ty {
                fn is_empty_value(&self) -> bool {
                    *self == $zero
                }
            }
        )*
    };
}

impl_emptiness_for_numbers!(
    i32 => 0, i64 => 0, u32 => 0, u64 => 0, usize => 0, f32 => 0.0, f64 => 0.0,
);

// =============================================================================
// RuleSet
// =============================================================================

type Rule<T> = Box<dyn Fn(&T) -> Option<ResponseError> + Send + Sync>;

/// An ordered list of field rules.
pub struct RuleSet<T> {
    rules: Vec<Rule<T>>,
}

impl<T> Default for RuleSet<T> {
    fn default() -> Self {
        Self { rules: Vec::new() }
    }
}

impl<T: 'static> RuleSet<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Requires the field selected by `select` to be non-empty.
    pub fn not_empty<V>(mut self, field: &'static str, select: fn(&T) -> &V) -> Self
    where
        V: Emptiness + ?Sized + 'static,
    {
        self.rules.push(Box::new(move |value| {
            select(value).is_empty_value().then(|| {
                ResponseError::new(field, "NotEmpty", format!("'{field}' must not be empty."))
            })
        }));
        self
    }

    /// Requires `predicate` to hold, failing with `code` and `message`.
    pub fn must<P>(
        mut self,
        field: &'static str,
        code: &'static str,
        message: impl Into<String>,
        predicate: P,
    ) -> Self
    where
        P: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let message = message.into();
        self.rules.push(Box::new(move |value| {
            (!predicate(value)).then(|| ResponseError::new(field, code, message.clone()))
        }));
        self
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<T: 'static> Validator<T> for RuleSet<T> {
    fn validate(&self, value: &T) -> Vec<ResponseError> {
        self.rules.iter().filter_map(|rule| rule(value)).collect()
    }
}

/// Runs `validator` against `value`, turning failures into a validation fault.
pub fn validate<T: ?Sized>(validator: &dyn Validator<T>, value: &T) -> Result<(), ServiceError> {
    let errors = validator.validate(value);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ServiceError::validation(errors))
    }
}

impl FilterRegistry {
    /// Validates every request of type `T` before its handler runs.
    pub fn add_validator<T, V>(&mut self, validator: V) -> &mut Self
    where
        T: Dto,
        V: Validator<T> + 'static,
    {
        let validator: Arc<dyn Validator<T>> = Arc::new(validator);
        self.typed_request_filter::<T, _>(move |_, request: &mut T| {
            Ok(validate(validator.as_ref(), request)?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Order {
        required: String,
        tags: Vec<String>,
        note: Option<String>,
        quantity: i32,
    }

    fn order() -> Order {
        Order {
            required: "x".into(),
            tags: vec!["a".into()],
            note: Some("n".into()),
            quantity: 1,
        }
    }

    fn rules() -> RuleSet<Order> {
        RuleSet::new()
            .not_empty("Required", |o: &Order| &o.required)
            .not_empty("Tags", |o: &Order| &o.tags)
            .not_empty("Note", |o: &Order| &o.note)
            .must("Quantity", "GreaterThan", "'Quantity' must be positive.", |o| {
                o.quantity > 0
            })
    }

    #[test]
    fn valid_value_passes() {
        assert!(rules().validate(&order()).is_empty());
        assert!(validate(&rules(), &order()).is_ok());
    }

    #[test]
    fn failed_rules_keep_declaration_order() {
        let value = Order {
            required: "   ".into(),
            tags: Vec::new(),
            note: None,
            quantity: 0,
        };

        let errors = rules().validate(&value);
        let fields: Vec<_> = errors.iter().map(|e| e.field_name.as_str()).collect();
        assert_eq!(fields, ["Required", "Tags", "Note", "Quantity"]);
        assert_eq!(errors[3].error_code, "GreaterThan");
    }

    #[test]
    fn fault_reports_first_error() {
        let value = Order {
            required: String::new(),
            ..order()
        };

        let err = validate(&rules(), &value).unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.error_code(), "NotEmpty");
        assert_eq!(err.message(), "'Required' must not be empty.");
        assert_eq!(err.errors().len(), 1);
    }

    #[test]
    fn closures_are_validators() {
        let validator = |o: &Order| {
            if o.quantity > 10 {
                vec![ResponseError::new("Quantity", "LessThan", "too many")]
            } else {
                Vec::new()
            }
        };
        let value = Order {
            quantity: 11,
            ..order()
        };
        assert_eq!(validator.validate(&value).len(), 1);
    }
}
