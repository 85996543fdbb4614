//! Declared parameter and result types.
//!
//! Every endpoint parameter and every endpoint result carries a [`TypeSpec`]. A type spec answers
//! three questions used throughout binding execution:
//!
//! - what value a freshly generated state field starts with ([`TypeSpec::default_value`]),
//! - whether a value read from state is ready to be sent ([`TypeSpec::is_set`]),
//! - whether a value has the declared shape ([`TypeSpec::is_type_match`]).
//!
//! Plain JSON kinds (`number`, `string`, ...) treat their zero value as "unset". Matchers refine
//! that rule (`positive_number`, `number_range`, `anything_but`, ...) and [`Matcher`] lets callers
//! plug in their own predicate.

use std::{fmt, sync::Arc};

use serde::Deserialize;
use serde_json::{Map, Number, Value};

/// User-supplied validator for a parameter or result value.
pub trait Matcher: Send + Sync + fmt::Debug {
    /// Short human readable name used in warnings.
    fn name(&self) -> &str;

    /// Returns `true` when the value is ready to be used as a request parameter.
    fn is_set(&self, value: &Value) -> bool;

    /// Value a generated state field is initialised with.
    fn default_value(&self) -> Value;

    /// Shape check used by strict mode. Accepts everything unless overridden.
    fn accepts(&self, _value: &Value) -> bool {
        true
    }
}

/// Closure-backed [`Matcher`] created through [`TypeSpec::custom`].
pub struct FnMatcher {
    name: String,
    default: Value,
    predicate: Box<dyn Fn(&Value) -> bool + Send + Sync>,
}

impl fmt::Debug for FnMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMatcher").field("name", &self.name).field("default", &self.default).finish_non_exhaustive()
    }
}

impl Matcher for FnMatcher {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_set(&self, value: &Value) -> bool {
        (self.predicate)(value)
    }

    fn default_value(&self) -> Value {
        self.default.clone()
    }
}

/// Declared type or matcher of a parameter or endpoint result.
///
/// Deserializes from the snake_case variant name (`"number"`) for plain kinds and from a single-key
/// map for matchers carrying data (`{ number_range: { min: 1, max: 10 } }`).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeSpec {
    Number,
    String,
    Boolean,
    Array,
    #[default]
    Object,
    PositiveNumber,
    NegativeNumber,
    NumberRange {
        min: f64,
        max: f64,
    },
    ArrayLength {
        length: usize,
    },
    ObjectKeys {
        keys: Vec<String>,
    },
    /// Always set; `default` seeds the generated field.
    All {
        #[serde(default)]
        default: Value,
    },
    /// Set for every value except the sentinel, which is also the default.
    AnythingBut {
        value: Value,
    },
    #[serde(skip)]
    Custom(Arc<dyn Matcher>),
}

impl PartialEq for TypeSpec {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::NumberRange { min: a_min, max: a_max }, Self::NumberRange { min: b_min, max: b_max }) => a_min == b_min && a_max == b_max,
            (Self::ArrayLength { length: a }, Self::ArrayLength { length: b }) => a == b,
            (Self::ObjectKeys { keys: a }, Self::ObjectKeys { keys: b }) => a == b,
            (Self::All { default: a }, Self::All { default: b }) => a == b,
            (Self::AnythingBut { value: a }, Self::AnythingBut { value: b }) => a == b,
            (Self::Custom(a), Self::Custom(b)) => Arc::ptr_eq(a, b),
            _ => std::mem::discriminant(self) == std::mem::discriminant(other),
        }
    }
}

impl TypeSpec {
    pub fn number_range(min: f64, max: f64) -> Self {
        Self::NumberRange { min, max }
    }

    pub fn array_length(length: usize) -> Self {
        Self::ArrayLength { length }
    }

    pub fn object_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::ObjectKeys {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }

    pub fn all(default: Value) -> Self {
        Self::All { default }
    }

    pub fn anything_but(value: Value) -> Self {
        Self::AnythingBut { value }
    }

    /// Builds a custom matcher from a predicate and the default value for generated fields.
    pub fn custom<F>(name: impl Into<String>, default: Value, predicate: F) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        Self::Custom(Arc::new(FnMatcher {
            name: name.into(),
            default,
            predicate: Box::new(predicate),
        }))
    }

    /// Name used in log messages.
    pub fn name(&self) -> &str {
        match self {
            Self::Number => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
            Self::PositiveNumber => "positive_number",
            Self::NegativeNumber => "negative_number",
            Self::NumberRange { .. } => "number_range",
            Self::ArrayLength { .. } => "array_length",
            Self::ObjectKeys { .. } => "object_keys",
            Self::All { .. } => "all",
            Self::AnythingBut { .. } => "anything_but",
            Self::Custom(matcher) => matcher.name(),
        }
    }

    /// Initial value of a state field declared with this type.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Number => Value::from(0),
            Self::String => Value::String(String::new()),
            Self::Boolean => Value::Bool(false),
            Self::Array | Self::ArrayLength { .. } => Value::Array(Vec::new()),
            Self::Object | Self::ObjectKeys { .. } => Value::Object(Map::new()),
            Self::PositiveNumber => Value::from(-1),
            Self::NegativeNumber => Value::from(1),
            Self::NumberRange { min, .. } => number_value(min - 1.0),
            Self::All { default } => default.clone(),
            Self::AnythingBut { value } => value.clone(),
            Self::Custom(matcher) => matcher.default_value(),
        }
    }

    /// Returns `true` when the value is ready to be sent as a parameter.
    pub fn is_set(&self, value: &Value) -> bool {
        match self {
            Self::Number => value.as_f64().is_some_and(|number| number != 0.0),
            Self::String => value.as_str().is_some_and(|text| !text.is_empty()),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.as_array().is_some_and(|items| !items.is_empty()),
            Self::Object => value.as_object().is_some_and(|fields| !fields.is_empty()),
            Self::PositiveNumber => value.as_f64().is_some_and(|number| number > 0.0),
            Self::NegativeNumber => value.as_f64().is_some_and(|number| number < 0.0),
            Self::NumberRange { min, max } => value.as_f64().is_some_and(|number| number >= *min && number <= *max),
            Self::ArrayLength { length } => value.as_array().is_some_and(|items| items.len() == *length),
            Self::ObjectKeys { keys } => value
                .as_object()
                .is_some_and(|fields| keys.iter().all(|key| fields.contains_key(key))),
            Self::All { .. } => true,
            Self::AnythingBut { value: sentinel } => value != sentinel,
            Self::Custom(matcher) => matcher.is_set(value),
        }
    }

    pub fn is_unset(&self, value: &Value) -> bool {
        !self.is_set(value)
    }

    /// Shape check used by strict mode warnings.
    pub fn is_type_match(&self, value: &Value) -> bool {
        match self {
            Self::Number | Self::PositiveNumber | Self::NegativeNumber | Self::NumberRange { .. } => value.is_number(),
            Self::String => value.is_string(),
            Self::Boolean => value.is_boolean(),
            Self::Array | Self::ArrayLength { .. } => value.is_array(),
            Self::Object | Self::ObjectKeys { .. } => value.is_object(),
            Self::All { .. } | Self::AnythingBut { .. } => true,
            Self::Custom(matcher) => matcher.accepts(value),
        }
    }
}

fn number_value(number: f64) -> Value {
    if number.fract() == 0.0 && number.abs() < i64::MAX as f64 {
        Value::from(number as i64)
    } else {
        Number::from_f64(number).map(Value::Number).unwrap_or(Value::Null)
    }
}
