//! Parameter values: JSON data or opaque Rust values.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

/// A Rust value that has no faithful JSON form.
///
/// The debug representation is captured at construction and used whenever the
/// value has to be exported.
#[derive(Clone)]
pub struct Opaque {
    repr: String,
    type_name: &'static str,
    inner: Arc<dyn Any + Send + Sync>,
}

impl Opaque {
    /// Wraps an arbitrary value.
    pub fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync + fmt::Debug,
    {
        Self {
            repr: format!("<{:?}>", value),
            type_name: std::any::type_name::<T>(),
            inner: Arc::new(value),
        }
    }

    /// Debug representation used for exports.
    pub fn repr(&self) -> &str {
        &self.repr
    }

    /// Type name of the wrapped value.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the wrapped value when it has type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.inner.downcast_ref::<T>()
    }
}

impl fmt::Debug for Opaque {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr)
    }
}

impl PartialEq for Opaque {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

/// Value held by a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    /// JSON representable value.
    Json(Value),
    /// Opaque value exported as its string representation.
    Opaque(Opaque),
}

impl ParamValue {
    /// Wraps an opaque value.
    pub fn opaque<T>(value: T) -> Self
    where
        T: Any + Send + Sync + fmt::Debug,
    {
        ParamValue::Opaque(Opaque::new(value))
    }

    /// Returns the JSON value when the parameter is JSON representable.
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            ParamValue::Json(value) => Some(value),
            ParamValue::Opaque(_) => None,
        }
    }

    /// Returns true when the value can be exported and restored faithfully.
    pub fn is_usable(&self) -> bool {
        matches!(self, ParamValue::Json(_))
    }

    /// Exports the value, degrading opaque values to their string form.
    ///
    /// The boolean reports whether the export is faithful.
    pub fn export(&self) -> (Value, bool) {
        match self {
            ParamValue::Json(value) => (value.clone(), true),
            ParamValue::Opaque(opaque) => (Value::String(opaque.repr().to_string()), false),
        }
    }

    /// Short type label recorded in parameter metadata.
    pub fn type_label(&self) -> String {
        match self {
            ParamValue::Json(Value::Null) => "null".to_string(),
            ParamValue::Json(Value::Bool(_)) => "bool".to_string(),
            ParamValue::Json(Value::Number(number)) if number.is_f64() => "float".to_string(),
            ParamValue::Json(Value::Number(_)) => "int".to_string(),
            ParamValue::Json(Value::String(_)) => "str".to_string(),
            ParamValue::Json(Value::Array(_)) => "list".to_string(),
            ParamValue::Json(Value::Object(_)) => "dict".to_string(),
            ParamValue::Opaque(opaque) => opaque.type_name().to_string(),
        }
    }

    /// Truthiness used for flag-like special parameters.
    pub fn is_truthy(&self) -> bool {
        match self {
            ParamValue::Json(Value::Null) => false,
            ParamValue::Json(Value::Bool(flag)) => *flag,
            ParamValue::Json(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0),
            ParamValue::Json(Value::String(text)) => !text.is_empty(),
            ParamValue::Json(Value::Array(items)) => !items.is_empty(),
            ParamValue::Json(Value::Object(map)) => !map.is_empty(),
            ParamValue::Opaque(_) => true,
        }
    }

    /// Boolean view of a JSON value.
    pub fn as_bool(&self) -> Option<bool> {
        self.as_json().and_then(Value::as_bool)
    }

    /// Integer view of a JSON value.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_json().and_then(Value::as_i64)
    }

    /// Float view of a JSON value.
    pub fn as_f64(&self) -> Option<f64> {
        self.as_json().and_then(Value::as_f64)
    }

    /// String view of a JSON value.
    pub fn as_str(&self) -> Option<&str> {
        self.as_json().and_then(Value::as_str)
    }
}

impl From<Value> for ParamValue {
    fn from(value: Value) -> Self {
        ParamValue::Json(value)
    }
}

impl From<Opaque> for ParamValue {
    fn from(value: Opaque) -> Self {
        ParamValue::Opaque(value)
    }
}

macro_rules! json_param_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for ParamValue {
                fn from(value: $ty) -> Self {
                    ParamValue::Json(Value::from(value))
                }
            }
        )*
    };
}

json_param_from!(bool, i32, i64, u32, u64, usize, f32, f64, String, &str);

impl PartialEq<Value> for ParamValue {
    fn eq(&self, other: &Value) -> bool {
        self.as_json() == Some(other)
    }
}
