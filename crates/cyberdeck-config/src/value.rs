//! Typed configuration values and the two-character key tags that declare
//! them.

use std::fmt;

use serde::Serialize;
use serde_json::Value;

use crate::ConfigError;

/// The five value types a configuration key can declare through its prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// `s_`
    Str,
    /// `f_`
    Float,
    /// `b_`
    Bool,
    /// `i_`
    Int,
    /// `l_` – JSON-encoded list.
    List,
}

impl ValueType {
    /// Resolve the type declared by `key`'s tag.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::UnknownTag`] when the key does not start with one
    /// of `s_`, `f_`, `b_`, `i_`, `l_`.
    pub fn from_key(key: &str) -> Result<Self, ConfigError> {
        match key.get(..2) {
            Some("s_") => Ok(ValueType::Str),
            Some("f_") => Ok(ValueType::Float),
            Some("b_") => Ok(ValueType::Bool),
            Some("i_") => Ok(ValueType::Int),
            Some("l_") => Ok(ValueType::List),
            other => Err(ConfigError::UnknownTag {
                tag: other.unwrap_or(key).to_string(),
                key: key.to_string(),
            }),
        }
    }

    /// The key prefix for this type.
    pub fn tag(&self) -> &'static str {
        match self {
            ValueType::Str => "s_",
            ValueType::Float => "f_",
            ValueType::Bool => "b_",
            ValueType::Int => "i_",
            ValueType::List => "l_",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Str => "string",
            ValueType::Float => "float",
            ValueType::Bool => "boolean",
            ValueType::Int => "integer",
            ValueType::List => "list",
        };
        f.write_str(name)
    }
}

/// A single typed configuration value.
///
/// Serializes to the plain JSON value (no variant tag), which is the shape the
/// command surface reports in `get_config`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Str(String),
    Float(f64),
    Bool(bool),
    Int(i64),
    List(Vec<Value>),
}

/// Boolean spelling accepted by the `b_` tag; anything else is `false`.
pub fn str_to_bool(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "yes" | "true" | "t" | "1"
    )
}

impl ConfigValue {
    /// Parse `raw` under the type declared by `key`'s tag.
    ///
    /// # Errors
    ///
    /// [`ConfigError::UnknownTag`] for an unrecognised prefix,
    /// [`ConfigError::InvalidValue`] when `raw` does not parse as the declared
    /// type.
    pub fn parse(key: &str, raw: &str) -> Result<Self, ConfigError> {
        let ty = ValueType::from_key(key)?;
        Self::parse_as(ty, key, raw)
    }

    /// Parse `raw` as `ty`; `key` is only used for error reporting.
    pub fn parse_as(ty: ValueType, key: &str, raw: &str) -> Result<Self, ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: raw.to_string(),
            expected: ty,
        };
        let trimmed = raw.trim();
        match ty {
            ValueType::Str => Ok(ConfigValue::Str(raw.to_string())),
            ValueType::Float => trimmed
                .parse::<f64>()
                .map(ConfigValue::Float)
                .map_err(|_| invalid()),
            ValueType::Bool => Ok(ConfigValue::Bool(str_to_bool(trimmed))),
            ValueType::Int => trimmed
                .parse::<i64>()
                .map(ConfigValue::Int)
                .map_err(|_| invalid()),
            ValueType::List => serde_json::from_str::<Vec<Value>>(trimmed)
                .map(ConfigValue::List)
                .map_err(|_| invalid()),
        }
    }

    /// Convert a JSON argument into a value of type `ty`.
    ///
    /// Strings are parsed with the same rules as the text format, so command
    /// arguments that arrive as query-string text behave like file values.
    pub fn from_json(ty: ValueType, key: &str, value: &Value) -> Result<Self, ConfigError> {
        let mismatch = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
            expected: ty,
        };
        match (ty, value) {
            (_, Value::String(s)) => Self::parse_as(ty, key, s),
            (ValueType::Float, Value::Number(n)) => n.as_f64().map(ConfigValue::Float).ok_or_else(mismatch),
            (ValueType::Int, Value::Number(n)) => n.as_i64().map(ConfigValue::Int).ok_or_else(mismatch),
            (ValueType::Bool, Value::Bool(b)) => Ok(ConfigValue::Bool(*b)),
            (ValueType::List, Value::Array(items)) => Ok(ConfigValue::List(items.clone())),
            _ => Err(mismatch()),
        }
    }

    /// The type of this value.
    pub fn value_type(&self) -> ValueType {
        match self {
            ConfigValue::Str(_) => ValueType::Str,
            ConfigValue::Float(_) => ValueType::Float,
            ConfigValue::Bool(_) => ValueType::Bool,
            ConfigValue::Int(_) => ValueType::Int,
            ConfigValue::List(_) => ValueType::List,
        }
    }

    /// Render the value in the persisted text format.
    ///
    /// `f64`'s `Display` prints the shortest form that parses back to the
    /// same bits, so floats survive a save/load cycle exactly.
    pub fn render(&self) -> String {
        match self {
            ConfigValue::Str(s) => s.clone(),
            ConfigValue::Float(f) => f.to_string(),
            ConfigValue::Bool(b) => b.to_string(),
            ConfigValue::Int(i) => i.to_string(),
            ConfigValue::List(items) => Value::Array(items.clone()).to_string(),
        }
    }

    /// The plain JSON form of the value.
    pub fn to_json(&self) -> Value {
        match self {
            ConfigValue::Str(s) => Value::String(s.clone()),
            ConfigValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ConfigValue::Bool(b) => Value::Bool(*b),
            ConfigValue::Int(i) => Value::from(*i),
            ConfigValue::List(items) => Value::Array(items.clone()),
        }
    }
}
