//! `cyberdeck-config` – persisted subsystem configuration.
//!
//! # Modules
//!
//! - [`value`] – [`ConfigValue`] and the `s_`/`f_`/`b_`/`i_`/`l_` key tags.
//! - [`document`] – [`ConfigDocument`]: the sectioned text format, parsed and
//!   rendered losslessly, plus [`load`]/[`save`] for files.
//! - [`schema`] – [`FieldSpec`] lists declared by each subsystem kind and
//!   [`validate`] to check a section against one.

use cyberdeck_types::DeckError;
use thiserror::Error;

pub mod document;
pub mod schema;
pub mod value;

pub use document::{ConfigDocument, ID_KEY, Section, SubsystemConfig, check_storable, load, save};
pub use schema::{COMMON_FIELDS, FieldSpec, validate};
pub use value::{ConfigValue, ValueType, str_to_bool};

/// Everything that can go wrong while reading, validating or writing
/// configuration.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid type tag '{tag}' at key '{key}'")]
    UnknownTag { tag: String, key: String },

    #[error("value '{value}' for key '{key}' is not a valid {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: ValueType,
    },

    #[error("{0}")]
    Syntax(String),

    #[error("duplicate section [{0}]")]
    DuplicateSection(String),

    #[error("section [{section}] repeats key '{key}'")]
    DuplicateKey { section: String, key: String },

    #[error("section [{section}] is missing required field '{key}'")]
    MissingField { section: String, key: String },

    #[error("section [{section}] field '{key}' must be a {expected}, found a {found}")]
    WrongType {
        section: String,
        key: String,
        expected: ValueType,
        found: ValueType,
    },

    #[error("section [{section}] declares s_id '{id}'")]
    IdMismatch { section: String, id: String },

    #[error("unknown subsystem type '{kind}' in section [{section}]")]
    UnknownKind { section: String, kind: String },

    #[error("line {line}: {source}")]
    AtLine {
        line: usize,
        #[source]
        source: Box<ConfigError>,
    },

    #[error("{path}: {details}")]
    Io { path: String, details: String },

    #[error("key '{key}' cannot be stored: {reason}")]
    Unstorable { key: String, reason: &'static str },
}

impl From<ConfigError> for DeckError {
    fn from(err: ConfigError) -> Self {
        DeckError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_maps_to_config_class() {
        let err: DeckError = ConfigError::UnknownKind {
            section: "gps".into(),
            kind: "toaster".into(),
        }
        .into();
        assert!(err.to_string().starts_with("ConfigError"));
        assert!(err.to_string().contains("gps"));
    }

    #[test]
    fn line_context_in_message() {
        let err = ConfigError::AtLine {
            line: 7,
            source: Box::new(ConfigError::Syntax("empty key".into())),
        };
        assert_eq!(err.to_string(), "line 7: empty key");
    }
}
