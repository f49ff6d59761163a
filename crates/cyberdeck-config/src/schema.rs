//! Declared per-kind field lists, checked when a subsystem is built from its
//! section.

use crate::ConfigError;
use crate::document::{ID_KEY, SubsystemConfig};
use crate::value::ValueType;

/// One declared field of a subsystem kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    pub key: &'static str,
    pub ty: ValueType,
    pub required: bool,
}

impl FieldSpec {
    pub const fn required(key: &'static str, ty: ValueType) -> Self {
        Self { key, ty, required: true }
    }

    pub const fn optional(key: &'static str, ty: ValueType) -> Self {
        Self { key, ty, required: false }
    }
}

/// Fields every subsystem declares, whatever its kind.
pub const COMMON_FIELDS: &[FieldSpec] = &[
    FieldSpec::required(ID_KEY, ValueType::Str),
    FieldSpec::optional("s_type", ValueType::Str),
    FieldSpec::optional("s_description", ValueType::Str),
];

/// Check `config` (the section called `section`) against the common fields
/// and `schema`.
///
/// Keys that are not declared are left alone; they are carried through
/// persistence untouched.
///
/// # Errors
///
/// * [`ConfigError::MissingField`] – a required key is absent.
/// * [`ConfigError::WrongType`] – a declared key holds a value of another type.
/// * [`ConfigError::IdMismatch`] – `s_id` differs from the section name.
pub fn validate(section: &str, config: &SubsystemConfig, schema: &[FieldSpec]) -> Result<(), ConfigError> {
    for spec in COMMON_FIELDS.iter().chain(schema) {
        match config.get(spec.key) {
            None if spec.required => {
                return Err(ConfigError::MissingField {
                    section: section.to_string(),
                    key: spec.key.to_string(),
                });
            }
            None => {}
            Some(value) if value.value_type() != spec.ty => {
                return Err(ConfigError::WrongType {
                    section: section.to_string(),
                    key: spec.key.to_string(),
                    expected: spec.ty,
                    found: value.value_type(),
                });
            }
            Some(_) => {}
        }
    }

    match config.id() {
        Some(id) if id == section => Ok(()),
        Some(id) => Err(ConfigError::IdMismatch {
            section: section.to_string(),
            id: id.to_string(),
        }),
        None => Err(ConfigError::MissingField {
            section: section.to_string(),
            key: ID_KEY.to_string(),
        }),
    }
}
