//! Concrete subsystem drivers and the factory that builds them from
//! configuration sections.
//!
//! The driver is chosen by the section's `s_type` key:
//!
//! | `s_type`              | Driver                        | Kind        |
//! |-----------------------|-------------------------------|-------------|
//! | `device` (default)    | [`device::Device`]            | Device      |
//! | `audio`               | [`audio::Audio`]              | Device      |
//! | `display`             | [`display::Display`]          | Device      |
//! | `rigctl`              | [`rigctl::RigCtl`]            | Device      |
//! | `obc`                 | [`obc::Obc`]                  | Device      |
//! | `process`             | [`process::ProcessUnit`]      | Process     |
//! | `application`         | [`application::Application`]  | Application |

pub mod application;
pub mod audio;
pub mod common;
pub mod device;
pub mod display;
pub mod obc;
pub mod process;
pub mod rigctl;

use std::sync::Arc;

use cyberdeck_config::{ConfigError, FieldSpec, Section, validate};
use cyberdeck_types::DeckError;
use tracing::debug;

use crate::context::HardwareContext;
use crate::subsystem::Subsystem;

/// Key selecting the driver for a section.
pub const TYPE_KEY: &str = "s_type";

/// Declared schema for the driver named by `kind`, or `None` if unknown.
pub fn schema(kind: &str) -> Option<&'static [FieldSpec]> {
    Some(match kind {
        "device" => device::SCHEMA,
        "audio" => audio::SCHEMA,
        "display" => display::SCHEMA,
        "rigctl" => rigctl::SCHEMA,
        "obc" => obc::SCHEMA,
        "process" => process::SCHEMA,
        "application" => application::SCHEMA,
        _ => return None,
    })
}

/// Validate `section` against its driver's schema and construct the driver.
///
/// # Errors
///
/// [`DeckError::Config`] for an unknown `s_type` or a schema violation;
/// whatever the driver constructor returns otherwise (an unavailable power
/// pin, for instance).
pub fn build(section: &Section, ctx: &HardwareContext) -> Result<Arc<dyn Subsystem>, DeckError> {
    let name = section.name.as_str();
    let config = &section.config;
    let kind = config.get_str(TYPE_KEY).unwrap_or("device");
    let fields = schema(kind).ok_or_else(|| ConfigError::UnknownKind {
        section: name.to_string(),
        kind: kind.to_string(),
    })?;
    validate(name, config, fields)?;
    debug!(subsystem = name, kind, "building subsystem");

    let config = config.clone();
    let subsystem: Arc<dyn Subsystem> = match kind {
        "audio" => Arc::new(audio::Audio::new(name, config, ctx)?),
        "display" => Arc::new(display::Display::new(name, config, ctx)?),
        "rigctl" => Arc::new(rigctl::RigCtl::new(name, config, ctx)?),
        "obc" => Arc::new(obc::Obc::new(name, config)),
        "process" => Arc::new(process::ProcessUnit::new(name, config)?),
        "application" => Arc::new(application::Application::new(name, config)?),
        _ => Arc::new(device::Device::new(name, config, ctx)?),
    };
    Ok(subsystem)
}
