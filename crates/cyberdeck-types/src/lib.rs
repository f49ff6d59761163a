use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Optional behaviour a subsystem may declare.  Every [`Operation`] is bound
/// to exactly one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Exposes and accepts edits to its typed settings map.
    Configurable,
    /// Reports a JSON status snapshot.
    StatusReporting,
    /// Can be switched on and off (usually through a GPIO pin).
    PowerControllable,
    /// Owns an external process that can be started and stopped.
    ProcessControllable,
    /// Audio mixer: volume, mute and test tone.
    VolumeControl,
    /// Display backlight brightness and screen capture.
    BrightnessControl,
    /// Radio transceiver tuning via rig control.
    RadioTuning,
    /// Host power management (reboot / shutdown of the control unit).
    HostControl,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Capability::Configurable => "configurable",
            Capability::StatusReporting => "status_reporting",
            Capability::PowerControllable => "power_controllable",
            Capability::ProcessControllable => "process_controllable",
            Capability::VolumeControl => "volume_control",
            Capability::BrightnessControl => "brightness_control",
            Capability::RadioTuning => "radio_tuning",
            Capability::HostControl => "host_control",
        };
        f.write_str(name)
    }
}

/// The closed command vocabulary accepted by the dispatcher.
///
/// Parsing an operation name never falls back to anything dynamic: a name that
/// is not listed here is rejected before any subsystem is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    GetConfig,
    SetConfig,
    GetStatus,
    GetConfigStatus,
    SetPower,
    TogglePower,
    StartProcess,
    StopProcess,
    SetVolume,
    IncrementVolume,
    DecrementVolume,
    SetMute,
    ToggleMute,
    SetTest,
    SetBrightness,
    IncrementBrightness,
    DecrementBrightness,
    Screenshot,
    GetFrequency,
    SetFrequency,
    GetMode,
    Reboot,
    Shutdown,
}

impl Operation {
    /// Every operation, in documentation order.
    pub const ALL: [Operation; 23] = [
        Operation::GetConfig,
        Operation::SetConfig,
        Operation::GetStatus,
        Operation::GetConfigStatus,
        Operation::SetPower,
        Operation::TogglePower,
        Operation::StartProcess,
        Operation::StopProcess,
        Operation::SetVolume,
        Operation::IncrementVolume,
        Operation::DecrementVolume,
        Operation::SetMute,
        Operation::ToggleMute,
        Operation::SetTest,
        Operation::SetBrightness,
        Operation::IncrementBrightness,
        Operation::DecrementBrightness,
        Operation::Screenshot,
        Operation::GetFrequency,
        Operation::SetFrequency,
        Operation::GetMode,
        Operation::Reboot,
        Operation::Shutdown,
    ];

    /// Wire name used on the command surface.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::GetConfig => "get_config",
            Operation::SetConfig => "set_config",
            Operation::GetStatus => "get_status",
            Operation::GetConfigStatus => "get_configstatus",
            Operation::SetPower => "set_power",
            Operation::TogglePower => "toggle_power",
            Operation::StartProcess => "start_process",
            Operation::StopProcess => "stop_process",
            Operation::SetVolume => "set_volume",
            Operation::IncrementVolume => "increment_volume",
            Operation::DecrementVolume => "decrement_volume",
            Operation::SetMute => "set_mute",
            Operation::ToggleMute => "toggle_mute",
            Operation::SetTest => "set_test",
            Operation::SetBrightness => "set_brightness",
            Operation::IncrementBrightness => "increment_brightness",
            Operation::DecrementBrightness => "decrement_brightness",
            Operation::Screenshot => "screenshot",
            Operation::GetFrequency => "get_frequency",
            Operation::SetFrequency => "set_frequency",
            Operation::GetMode => "get_mode",
            Operation::Reboot => "reboot",
            Operation::Shutdown => "shutdown",
        }
    }

    /// The capability a subsystem must declare to accept this operation.
    pub fn capability(&self) -> Capability {
        match self {
            Operation::GetConfig | Operation::SetConfig => Capability::Configurable,
            Operation::GetStatus => Capability::StatusReporting,
            // Needs both; dispatch checks StatusReporting separately.
            Operation::GetConfigStatus => Capability::Configurable,
            Operation::SetPower | Operation::TogglePower => Capability::PowerControllable,
            Operation::StartProcess | Operation::StopProcess => Capability::ProcessControllable,
            Operation::SetVolume
            | Operation::IncrementVolume
            | Operation::DecrementVolume
            | Operation::SetMute
            | Operation::ToggleMute
            | Operation::SetTest => Capability::VolumeControl,
            Operation::SetBrightness
            | Operation::IncrementBrightness
            | Operation::DecrementBrightness
            | Operation::Screenshot => Capability::BrightnessControl,
            Operation::GetFrequency | Operation::SetFrequency | Operation::GetMode => {
                Capability::RadioTuning
            }
            Operation::Reboot | Operation::Shutdown => Capability::HostControl,
        }
    }

    /// Number of positional arguments the operation takes.
    pub fn arity(&self) -> usize {
        match self {
            Operation::SetConfig => 2,
            Operation::SetPower
            | Operation::SetVolume
            | Operation::SetMute
            | Operation::SetTest
            | Operation::SetBrightness
            | Operation::SetFrequency => 1,
            _ => 0,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = DeckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.name() == s)
            .ok_or_else(|| DeckError::UnknownOperation(s.to_string()))
    }
}

/// Coarse classification of a subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubsystemKind {
    /// A physical peripheral on the control unit.
    Device,
    /// A long-running external process supervised in the background.
    Process,
    /// A GUI application launched on demand.
    Application,
}

/// Uniform `{success, response}` result wrapper returned by every command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub success: bool,
    pub response: Value,
}

impl Envelope {
    /// A successful envelope carrying `response` unchanged.
    pub fn ok(response: impl Into<Value>) -> Self {
        Self {
            success: true,
            response: response.into(),
        }
    }

    /// A failed envelope whose response is the error's display string.
    pub fn failure(err: &DeckError) -> Self {
        Self {
            success: false,
            response: Value::String(err.to_string()),
        }
    }

    /// Response text of a failed envelope, if it is a string.
    pub fn message(&self) -> Option<&str> {
        self.response.as_str()
    }
}

impl From<Result<Value, DeckError>> for Envelope {
    fn from(result: Result<Value, DeckError>) -> Self {
        match result {
            Ok(value) => Envelope::ok(value),
            Err(err) => Envelope::failure(&err),
        }
    }
}

/// Error taxonomy shared by every crate.
///
/// The display string of each variant starts with its class tag so that a
/// failed [`Envelope`] can be classified by prefix.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DeckError {
    #[error("ConfigError: {0}")]
    Config(String),

    #[error("NotFound: subsystem '{0}' is not registered")]
    NotFound(String),

    #[error("Unsupported: operation '{0}' is not part of the command vocabulary")]
    UnknownOperation(String),

    #[error("Unsupported: subsystem '{subsystem}' does not implement {operation} ({capability})")]
    Unsupported {
        subsystem: String,
        operation: Operation,
        capability: Capability,
    },

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("HardwareIOError on {component}: {details}")]
    HardwareIo { component: String, details: String },

    #[error("ProcessError: {0}")]
    Process(String),

    #[error("PersistenceError: {0}")]
    Persistence(String),
}

impl DeckError {
    /// Shorthand for a [`DeckError::HardwareIo`].
    pub fn hardware(component: impl Into<String>, details: impl fmt::Display) -> Self {
        DeckError::HardwareIo {
            component: component.into(),
            details: details.to_string(),
        }
    }
}

// Operation is carried inside DeckError, which derives serde.
impl Serialize for Operation {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
