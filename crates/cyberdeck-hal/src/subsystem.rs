//! The [`Subsystem`] trait and one trait per [`Capability`].
//!
//! A subsystem declares a capability by returning `Some` from the matching
//! `as_*` accessor.  The dispatcher only ever reaches a driver through these
//! accessors, so an operation can never land on a method the subsystem did
//! not declare.

use async_trait::async_trait;
use cyberdeck_config::SubsystemConfig;
use cyberdeck_types::{Capability, DeckError, SubsystemKind};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

/// Exposes and edits the subsystem's typed settings.
pub trait Configurable: Send + Sync {
    /// Snapshot of the live configuration.
    fn config(&self) -> SubsystemConfig;

    /// Set `key` to `value`, parsed under the type declared by `key`'s tag.
    fn set_config(&self, key: &str, value: &Value) -> Result<Value, DeckError>;
}

/// Reports a JSON status snapshot.
pub trait StatusReporting: Send + Sync {
    fn status(&self) -> Value;
}

/// Switchable power rail.
pub trait PowerControllable: Send + Sync {
    /// Current power state.
    fn power(&self) -> bool;

    fn set_power(&self, on: bool) -> Result<Value, DeckError>;

    fn toggle_power(&self) -> Result<Value, DeckError> {
        self.set_power(!self.power())
    }
}

/// Owns an external process.
pub trait ProcessControllable: Send + Sync {
    fn is_running(&self) -> bool;

    fn start_process(&self) -> Result<Value, DeckError>;

    fn stop_process(&self) -> Result<Value, DeckError>;
}

/// Audio mixer.
pub trait VolumeControl: Send + Sync {
    fn set_volume(&self, volume: i64) -> Result<Value, DeckError>;
    fn increment_volume(&self) -> Result<Value, DeckError>;
    fn decrement_volume(&self) -> Result<Value, DeckError>;
    fn set_mute(&self, muted: bool) -> Result<Value, DeckError>;
    fn toggle_mute(&self) -> Result<Value, DeckError>;
    /// Start or stop the test tone.
    fn set_test(&self, on: bool) -> Result<Value, DeckError>;
}

/// Display backlight.
pub trait BrightnessControl: Send + Sync {
    fn set_brightness(&self, brightness: i64) -> Result<Value, DeckError>;
    fn increment_brightness(&self) -> Result<Value, DeckError>;
    fn decrement_brightness(&self) -> Result<Value, DeckError>;
    /// Capture the screen to a file; answers `{"path": …}`.
    fn screenshot(&self) -> Result<Value, DeckError>;
}

/// Radio transceiver tuning.
pub trait RadioTuning: Send + Sync {
    fn get_frequency(&self) -> Result<Value, DeckError>;
    fn set_frequency(&self, hz: f64) -> Result<Value, DeckError>;
    fn get_mode(&self) -> Result<Value, DeckError>;
}

/// Host power management.
pub trait HostControl: Send + Sync {
    fn reboot(&self) -> Result<Value, DeckError>;
    fn shutdown(&self) -> Result<Value, DeckError>;
}

/// A loop the lifecycle supervisor runs for the whole process lifetime.
///
/// Implementations must return promptly once `cancel` fires.  An `Err` means
/// the loop gave up; it should already have recorded the reason in the
/// subsystem's status.
#[async_trait]
pub trait BackgroundLoop: Send + Sync {
    async fn run(&self, cancel: CancellationToken) -> Result<(), DeckError>;
}

/// One managed device, process or application.
pub trait Subsystem: Send + Sync {
    /// Unique identifier (the `s_id` setting).
    fn id(&self) -> &str;

    fn kind(&self) -> SubsystemKind;

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        None
    }

    fn as_status(&self) -> Option<&dyn StatusReporting> {
        None
    }

    fn as_power(&self) -> Option<&dyn PowerControllable> {
        None
    }

    fn as_process(&self) -> Option<&dyn ProcessControllable> {
        None
    }

    fn as_volume(&self) -> Option<&dyn VolumeControl> {
        None
    }

    fn as_brightness(&self) -> Option<&dyn BrightnessControl> {
        None
    }

    fn as_radio(&self) -> Option<&dyn RadioTuning> {
        None
    }

    fn as_host(&self) -> Option<&dyn HostControl> {
        None
    }

    fn as_background(&self) -> Option<&dyn BackgroundLoop> {
        None
    }

    /// Whether the subsystem declares `cap`.
    fn supports(&self, cap: Capability) -> bool {
        match cap {
            Capability::Configurable => self.as_configurable().is_some(),
            Capability::StatusReporting => self.as_status().is_some(),
            Capability::PowerControllable => self.as_power().is_some(),
            Capability::ProcessControllable => self.as_process().is_some(),
            Capability::VolumeControl => self.as_volume().is_some(),
            Capability::BrightnessControl => self.as_brightness().is_some(),
            Capability::RadioTuning => self.as_radio().is_some(),
            Capability::HostControl => self.as_host().is_some(),
        }
    }

    /// Every declared capability.
    fn capabilities(&self) -> Vec<Capability> {
        [
            Capability::Configurable,
            Capability::StatusReporting,
            Capability::PowerControllable,
            Capability::ProcessControllable,
            Capability::VolumeControl,
            Capability::BrightnessControl,
            Capability::RadioTuning,
            Capability::HostControl,
        ]
        .into_iter()
        .filter(|cap| self.supports(*cap))
        .collect()
    }
}
