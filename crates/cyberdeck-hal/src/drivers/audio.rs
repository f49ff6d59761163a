//! Audio output: mixer volume, mute and a test tone.
//!
//! Volume lives in `i_volume` (0–100) and mute in `b_muted`, so a saved
//! configuration restores both.  When `s_mixer_cmd` / `s_mute_cmd` are set,
//! every change is pushed to the mixer through them:
//!
//! ```ini
//! [audio]
//! s_id = audio
//! s_type = audio
//! i_volume = 60
//! s_mixer_cmd = amixer -q sset Master {volume}%
//! s_mute_cmd = amixer -q sset Master {state}
//! s_test_cmd = speaker-test -t sine -f 440
//! ```

use std::sync::Arc;

use cyberdeck_config::{ConfigValue, FieldSpec, SubsystemConfig, ValueType};
use cyberdeck_types::{DeckError, SubsystemKind};
use serde_json::{Value, json};
use tracing::info;

use crate::context::HardwareContext;
use crate::drivers::common::{ChildProcess, CommandLine, ConfigStore, PowerSwitch, run_template};
use crate::subsystem::{Configurable, PowerControllable, StatusReporting, Subsystem, VolumeControl};

pub const SCHEMA: &[FieldSpec] = &[
    FieldSpec::optional("i_volume", ValueType::Int),
    FieldSpec::optional("i_volume_step", ValueType::Int),
    FieldSpec::optional("b_muted", ValueType::Bool),
    FieldSpec::optional("s_mixer_cmd", ValueType::Str),
    FieldSpec::optional("s_mute_cmd", ValueType::Str),
    FieldSpec::optional("s_test_cmd", ValueType::Str),
    FieldSpec::optional("i_power_pin", ValueType::Int),
    FieldSpec::optional("b_active_low", ValueType::Bool),
    FieldSpec::optional("b_power", ValueType::Bool),
];

pub const MAX_VOLUME: i64 = 100;
const DEFAULT_VOLUME: i64 = 50;
const DEFAULT_STEP: i64 = 5;

pub struct Audio {
    id: String,
    store: Arc<ConfigStore>,
    power: Option<PowerSwitch>,
    tone: ChildProcess,
}

impl Audio {
    pub fn new(id: &str, config: SubsystemConfig, ctx: &HardwareContext) -> Result<Self, DeckError> {
        let store = Arc::new(ConfigStore::new(config));
        let power = PowerSwitch::from_store(id, &store, ctx)?;
        Ok(Self {
            id: id.to_string(),
            tone: ChildProcess::new(id),
            store,
            power,
        })
    }

    fn volume(&self) -> i64 {
        self.store.get_int("i_volume").unwrap_or(DEFAULT_VOLUME)
    }

    fn muted(&self) -> bool {
        self.store.get_bool("b_muted").unwrap_or(false)
    }

    fn step(&self) -> i64 {
        self.store.get_int("i_volume_step").unwrap_or(DEFAULT_STEP)
    }

    fn apply_volume(&self, volume: i64) -> Result<Value, DeckError> {
        let volume = volume.clamp(0, MAX_VOLUME);
        if let Some(template) = self.store.get_str("s_mixer_cmd") {
            run_template(&self.id, &template, &[("volume", volume.to_string())])?;
        }
        self.store.set("i_volume", ConfigValue::Int(volume));
        info!(subsystem = %self.id, volume, "volume set");
        Ok(json!({ "volume": volume }))
    }

    fn apply_mute(&self, muted: bool) -> Result<Value, DeckError> {
        if let Some(template) = self.store.get_str("s_mute_cmd") {
            let state = if muted { "mute" } else { "unmute" };
            run_template(&self.id, &template, &[("state", state.to_string())])?;
        }
        self.store.set("b_muted", ConfigValue::Bool(muted));
        info!(subsystem = %self.id, muted, "mute set");
        Ok(json!({ "muted": muted }))
    }

    fn test_command(&self) -> Result<CommandLine, DeckError> {
        let template = self
            .store
            .get_str("s_test_cmd")
            .ok_or_else(|| DeckError::Config(format!("[{}] s_test_cmd is not set", self.id)))?;
        let mut words = template.split_whitespace().map(str::to_string);
        let program = words
            .next()
            .ok_or_else(|| DeckError::Config(format!("[{}] s_test_cmd is empty", self.id)))?;
        Ok(CommandLine {
            program,
            args: words.collect(),
        })
    }
}

impl VolumeControl for Audio {
    fn set_volume(&self, volume: i64) -> Result<Value, DeckError> {
        self.apply_volume(volume)
    }

    fn increment_volume(&self) -> Result<Value, DeckError> {
        self.apply_volume(self.volume().saturating_add(self.step()))
    }

    fn decrement_volume(&self) -> Result<Value, DeckError> {
        self.apply_volume(self.volume().saturating_sub(self.step()))
    }

    fn set_mute(&self, muted: bool) -> Result<Value, DeckError> {
        self.apply_mute(muted)
    }

    fn toggle_mute(&self) -> Result<Value, DeckError> {
        self.apply_mute(!self.muted())
    }

    fn set_test(&self, on: bool) -> Result<Value, DeckError> {
        if on {
            let pid = self.tone.spawn(&self.test_command()?, &[])?;
            Ok(json!({ "test": true, "pid": pid }))
        } else {
            self.tone.stop()?;
            Ok(json!({ "test": false }))
        }
    }
}

impl StatusReporting for Audio {
    fn status(&self) -> Value {
        json!({
            "volume": self.volume(),
            "muted": self.muted(),
            "test": self.tone.is_running(),
            "power": self.power.as_ref().map(|p| p.power()),
        })
    }
}

impl Subsystem for Audio {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SubsystemKind {
        SubsystemKind::Device
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        Some(self.store.as_ref())
    }

    fn as_status(&self) -> Option<&dyn StatusReporting> {
        Some(self)
    }

    fn as_power(&self) -> Option<&dyn PowerControllable> {
        self.power.as_ref().map(|p| p as &dyn PowerControllable)
    }

    fn as_volume(&self) -> Option<&dyn VolumeControl> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimPins};
    use cyberdeck_config::ConfigDocument;

    fn audio(text: &str) -> Audio {
        let ctx = HardwareContext::simulated(SimBus::new(), SimPins::new());
        let config = ConfigDocument::parse(text).unwrap().sections()[0].config.clone();
        Audio::new("audio", config, &ctx).unwrap()
    }

    #[test]
    fn volume_steps_and_clamps() {
        let a = audio("[audio]\ns_id = audio\ni_volume = 97\n");
        assert_eq!(a.increment_volume().unwrap(), json!({"volume": 100}));
        assert_eq!(a.increment_volume().unwrap(), json!({"volume": 100}));
        a.set_volume(3).unwrap();
        assert_eq!(a.decrement_volume().unwrap(), json!({"volume": 0}));
        assert_eq!(a.set_volume(250).unwrap(), json!({"volume": 100}));
        assert_eq!(a.store.get_int("i_volume"), Some(100));
    }

    #[test]
    fn default_volume_and_custom_step() {
        let a = audio("[audio]\ns_id = audio\ni_volume_step = 10\n");
        assert_eq!(a.increment_volume().unwrap(), json!({"volume": 60}));
    }

    #[test]
    fn toggle_mute_flips_state() {
        let a = audio("[audio]\ns_id = audio\n");
        assert_eq!(a.toggle_mute().unwrap(), json!({"muted": true}));
        assert_eq!(a.toggle_mute().unwrap(), json!({"muted": false}));
        assert_eq!(a.store.get_bool("b_muted"), Some(false));
    }

    #[cfg(unix)]
    #[test]
    fn failing_mixer_leaves_volume_unchanged() {
        let a = audio("[audio]\ns_id = audio\ni_volume = 40\ns_mixer_cmd = false {volume}\n");
        assert!(matches!(a.set_volume(80), Err(DeckError::HardwareIo { .. })));
        assert_eq!(a.status()["volume"], json!(40));
    }

    #[cfg(unix)]
    #[test]
    fn test_tone_runs_until_stopped() {
        let a = audio("[audio]\ns_id = audio\ns_test_cmd = sleep 30\n");
        a.set_test(true).unwrap();
        assert_eq!(a.status()["test"], json!(true));
        a.set_test(false).unwrap();
        assert_eq!(a.status()["test"], json!(false));
    }

    #[test]
    fn test_tone_without_command_is_config_error() {
        let a = audio("[audio]\ns_id = audio\n");
        assert!(matches!(a.set_test(true), Err(DeckError::Config(_))));
    }
}
