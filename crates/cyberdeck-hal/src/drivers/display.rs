//! Display backlight driven through a sysfs brightness file
//! (`/sys/class/backlight/<name>/brightness`), plus screen capture through
//! a configured command (`s_screenshot_cmd`, `{path}` is substituted).

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use cyberdeck_config::{ConfigValue, FieldSpec, SubsystemConfig, ValueType};
use cyberdeck_types::{DeckError, SubsystemKind};
use serde_json::{Value, json};
use tracing::info;

use crate::context::HardwareContext;
use crate::drivers::common::{ConfigStore, PowerSwitch, run_template};
use crate::subsystem::{BrightnessControl, Configurable, PowerControllable, StatusReporting, Subsystem};

pub const SCHEMA: &[FieldSpec] = &[
    FieldSpec::required("s_backlight_path", ValueType::Str),
    FieldSpec::optional("i_brightness", ValueType::Int),
    FieldSpec::optional("i_max_brightness", ValueType::Int),
    FieldSpec::optional("i_brightness_step", ValueType::Int),
    FieldSpec::optional("s_screenshot_cmd", ValueType::Str),
    FieldSpec::optional("s_screenshot_dir", ValueType::Str),
    FieldSpec::optional("i_power_pin", ValueType::Int),
    FieldSpec::optional("b_active_low", ValueType::Bool),
    FieldSpec::optional("b_power", ValueType::Bool),
];

const DEFAULT_BRIGHTNESS: i64 = 128;
const DEFAULT_MAX: i64 = 255;
const DEFAULT_STEP: i64 = 16;
const DEFAULT_SCREENSHOT_CMD: &str = "scrot --overwrite {path}";
const DEFAULT_SCREENSHOT_DIR: &str = "/tmp";

pub struct Display {
    id: String,
    store: Arc<ConfigStore>,
    power: Option<PowerSwitch>,
}

impl Display {
    pub fn new(id: &str, config: SubsystemConfig, ctx: &HardwareContext) -> Result<Self, DeckError> {
        let store = Arc::new(ConfigStore::new(config));
        let power = PowerSwitch::from_store(id, &store, ctx)?;
        Ok(Self {
            id: id.to_string(),
            store,
            power,
        })
    }

    fn brightness(&self) -> i64 {
        self.store.get_int("i_brightness").unwrap_or(DEFAULT_BRIGHTNESS)
    }

    fn max(&self) -> i64 {
        self.store.get_int("i_max_brightness").unwrap_or(DEFAULT_MAX).clamp(0, DEFAULT_MAX)
    }

    fn step(&self) -> i64 {
        self.store.get_int("i_brightness_step").unwrap_or(DEFAULT_STEP)
    }

    fn write(&self, level: i64) -> Result<Value, DeckError> {
        let level = level.clamp(0, self.max());
        let path = self
            .store
            .get_str("s_backlight_path")
            .ok_or_else(|| DeckError::Config(format!("[{}] s_backlight_path is not set", self.id)))?;
        fs::write(&path, level.to_string()).map_err(|e| DeckError::hardware(&path, e))?;
        self.store.set("i_brightness", ConfigValue::Int(level));
        info!(subsystem = %self.id, brightness = level, "brightness set");
        Ok(json!({ "brightness": level }))
    }

    /// Value the kernel currently reports, if the file is readable.
    fn hardware_level(&self) -> Option<i64> {
        let path = self.store.get_str("s_backlight_path")?;
        fs::read_to_string(path).ok()?.trim().parse().ok()
    }
}

impl BrightnessControl for Display {
    fn set_brightness(&self, brightness: i64) -> Result<Value, DeckError> {
        self.write(brightness)
    }

    fn increment_brightness(&self) -> Result<Value, DeckError> {
        self.write(self.brightness().saturating_add(self.step()))
    }

    fn decrement_brightness(&self) -> Result<Value, DeckError> {
        self.write(self.brightness().saturating_sub(self.step()))
    }

    fn screenshot(&self) -> Result<Value, DeckError> {
        let dir = self
            .store
            .get_str("s_screenshot_dir")
            .unwrap_or_else(|| DEFAULT_SCREENSHOT_DIR.to_string());
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();
        let path = PathBuf::from(dir).join(format!("{}-{stamp}.png", self.id));
        let path = path.display().to_string();

        let template = self
            .store
            .get_str("s_screenshot_cmd")
            .unwrap_or_else(|| DEFAULT_SCREENSHOT_CMD.to_string());
        run_template(&self.id, &template, &[("path", path.clone())])?;
        info!(subsystem = %self.id, %path, "screenshot taken");
        Ok(json!({ "path": path }))
    }
}

impl StatusReporting for Display {
    fn status(&self) -> Value {
        json!({
            "brightness": self.brightness(),
            "max_brightness": self.max(),
            "hardware_brightness": self.hardware_level(),
            "power": self.power.as_ref().map(|p| p.power()),
        })
    }
}

impl Subsystem for Display {
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

    fn as_brightness(&self) -> Option<&dyn BrightnessControl> {
        Some(self)
    }
}
