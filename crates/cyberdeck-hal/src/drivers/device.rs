//! Generic peripheral whose only control is an optional power rail
//! (USB hub, LAN/WLAN adapters, GPS receiver, …).

use std::sync::Arc;

use cyberdeck_config::{FieldSpec, SubsystemConfig, ValueType};
use cyberdeck_types::{DeckError, SubsystemKind};
use serde_json::{Value, json};

use crate::context::HardwareContext;
use crate::drivers::common::{ConfigStore, PowerSwitch};
use crate::subsystem::{Configurable, PowerControllable, StatusReporting, Subsystem};

pub const SCHEMA: &[FieldSpec] = &[
    FieldSpec::optional("i_power_pin", ValueType::Int),
    FieldSpec::optional("b_active_low", ValueType::Bool),
    FieldSpec::optional("b_power", ValueType::Bool),
];

pub struct Device {
    id: String,
    store: Arc<ConfigStore>,
    power: Option<PowerSwitch>,
}

impl Device {
    pub fn new(id: &str, config: SubsystemConfig, ctx: &HardwareContext) -> Result<Self, DeckError> {
        let store = Arc::new(ConfigStore::new(config));
        let power = PowerSwitch::from_store(id, &store, ctx)?;
        Ok(Self {
            id: id.to_string(),
            store,
            power,
        })
    }
}

impl StatusReporting for Device {
    fn status(&self) -> Value {
        json!({ "power": self.power.as_ref().map(|p| p.power()) })
    }
}

impl Subsystem for Device {
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
}
