//! GUI application launched on demand on the deck's X display.

use std::sync::Arc;

use cyberdeck_config::{FieldSpec, SubsystemConfig, ValueType};
use cyberdeck_types::{DeckError, SubsystemKind};
use serde_json::{Value, json};

use crate::drivers::common::{ChildProcess, CommandLine, ConfigStore};
use crate::subsystem::{Configurable, ProcessControllable, StatusReporting, Subsystem};

pub const SCHEMA: &[FieldSpec] = &[
    FieldSpec::required("s_command", ValueType::Str),
    FieldSpec::optional("l_args", ValueType::List),
    FieldSpec::optional("s_display", ValueType::Str),
];

const DEFAULT_DISPLAY: &str = ":0";

pub struct Application {
    id: String,
    store: Arc<ConfigStore>,
    child: ChildProcess,
}

impl Application {
    pub fn new(id: &str, config: SubsystemConfig) -> Result<Self, DeckError> {
        let store = Arc::new(ConfigStore::new(config));
        CommandLine::from_store(id, &store)?;
        Ok(Self {
            id: id.to_string(),
            child: ChildProcess::new(id),
            store,
        })
    }

    fn display(&self) -> String {
        self.store.get_str("s_display").unwrap_or_else(|| DEFAULT_DISPLAY.to_string())
    }
}

impl ProcessControllable for Application {
    fn is_running(&self) -> bool {
        self.child.is_running()
    }

    fn start_process(&self) -> Result<Value, DeckError> {
        let cmd = CommandLine::from_store(&self.id, &self.store)?;
        let pid = self.child.spawn(&cmd, &[("DISPLAY".to_string(), self.display())])?;
        Ok(json!({ "running": true, "pid": pid }))
    }

    fn stop_process(&self) -> Result<Value, DeckError> {
        self.child.stop()?;
        Ok(json!({ "running": false }))
    }
}

impl StatusReporting for Application {
    fn status(&self) -> Value {
        let mut status = self.child.status();
        status["display"] = json!(self.display());
        status
    }
}

impl Subsystem for Application {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SubsystemKind {
        SubsystemKind::Application
    }

    fn as_configurable(&self) -> Option<&dyn Configurable> {
        Some(self.store.as_ref())
    }

    fn as_status(&self) -> Option<&dyn StatusReporting> {
        Some(self)
    }

    fn as_process(&self) -> Option<&dyn ProcessControllable> {
        Some(self)
    }
}
