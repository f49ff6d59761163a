//! [`SubsystemRegistry`] – the ordered set of live subsystems.
//!
//! Built once at startup from the configuration document, in declaration
//! order.  Every aggregate view (`systems`, `status`, `config`,
//! `configstatus`) walks the subsystems in that same order, so ids are listed
//! identically across calls.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use cyberdeck_config::{ConfigDocument, SubsystemConfig, save};
use cyberdeck_hal::{HardwareContext, Subsystem};
use cyberdeck_types::DeckError;
use serde_json::{Value, json};
use tracing::info;

/// Ordered registry of every managed subsystem.
#[derive(Default, Clone)]
pub struct SubsystemRegistry {
    subsystems: Vec<Arc<dyn Subsystem>>,
}

impl SubsystemRegistry {
    /// Wrap already-built subsystems, keeping their order.
    ///
    /// # Errors
    ///
    /// [`DeckError::Config`] when two subsystems share an id.
    pub fn new(subsystems: Vec<Arc<dyn Subsystem>>) -> Result<Self, DeckError> {
        let mut seen = HashSet::new();
        if let Some(dup) = subsystems.iter().map(|s| s.id()).find(|id| !seen.insert(*id)) {
            return Err(DeckError::Config(format!("duplicate subsystem id '{dup}'")));
        }
        Ok(Self { subsystems })
    }

    /// Build one driver per section of `doc`.
    ///
    /// # Errors
    ///
    /// The first section that fails validation or construction aborts the
    /// whole build.
    pub fn from_document(doc: &ConfigDocument, ctx: &HardwareContext) -> Result<Self, DeckError> {
        let subsystems = doc
            .sections()
            .iter()
            .map(|section| cyberdeck_hal::build(section, ctx))
            .collect::<Result<Vec<_>, _>>()?;
        info!(count = subsystems.len(), "subsystems registered");
        Self::new(subsystems)
    }

    /// First subsystem whose id is `id`.
    pub fn get(&self, id: &str) -> Option<&Arc<dyn Subsystem>> {
        self.subsystems.iter().find(|s| s.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Subsystem>> {
        self.subsystems.iter()
    }

    pub fn len(&self) -> usize {
        self.subsystems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subsystems.is_empty()
    }

    /// Ids in declaration order.
    pub fn ids(&self) -> Vec<String> {
        self.subsystems.iter().map(|s| s.id().to_string()).collect()
    }

    /// `[{id, status}]`; `status` is `null` for subsystems that do not report.
    pub fn status(&self) -> Value {
        self.subsystems
            .iter()
            .map(|s| json!({ "id": s.id(), "status": status_of(s.as_ref()) }))
            .collect()
    }

    /// `[{id, config}]`.
    pub fn config(&self) -> Value {
        self.subsystems
            .iter()
            .map(|s| json!({ "id": s.id(), "config": config_of(s.as_ref()) }))
            .collect()
    }

    /// `[{id, config, status}]`, exactly one entry per subsystem.
    pub fn configstatus(&self) -> Value {
        self.subsystems
            .iter()
            .map(|s| {
                json!({
                    "id": s.id(),
                    "config": config_of(s.as_ref()),
                    "status": status_of(s.as_ref()),
                })
            })
            .collect()
    }

    /// Snapshot every live configuration as a document.
    pub fn snapshot(&self) -> Result<ConfigDocument, DeckError> {
        let configs: Vec<SubsystemConfig> = self
            .subsystems
            .iter()
            .filter_map(|s| s.as_configurable().map(|c| c.config()))
            .collect();
        ConfigDocument::from_configs(&configs).map_err(|e| DeckError::Persistence(e.to_string()))
    }

    /// Write every live configuration to `path`.
    ///
    /// # Errors
    ///
    /// [`DeckError::Persistence`] when the snapshot cannot be rendered or the
    /// file cannot be written.
    pub fn persist(&self, path: &Path) -> Result<(), DeckError> {
        let doc = self.snapshot()?;
        save(&doc, path).map_err(|e| DeckError::Persistence(e.to_string()))?;
        info!(path = %path.display(), sections = doc.len(), "configuration saved");
        Ok(())
    }
}

fn status_of(subsystem: &dyn Subsystem) -> Value {
    subsystem.as_status().map_or(Value::Null, |s| s.status())
}

fn config_of(subsystem: &dyn Subsystem) -> Value {
    subsystem.as_configurable().map_or(Value::Null, |c| c.config().to_json())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyberdeck_config::load;
    use cyberdeck_hal::{SimBus, SimPins};

    const DECK: &str = "\
[usb]
s_id = usb
i_power_pin = 4
b_power = false

[audio]
s_id = audio
s_type = audio
i_volume = 30
f_gain = 1.25
l_outputs = [\"hdmi\",\"jack\"]

[gps]
s_id = gps
";

    fn registry() -> SubsystemRegistry {
        let ctx = HardwareContext::simulated(SimBus::new(), SimPins::new());
        SubsystemRegistry::from_document(&ConfigDocument::parse(DECK).unwrap(), &ctx).unwrap()
    }

    #[test]
    fn ids_follow_declaration_order() {
        let reg = registry();
        assert_eq!(reg.ids(), vec!["usb", "audio", "gps"]);
        assert_eq!(reg.ids(), reg.ids());
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn configstatus_pairs_by_id() {
        let reg = registry();
        let entries = reg.configstatus();
        let entries = entries.as_array().unwrap();
        assert_eq!(entries.len(), reg.len());
        for (entry, id) in entries.iter().zip(reg.ids()) {
            assert_eq!(entry["id"], json!(id));
            assert_eq!(entry["config"]["s_id"], json!(id));
            assert!(entry["status"].is_object());
        }
    }

    #[test]
    fn persist_round_trips_live_state() {
        let reg = registry();
        reg.get("usb").unwrap().as_power().unwrap().toggle_power().unwrap();
        reg.get("audio").unwrap().as_volume().unwrap().set_volume(75).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subsystems.ini");
        reg.persist(&path).unwrap();

        let reloaded = load(&path).unwrap();
        assert_eq!(reloaded.section("usb").unwrap().get_bool("b_power"), Some(true));
        let audio = reloaded.section("audio").unwrap();
        assert_eq!(audio.get_int("i_volume"), Some(75));
        assert_eq!(audio.get_float("f_gain"), Some(1.25));
        assert_eq!(audio.get_list("l_outputs").unwrap(), &[json!("hdmi"), json!("jack")]);
    }

    #[test]
    fn persist_to_unwritable_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "x").unwrap();
        let err = registry().persist(&blocker.join("sub").join("x.ini")).unwrap_err();
        assert!(matches!(err, DeckError::Persistence(_)));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let usb = Arc::clone(registry().get("usb").unwrap());
        let err = SubsystemRegistry::new(vec![Arc::clone(&usb), usb]).err().unwrap();
        assert!(err.to_string().contains("duplicate subsystem id 'usb'"));
    }

    #[test]
    fn bad_section_aborts_build() {
        let ctx = HardwareContext::simulated(SimBus::new(), SimPins::new());
        let doc = ConfigDocument::parse("[a]\ns_id = a\n\n[b]\ns_id = b\ns_type = warp\n").unwrap();
        assert!(matches!(
            SubsystemRegistry::from_document(&doc, &ctx),
            Err(DeckError::Config(_))
        ));
    }
}
