//! On-board computer: host reboot / shutdown plus basic health readings.

use std::fs;
use std::sync::Arc;

use cyberdeck_config::{FieldSpec, SubsystemConfig, ValueType};
use cyberdeck_types::{DeckError, SubsystemKind};
use serde_json::{Value, json};
use tracing::warn;

use crate::drivers::common::{ConfigStore, run_template};
use crate::subsystem::{Configurable, HostControl, StatusReporting, Subsystem};

pub const SCHEMA: &[FieldSpec] = &[
    FieldSpec::optional("s_reboot_cmd", ValueType::Str),
    FieldSpec::optional("s_shutdown_cmd", ValueType::Str),
    FieldSpec::optional("s_uptime_path", ValueType::Str),
    FieldSpec::optional("s_loadavg_path", ValueType::Str),
    FieldSpec::optional("s_thermal_path", ValueType::Str),
];

const DEFAULT_REBOOT: &str = "systemctl reboot";
const DEFAULT_SHUTDOWN: &str = "systemctl poweroff";

pub struct Obc {
    id: String,
    store: Arc<ConfigStore>,
}

impl Obc {
    pub fn new(id: &str, config: SubsystemConfig) -> Self {
        Self {
            id: id.to_string(),
            store: Arc::new(ConfigStore::new(config)),
        }
    }

    fn run(&self, key: &str, default: &str, action: &str) -> Result<Value, DeckError> {
        let template = self.store.get_str(key).unwrap_or_else(|| default.to_string());
        warn!(subsystem = %self.id, %action, "host {action} requested");
        run_template(&self.id, &template, &[])?;
        Ok(json!({ "action": action }))
    }

    fn read(&self, key: &str, default: &str) -> Option<String> {
        let path = self.store.get_str(key).unwrap_or_else(|| default.to_string());
        fs::read_to_string(path).ok()
    }

    fn uptime(&self) -> Option<f64> {
        self.read("s_uptime_path", "/proc/uptime")?
            .split_whitespace()
            .next()?
            .parse()
            .ok()
    }

    fn load(&self) -> Option<Vec<f64>> {
        let text = self.read("s_loadavg_path", "/proc/loadavg")?;
        text.split_whitespace().take(3).map(|v| v.parse().ok()).collect()
    }

    /// CPU temperature in °C (sysfs reports millidegrees).
    fn temperature(&self) -> Option<f64> {
        let raw: f64 = self
            .read("s_thermal_path", "/sys/class/thermal/thermal_zone0/temp")?
            .trim()
            .parse()
            .ok()?;
        Some(raw / 1000.0)
    }
}

impl HostControl for Obc {
    fn reboot(&self) -> Result<Value, DeckError> {
        self.run("s_reboot_cmd", DEFAULT_REBOOT, "reboot")
    }

    fn shutdown(&self) -> Result<Value, DeckError> {
        self.run("s_shutdown_cmd", DEFAULT_SHUTDOWN, "shutdown")
    }
}

impl StatusReporting for Obc {
    fn status(&self) -> Value {
        json!({
            "uptime_secs": self.uptime(),
            "load": self.load(),
            "temperature_c": self.temperature(),
        })
    }
}

impl Subsystem for Obc {
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

    fn as_host(&self) -> Option<&dyn HostControl> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cyberdeck_config::ConfigDocument;
    use std::path::Path;

    fn obc(text: &str) -> Obc {
        let config = ConfigDocument::parse(text).unwrap().sections()[0].config.clone();
        Obc::new("obc", config)
    }

    fn write(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path.display().to_string()
    }

    #[test]
    fn status_reads_health_files() {
        let dir = tempfile::tempdir().unwrap();
        let text = format!(
            "[obc]\ns_id = obc\ns_uptime_path = {}\ns_loadavg_path = {}\ns_thermal_path = {}\n",
            write(dir.path(), "uptime", "1234.50 4000.00\n"),
            write(dir.path(), "loadavg", "0.50 0.25 0.10 1/123 456\n"),
            write(dir.path(), "temp", "48500\n"),
        );
        let status = obc(&text).status();
        assert_eq!(status["uptime_secs"], json!(1234.5));
        assert_eq!(status["load"], json!([0.5, 0.25, 0.1]));
        assert_eq!(status["temperature_c"], json!(48.5));
    }

    #[test]
    fn missing_health_files_report_null() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope").display().to_string();
        let text = format!(
            "[obc]\ns_id = obc\ns_uptime_path = {missing}\ns_loadavg_path = {missing}\ns_thermal_path = {missing}\n"
        );
        assert_eq!(
            obc(&text).status(),
            json!({"uptime_secs": null, "load": null, "temperature_c": null})
        );
    }

    #[cfg(unix)]
    #[test]
    fn host_commands_run_configured_programs() {
        let o = obc("[obc]\ns_id = obc\ns_reboot_cmd = true\ns_shutdown_cmd = false\n");
        assert_eq!(o.reboot().unwrap(), json!({"action": "reboot"}));
        assert!(matches!(o.shutdown(), Err(DeckError::HardwareIo { .. })));
    }
}
