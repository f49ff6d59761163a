//! Daemon settings – reads/writes `~/.cyberdeck/config.toml`.
//!
//! These are the process-level knobs (where the subsystem file lives, which
//! bus to open, heartbeat timing).  Per-subsystem state lives in the INI file
//! named by `subsystems_path`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use cyberdeck_config::str_to_bool;
use cyberdeck_kernel::{HeartbeatConfig, SupervisorConfig};
use cyberdeck_runtime::{DaemonConfig, HeartbeatSetup};
use serde::{Deserialize, Serialize};

/// Environment variable naming an explicit settings file.
pub const CONFIG_ENV: &str = "CYBERDECK_CONFIG";

/// Heartbeat section of the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartbeatSettings {
    pub enabled: bool,
    /// 7-bit I²C address of the power-management microcontroller.
    pub address: u16,
    /// `0x53` position report or `0x54` time sync.
    pub param_id: u8,
    pub interval_ms: u64,
    pub probe_timeout_ms: u64,
    pub latitude: f64,
    pub longitude: f64,
    /// Send packets from boot; otherwise wait for `/heartbeat on`.
    pub start_enabled: bool,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            address: 0x08,
            param_id: 0x54,
            interval_ms: 5_000,
            probe_timeout_ms: 500,
            latitude: 0.0,
            longitude: 0.0,
            start_enabled: false,
        }
    }
}

/// Persisted daemon settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// INI file holding every subsystem's configuration.
    #[serde(default = "default_subsystems_path")]
    pub subsystems_path: PathBuf,

    /// I²C character device.
    #[serde(default = "default_i2c_bus")]
    pub i2c_bus: PathBuf,

    /// sysfs GPIO root.
    #[serde(default = "default_gpio_root")]
    pub gpio_root: PathBuf,

    /// Run against simulated bus and pins instead of real hardware.
    #[serde(default)]
    pub simulate_hardware: bool,

    /// Pause between background loop starts.
    #[serde(default = "default_stagger_ms")]
    pub stagger_ms: u64,

    /// Longest wait for a background loop to stop at shutdown.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,

    #[serde(default)]
    pub heartbeat: HeartbeatSettings,
}

fn home_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."))
}

fn default_subsystems_path() -> PathBuf {
    home_dir().join(".cyberdeck").join("subsystems.ini")
}
fn default_i2c_bus() -> PathBuf {
    PathBuf::from("/dev/i2c-1")
}
fn default_gpio_root() -> PathBuf {
    PathBuf::from("/sys/class/gpio")
}
fn default_stagger_ms() -> u64 {
    100
}
fn default_stop_timeout_ms() -> u64 {
    5_000
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            subsystems_path: default_subsystems_path(),
            i2c_bus: default_i2c_bus(),
            gpio_root: default_gpio_root(),
            simulate_hardware: false,
            stagger_ms: default_stagger_ms(),
            stop_timeout_ms: default_stop_timeout_ms(),
            heartbeat: HeartbeatSettings::default(),
        }
    }
}

impl Settings {
    /// What [`Daemon::boot`][cyberdeck_runtime::Daemon::boot] consumes.
    pub fn daemon_config(&self) -> DaemonConfig {
        let hb = &self.heartbeat;
        DaemonConfig {
            subsystems_path: self.subsystems_path.clone(),
            i2c_bus: self.i2c_bus.clone(),
            gpio_root: self.gpio_root.clone(),
            simulate_hardware: self.simulate_hardware,
            supervisor: SupervisorConfig {
                stagger: Duration::from_millis(self.stagger_ms),
                stop_timeout: Duration::from_millis(self.stop_timeout_ms),
            },
            heartbeat: hb.enabled.then(|| HeartbeatSetup {
                address: hb.address,
                config: HeartbeatConfig {
                    param_id: hb.param_id,
                    interval: Duration::from_millis(hb.interval_ms.max(1)),
                    probe_timeout: Duration::from_millis(hb.probe_timeout_ms),
                    latitude: hb.latitude,
                    longitude: hb.longitude,
                    start_enabled: hb.start_enabled,
                },
            }),
        }
    }
}

/// `$CYBERDECK_CONFIG`, or `~/.cyberdeck/config.toml`.
pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| config_path_for_home(&home_dir()))
}

pub(crate) fn config_path_for_home(home: &Path) -> PathBuf {
    home.join(".cyberdeck").join("config.toml")
}

/// Settings from [`config_path`], or defaults when the file is absent.
/// Environment overrides are applied either way.
pub fn load() -> Result<Settings, String> {
    let mut settings = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// `None` when `path` does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<Settings>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path).map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("invalid settings in {}: {e}", path.display()))
}

/// Apply `CYBERDECK_*` environment overrides.
///
/// | Variable | Field |
/// |---|---|
/// | `CYBERDECK_SUBSYSTEMS` | `subsystems_path` |
/// | `CYBERDECK_I2C_BUS` | `i2c_bus` |
/// | `CYBERDECK_SIMULATE` | `simulate_hardware` (`yes/true/t/1`) |
pub fn apply_env_overrides(settings: &mut Settings) {
    if let Some(v) = std::env::var_os("CYBERDECK_SUBSYSTEMS") {
        settings.subsystems_path = PathBuf::from(v);
    }
    if let Some(v) = std::env::var_os("CYBERDECK_I2C_BUS") {
        settings.i2c_bus = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("CYBERDECK_SIMULATE") {
        settings.simulate_hardware = str_to_bool(&v);
    }
}

/// Write `settings` to `path`, owner-readable only.
pub fn save_to(settings: &Settings, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| format!("failed to create {}: {e}", parent.display()))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("failed to restrict {}: {e}", parent.display()))?;
        }
    }
    let raw = toml::to_string_pretty(settings).map_err(|e| format!("failed to serialise settings: {e}"))?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    options
        .open(path)
        .and_then(|mut f| {
            use std::io::Write;
            f.write_all(raw.as_bytes())
        })
        .map_err(|e| format!("failed to write {}: {e}", path.display()))
}
