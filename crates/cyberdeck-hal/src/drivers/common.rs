//! Building blocks shared by the concrete drivers: the live settings store,
//! the GPIO power switch, child-process bookkeeping and command templates.

use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cyberdeck_config::{ConfigValue, ID_KEY, SubsystemConfig, ValueType, check_storable};
use cyberdeck_types::DeckError;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::context::HardwareContext;
use crate::gpio::PinDriver;
use crate::subsystem::{Configurable, PowerControllable};

pub(crate) fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ─────────────────────────────────────────────────────────────────────────────
// ConfigStore
// ─────────────────────────────────────────────────────────────────────────────

/// Keys mirrored from live driver state, with the operation that owns each.
/// `set_config` refuses them so config and hardware cannot disagree.
pub const MANAGED_KEYS: &[(&str, &str)] = &[
    ("b_power", "set_power"),
    ("i_volume", "set_volume"),
    ("b_muted", "set_mute"),
    ("i_brightness", "set_brightness"),
    ("f_frequency", "set_frequency"),
];

/// The live, mutable settings of one subsystem.
pub struct ConfigStore {
    inner: Mutex<SubsystemConfig>,
}

impl ConfigStore {
    pub fn new(config: SubsystemConfig) -> Self {
        Self {
            inner: Mutex::new(config),
        }
    }

    pub fn snapshot(&self) -> SubsystemConfig {
        lock(&self.inner).clone()
    }

    pub fn get_str(&self, key: &str) -> Option<String> {
        lock(&self.inner).get_str(key).map(str::to_string)
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        lock(&self.inner).get_int(key)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        lock(&self.inner).get_float(key)
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        lock(&self.inner).get_bool(key)
    }

    pub fn set(&self, key: &str, value: ConfigValue) {
        lock(&self.inner).set(key, value);
    }

    /// `set_config` semantics: parse `value` under `key`'s tag and store it.
    ///
    /// # Errors
    ///
    /// [`DeckError::InvalidArgument`] for the id key, a key owned by a
    /// dedicated operation (see [`MANAGED_KEYS`]), an unknown tag, a value
    /// that does not parse as the declared type, or a pair the persisted
    /// format cannot hold.
    pub fn apply(&self, key: &str, value: &Value) -> Result<Value, DeckError> {
        if key == ID_KEY {
            return Err(DeckError::InvalidArgument(format!("'{ID_KEY}' cannot be changed at runtime")));
        }
        if let Some((_, operation)) = MANAGED_KEYS.iter().find(|(k, _)| *k == key) {
            return Err(DeckError::InvalidArgument(format!("'{key}' is managed by {operation}")));
        }
        let ty = ValueType::from_key(key).map_err(|e| DeckError::InvalidArgument(e.to_string()))?;
        let parsed =
            ConfigValue::from_json(ty, key, value).map_err(|e| DeckError::InvalidArgument(e.to_string()))?;
        check_storable(key, &parsed).map_err(|e| DeckError::InvalidArgument(e.to_string()))?;
        let mut reported = serde_json::Map::new();
        reported.insert(key.to_string(), parsed.to_json());
        self.set(key, parsed);
        Ok(Value::Object(reported))
    }
}

impl Configurable for ConfigStore {
    fn config(&self) -> SubsystemConfig {
        self.snapshot()
    }

    fn set_config(&self, key: &str, value: &Value) -> Result<Value, DeckError> {
        self.apply(key, value)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// PowerSwitch
// ─────────────────────────────────────────────────────────────────────────────

/// A GPIO-driven power rail.  Mirrors its state into `b_power` so a saved
/// configuration restores it on the next boot.
pub struct PowerSwitch {
    component: String,
    pin: u32,
    active_low: bool,
    pins: Arc<dyn PinDriver>,
    store: Arc<ConfigStore>,
    on: AtomicBool,
}

impl PowerSwitch {
    /// Build the switch described by `i_power_pin` / `b_active_low` /
    /// `b_power`, or `None` when the subsystem has no power pin.
    ///
    /// The pin is claimed and driven to the configured initial state here, so
    /// an unavailable pin fails subsystem construction.
    pub fn from_store(
        component: &str,
        store: &Arc<ConfigStore>,
        ctx: &HardwareContext,
    ) -> Result<Option<Self>, DeckError> {
        let Some(raw_pin) = store.get_int("i_power_pin") else {
            return Ok(None);
        };
        let pin = u32::try_from(raw_pin)
            .map_err(|_| DeckError::Config(format!("[{component}] i_power_pin {raw_pin} is out of range")))?;
        let switch = Self {
            component: component.to_string(),
            pin,
            active_low: store.get_bool("b_active_low").unwrap_or(false),
            pins: Arc::clone(ctx.pins()),
            store: Arc::clone(store),
            on: AtomicBool::new(false),
        };
        switch
            .pins
            .configure_output(pin)
            .map_err(|e| DeckError::hardware(format!("{component}/gpio{pin}"), e))?;
        switch.drive(store.get_bool("b_power").unwrap_or(false))?;
        Ok(Some(switch))
    }

    fn drive(&self, on: bool) -> Result<(), DeckError> {
        self.pins
            .write(self.pin, on != self.active_low)
            .map_err(|e| DeckError::hardware(format!("{}/gpio{}", self.component, self.pin), e))?;
        self.on.store(on, Ordering::SeqCst);
        Ok(())
    }
}

impl PowerControllable for PowerSwitch {
    fn power(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    fn set_power(&self, on: bool) -> Result<Value, DeckError> {
        self.drive(on)?;
        self.store.set("b_power", ConfigValue::Bool(on));
        info!(subsystem = %self.component, power = on, "power switched");
        Ok(json!({ "power": on }))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ChildProcess
// ─────────────────────────────────────────────────────────────────────────────

/// Program and arguments taken from `s_command` / `l_args`.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    pub fn from_store(component: &str, store: &ConfigStore) -> Result<Self, DeckError> {
        let program = store
            .get_str("s_command")
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| DeckError::Config(format!("[{component}] s_command is empty")))?;
        let args = lock(&store.inner)
            .get_list("l_args")
            .map(|items| {
                items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self { program, args })
    }
}

/// Observed state of a [`ChildProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildState {
    Idle,
    Running(u32),
    Exited(Option<i32>),
}

#[derive(Default)]
struct ChildSlot {
    child: Option<Child>,
    last_exit: Option<i32>,
    starts: u32,
}

/// One external process owned by a subsystem.  Killed on drop.
pub struct ChildProcess {
    component: String,
    slot: Mutex<ChildSlot>,
}

impl ChildProcess {
    pub fn new(component: &str) -> Self {
        Self {
            component: component.to_string(),
            slot: Mutex::new(ChildSlot::default()),
        }
    }

    /// Spawn `cmd` unless a child is already running.  Returns the pid.
    pub fn spawn(&self, cmd: &CommandLine, envs: &[(String, String)]) -> Result<u32, DeckError> {
        let mut slot = lock(&self.slot);
        if let Some(child) = slot.child.as_mut() {
            if matches!(child.try_wait(), Ok(None)) {
                return Ok(child.id());
            }
        }
        let child = Command::new(&cmd.program)
            .args(&cmd.args)
            .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| DeckError::Process(format!("{}: failed to spawn '{}': {e}", self.component, cmd.program)))?;
        let pid = child.id();
        slot.child = Some(child);
        slot.starts += 1;
        info!(subsystem = %self.component, pid, program = %cmd.program, "process started");
        Ok(pid)
    }

    /// Reap the child if it has exited and report the current state.
    pub fn poll(&self) -> ChildState {
        let mut slot = lock(&self.slot);
        let Some(child) = slot.child.as_mut() else {
            return if slot.starts == 0 {
                ChildState::Idle
            } else {
                ChildState::Exited(slot.last_exit)
            };
        };
        match child.try_wait() {
            Ok(None) => ChildState::Running(child.id()),
            Ok(Some(status)) => {
                slot.last_exit = status.code();
                slot.child = None;
                debug!(subsystem = %self.component, code = ?status.code(), "process exited");
                ChildState::Exited(status.code())
            }
            Err(e) => {
                warn!(subsystem = %self.component, error = %e, "failed to poll process");
                ChildState::Running(child.id())
            }
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.poll(), ChildState::Running(_))
    }

    /// Kill and reap the child.  Stopping an idle process is not an error.
    pub fn stop(&self) -> Result<(), DeckError> {
        let mut slot = lock(&self.slot);
        let Some(mut child) = slot.child.take() else {
            return Ok(());
        };
        if let Err(e) = child.kill() {
            // InvalidInput means it already exited.
            if e.kind() != std::io::ErrorKind::InvalidInput {
                slot.child = Some(child);
                return Err(DeckError::Process(format!("{}: failed to stop process: {e}", self.component)));
            }
        }
        let status = child
            .wait()
            .map_err(|e| DeckError::Process(format!("{}: failed to reap process: {e}", self.component)))?;
        slot.last_exit = status.code();
        info!(subsystem = %self.component, "process stopped");
        Ok(())
    }

    pub fn starts(&self) -> u32 {
        lock(&self.slot).starts
    }

    pub fn status(&self) -> Value {
        let state = self.poll();
        let slot = lock(&self.slot);
        json!({
            "running": matches!(state, ChildState::Running(_)),
            "pid": match state { ChildState::Running(pid) => Some(pid), _ => None },
            "last_exit": slot.last_exit,
            "starts": slot.starts,
        })
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            warn!(subsystem = %self.component, error = %e, "process left running on drop");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Command templates
// ─────────────────────────────────────────────────────────────────────────────

/// Substitute `{name}` placeholders in `template` and run it to completion.
///
/// The template is split on whitespace before substitution, so values never
/// introduce extra arguments.
pub fn run_template(component: &str, template: &str, vars: &[(&str, String)]) -> Result<(), DeckError> {
    let mut words = template.split_whitespace().map(|word| {
        vars.iter()
            .fold(word.to_string(), |acc, (name, value)| acc.replace(&format!("{{{name}}}"), value))
    });
    let program = words
        .next()
        .ok_or_else(|| DeckError::Config(format!("[{component}] empty command template")))?;
    let args: Vec<String> = words.collect();
    debug!(subsystem = %component, %program, ?args, "running command");
    let output = Command::new(&program)
        .args(&args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| DeckError::hardware(component, format!("failed to run '{program}': {e}")))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(DeckError::hardware(
            component,
            format!(
                "'{program}' exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimBus, SimPins};
    use cyberdeck_config::ConfigDocument;

    fn store(text: &str) -> Arc<ConfigStore> {
        let doc = ConfigDocument::parse(text).unwrap();
        Arc::new(ConfigStore::new(doc.sections()[0].config.clone()))
    }

    #[test]
    fn apply_parses_by_tag() {
        let s = store("[a]\ns_id = a\ni_volume_step = 3\n");
        assert_eq!(s.apply("i_volume_step", &json!("42")).unwrap(), json!({"i_volume_step": 42}));
        assert_eq!(s.get_int("i_volume_step"), Some(42));
        s.apply("b_new", &json!("yes")).unwrap();
        assert_eq!(s.get_bool("b_new"), Some(true));
    }

    #[test]
    fn apply_rejects_bad_input() {
        let s = store("[a]\ns_id = a\n");
        assert!(matches!(s.apply("s_id", &json!("b")), Err(DeckError::InvalidArgument(_))));
        assert!(matches!(s.apply("volume", &json!(1)), Err(DeckError::InvalidArgument(_))));
        assert!(matches!(s.apply("i_volume_step", &json!("loud")), Err(DeckError::InvalidArgument(_))));
        assert_eq!(s.get_str("s_id").as_deref(), Some("a"));
    }

    #[test]
    fn apply_rejects_text_that_would_not_reload() {
        let s = store("[a]\ns_id = a\n");
        for (key, value) in [
            ("s_note", json!("hi\nx_bad = 1")),
            ("s_pad", json!("  padded  ")),
            ("s_a=b", json!("x")),
        ] {
            let err = s.apply(key, &value).unwrap_err();
            assert!(matches!(err, DeckError::InvalidArgument(_)), "{key} accepted");
            assert_eq!(s.get_str(key), None);
        }
    }

    #[test]
    fn apply_refuses_driver_owned_keys() {
        let s = store("[a]\ns_id = a\nb_power = false\ni_volume = 30\n");
        for (key, value) in [
            ("b_power", json!(true)),
            ("i_volume", json!(900)),
            ("b_muted", json!(true)),
            ("i_brightness", json!(10)),
            ("f_frequency", json!(7.1e6)),
        ] {
            let err = s.apply(key, &value).unwrap_err();
            assert!(err.to_string().contains("is managed by"), "{key}: {err}");
        }
        assert_eq!(s.get_bool("b_power"), Some(false));
        assert_eq!(s.get_int("i_volume"), Some(30));
    }

    #[test]
    fn power_switch_absent_without_pin() {
        let ctx = HardwareContext::simulated(SimBus::new(), SimPins::new());
        let s = store("[a]\ns_id = a\n");
        assert!(PowerSwitch::from_store("a", &s, &ctx).unwrap().is_none());
    }

    #[test]
    fn power_switch_drives_pin_and_mirrors_config() {
        let pins = SimPins::new();
        let ctx = HardwareContext::simulated(SimBus::new(), pins.clone());
        let s = store("[a]\ns_id = a\ni_power_pin = 17\nb_power = yes\n");
        let switch = PowerSwitch::from_store("a", &s, &ctx).unwrap().unwrap();
        assert!(switch.power());
        assert_eq!(pins.level(17), Some(true));

        switch.set_power(false).unwrap();
        assert_eq!(pins.level(17), Some(false));
        assert_eq!(s.get_bool("b_power"), Some(false));
    }

    #[test]
    fn active_low_inverts_level() {
        let pins = SimPins::new();
        let ctx = HardwareContext::simulated(SimBus::new(), pins.clone());
        let s = store("[a]\ns_id = a\ni_power_pin = 5\nb_active_low = true\n");
        let switch = PowerSwitch::from_store("a", &s, &ctx).unwrap().unwrap();
        assert!(!switch.power());
        assert_eq!(pins.level(5), Some(true));
        switch.toggle_power().unwrap();
        assert_eq!(pins.level(5), Some(false));
    }

    #[test]
    fn unavailable_pin_fails_construction() {
        let pins = SimPins::new();
        pins.fail_pin(9);
        let ctx = HardwareContext::simulated(SimBus::new(), pins);
        let s = store("[a]\ns_id = a\ni_power_pin = 9\n");
        assert!(matches!(
            PowerSwitch::from_store("a", &s, &ctx),
            Err(DeckError::HardwareIo { .. })
        ));
    }

    #[test]
    fn command_line_from_config() {
        let s = store("[a]\ns_id = a\ns_command = rtl_tcp\nl_args = [\"-p\", 1234]\n");
        let cmd = CommandLine::from_store("a", &s).unwrap();
        assert_eq!(cmd.program, "rtl_tcp");
        assert_eq!(cmd.args, vec!["-p".to_string(), "1234".to_string()]);
        assert!(CommandLine::from_store("a", &store("[a]\ns_id = a\n")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn child_process_lifecycle() {
        let proc_ = ChildProcess::new("sleeper");
        assert_eq!(proc_.poll(), ChildState::Idle);
        let cmd = CommandLine {
            program: "sleep".into(),
            args: vec!["30".into()],
        };
        let pid = proc_.spawn(&cmd, &[]).unwrap();
        assert_eq!(proc_.spawn(&cmd, &[]).unwrap(), pid);
        assert!(proc_.is_running());
        proc_.stop().unwrap();
        assert!(!proc_.is_running());
        assert_eq!(proc_.starts(), 1);
        proc_.stop().unwrap();
    }

    #[test]
    fn spawn_failure_is_process_error() {
        let proc_ = ChildProcess::new("ghost");
        let cmd = CommandLine {
            program: "/nonexistent/cyberdeck-test-binary".into(),
            args: vec![],
        };
        assert!(matches!(proc_.spawn(&cmd, &[]), Err(DeckError::Process(_))));
    }

    #[cfg(unix)]
    #[test]
    fn run_template_reports_failure() {
        assert!(run_template("t", "true {x}", &[("x", "1".into())]).is_ok());
        assert!(matches!(
            run_template("t", "false", &[]),
            Err(DeckError::HardwareIo { .. })
        ));
        assert!(run_template("t", "   ", &[]).is_err());
    }
}
