//! [`Dispatcher`] – the single entry point for commands.
//!
//! A command names a subsystem, an operation and optional positional
//! arguments.  Resolution happens in a fixed order and every outcome is an
//! [`Envelope`]; nothing escapes as a panic or a bare error:
//!
//! 1. unknown subsystem id → `NotFound`
//! 2. operation name outside the vocabulary → `Unsupported`
//! 3. subsystem lacks the operation's capability → `Unsupported`
//! 4. wrong argument count or type → `InvalidArgument`
//! 5. the capability method's own `Result`, or a caught panic
//!
//! # Example
//!
//! ```no_run
//! use cyberdeck_kernel::{Dispatcher, SubsystemRegistry};
//!
//! let dispatcher = Dispatcher::new(SubsystemRegistry::default(), "subsystems.ini");
//! let envelope = dispatcher.invoke("gps", "get_status", None);
//! assert!(!envelope.success);
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use cyberdeck_config::str_to_bool;
use cyberdeck_hal::Subsystem;
use cyberdeck_types::{Capability, DeckError, Envelope, Operation};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::registry::SubsystemRegistry;

/// Routes commands to subsystems and serves the aggregate views.
pub struct Dispatcher {
    registry: SubsystemRegistry,
    config_path: PathBuf,
}

impl Dispatcher {
    /// `config_path` is where [`Dispatcher::save_config`] writes.
    pub fn new(registry: SubsystemRegistry, config_path: impl Into<PathBuf>) -> Self {
        Self {
            registry,
            config_path: config_path.into(),
        }
    }

    pub fn registry(&self) -> &SubsystemRegistry {
        &self.registry
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Run `operation` on subsystem `id` with positional `args`.
    pub fn invoke(&self, id: &str, operation: &str, args: Option<Vec<Value>>) -> Envelope {
        let args = args.unwrap_or_default();
        debug!(subsystem = id, operation, args = args.len(), "dispatching command");
        let envelope = Envelope::from(self.resolve(id, operation, &args));
        if !envelope.success {
            debug!(subsystem = id, operation, response = %envelope.response, "command failed");
        }
        envelope
    }

    fn resolve(&self, id: &str, operation: &str, args: &[Value]) -> Result<Value, DeckError> {
        let subsystem = self
            .registry
            .get(id)
            .ok_or_else(|| DeckError::NotFound(id.to_string()))?;
        let op: Operation = operation.parse()?;
        let capability = op.capability();
        if !subsystem.supports(capability)
            || (op == Operation::GetConfigStatus && !subsystem.supports(Capability::StatusReporting))
        {
            return Err(DeckError::Unsupported {
                subsystem: id.to_string(),
                operation: op,
                capability,
            });
        }
        if args.len() != op.arity() {
            return Err(DeckError::InvalidArgument(format!(
                "{op} takes {} argument(s), got {}",
                op.arity(),
                args.len()
            )));
        }

        let subsystem = subsystem.as_ref();
        panic::catch_unwind(AssertUnwindSafe(|| call(subsystem, op, args))).unwrap_or_else(|payload| {
            let reason = panic_message(payload.as_ref());
            warn!(subsystem = id, operation = %op, %reason, "capability method panicked");
            Err(DeckError::hardware(id, format!("{op} panicked: {reason}")))
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Aggregations
    // ─────────────────────────────────────────────────────────────────────────

    /// Ids in declaration order.
    pub fn systems(&self) -> Envelope {
        Envelope::ok(json!(self.registry.ids()))
    }

    pub fn status(&self) -> Envelope {
        Envelope::ok(self.registry.status())
    }

    pub fn config(&self) -> Envelope {
        Envelope::ok(self.registry.config())
    }

    pub fn configstatus(&self) -> Envelope {
        Envelope::ok(self.registry.configstatus())
    }

    /// Persist every live configuration to the configured path.
    pub fn save_config(&self) -> Envelope {
        match self.registry.persist(&self.config_path) {
            Ok(()) => Envelope::ok(json!(self.config_path.display().to_string())),
            Err(e) => {
                warn!(error = %e, "saving configuration failed");
                Envelope::failure(&e)
            }
        }
    }

    pub fn ping(&self) -> Envelope {
        Envelope::ok("pong")
    }
}

// The capability was checked by the caller, so a missing accessor here can
// only mean a subsystem whose accessors disagree with `supports`.
fn call(s: &dyn Subsystem, op: Operation, args: &[Value]) -> Result<Value, DeckError> {
    let missing = || DeckError::Unsupported {
        subsystem: s.id().to_string(),
        operation: op,
        capability: op.capability(),
    };
    match op {
        Operation::GetConfig => s
            .as_configurable()
            .map(|c| c.config().to_json())
            .ok_or_else(missing),
        Operation::SetConfig => s
            .as_configurable()
            .ok_or_else(missing)?
            .set_config(arg_str(args, 0)?, &args[1]),
        Operation::GetStatus => s.as_status().map(|st| st.status()).ok_or_else(missing),
        Operation::GetConfigStatus => {
            let config = s.as_configurable().ok_or_else(missing)?.config().to_json();
            let status = s.as_status().ok_or_else(missing)?.status();
            Ok(json!({ "config": config, "status": status }))
        }
        Operation::SetPower => s.as_power().ok_or_else(missing)?.set_power(arg_bool(args, 0)?),
        Operation::TogglePower => s.as_power().ok_or_else(missing)?.toggle_power(),
        Operation::StartProcess => s.as_process().ok_or_else(missing)?.start_process(),
        Operation::StopProcess => s.as_process().ok_or_else(missing)?.stop_process(),
        Operation::SetVolume => s.as_volume().ok_or_else(missing)?.set_volume(arg_int(args, 0)?),
        Operation::IncrementVolume => s.as_volume().ok_or_else(missing)?.increment_volume(),
        Operation::DecrementVolume => s.as_volume().ok_or_else(missing)?.decrement_volume(),
        Operation::SetMute => s.as_volume().ok_or_else(missing)?.set_mute(arg_bool(args, 0)?),
        Operation::ToggleMute => s.as_volume().ok_or_else(missing)?.toggle_mute(),
        Operation::SetTest => s.as_volume().ok_or_else(missing)?.set_test(arg_bool(args, 0)?),
        Operation::SetBrightness => s
            .as_brightness()
            .ok_or_else(missing)?
            .set_brightness(arg_int(args, 0)?),
        Operation::IncrementBrightness => s.as_brightness().ok_or_else(missing)?.increment_brightness(),
        Operation::DecrementBrightness => s.as_brightness().ok_or_else(missing)?.decrement_brightness(),
        Operation::Screenshot => s.as_brightness().ok_or_else(missing)?.screenshot(),
        Operation::GetFrequency => s.as_radio().ok_or_else(missing)?.get_frequency(),
        Operation::SetFrequency => s.as_radio().ok_or_else(missing)?.set_frequency(arg_float(args, 0)?),
        Operation::GetMode => s.as_radio().ok_or_else(missing)?.get_mode(),
        Operation::Reboot => s.as_host().ok_or_else(missing)?.reboot(),
        Operation::Shutdown => s.as_host().ok_or_else(missing)?.shutdown(),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Argument conversion
// ─────────────────────────────────────────────────────────────────────────────

fn bad_arg(index: usize, expected: &str, got: &Value) -> DeckError {
    DeckError::InvalidArgument(format!("argument {index} must be {expected}, got {got}"))
}

fn arg_str(args: &[Value], index: usize) -> Result<&str, DeckError> {
    args[index].as_str().ok_or_else(|| bad_arg(index, "a string", &args[index]))
}

/// Booleans, or strings read the same way as `b_` settings.
fn arg_bool(args: &[Value], index: usize) -> Result<bool, DeckError> {
    match &args[index] {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => Ok(str_to_bool(s)),
        other => Err(bad_arg(index, "a boolean", other)),
    }
}

fn arg_int(args: &[Value], index: usize) -> Result<i64, DeckError> {
    let value = &args[index];
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| bad_arg(index, "an integer", value))
}

fn arg_float(args: &[Value], index: usize) -> Result<f64, DeckError> {
    let value = &args[index];
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .ok_or_else(|| bad_arg(index, "a number", value))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use cyberdeck_config::ConfigDocument;
    use cyberdeck_hal::{HardwareContext, SimBus, SimPins, StatusReporting};
    use cyberdeck_types::SubsystemKind;

    const DECK: &str = "\
[usb]
s_id = usb
i_power_pin = 4

[audio]
s_id = audio
s_type = audio
i_volume = 50

[gps]
s_id = gps
";

    fn dispatcher(dir: &Path) -> Dispatcher {
        let ctx = HardwareContext::simulated(SimBus::new(), SimPins::new());
        let doc = ConfigDocument::parse(DECK).unwrap();
        let registry = SubsystemRegistry::from_document(&doc, &ctx).unwrap();
        Dispatcher::new(registry, dir.join("subsystems.ini"))
    }

    fn fresh() -> (tempfile::TempDir, Dispatcher) {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        (dir, d)
    }

    #[test]
    fn unknown_subsystem_is_not_found() {
        let (_dir, d) = fresh();
        let env = d.invoke("warp_drive", "get_status", None);
        assert!(!env.success);
        assert!(env.message().unwrap().starts_with("NotFound:"));
    }

    #[test]
    fn unknown_operation_is_unsupported() {
        let (_dir, d) = fresh();
        let env = d.invoke("usb", "no_such_operation", None);
        assert!(!env.success);
        assert!(env.message().unwrap().starts_with("Unsupported:"));
    }

    #[test]
    fn missing_capability_is_unsupported() {
        let (_dir, d) = fresh();
        let env = d.invoke("gps", "toggle_power", None);
        assert!(!env.success);
        assert!(env.message().unwrap().starts_with("Unsupported:"));

        let env = d.invoke("usb", "set_volume", Some(vec![json!(3)]));
        assert!(env.message().unwrap().starts_with("Unsupported:"));
    }

    #[test]
    fn not_found_takes_precedence_over_bad_operation() {
        let (_dir, d) = fresh();
        let env = d.invoke("nope", "nonsense", None);
        assert!(env.message().unwrap().starts_with("NotFound:"));
    }

    #[test]
    fn toggle_power_twice_restores_state() {
        let (_dir, d) = fresh();
        let before = d.invoke("usb", "get_status", None).response["power"].clone();
        assert!(d.invoke("usb", "toggle_power", None).success);
        assert_ne!(d.invoke("usb", "get_status", None).response["power"], before);
        assert!(d.invoke("usb", "toggle_power", None).success);
        assert_eq!(d.invoke("usb", "get_status", None).response["power"], before);
    }

    #[test]
    fn arity_and_type_are_checked() {
        let (_dir, d) = fresh();
        let env = d.invoke("audio", "set_volume", None);
        assert!(env.message().unwrap().starts_with("InvalidArgument:"));

        let env = d.invoke("audio", "set_volume", Some(vec![json!("loud")]));
        assert!(env.message().unwrap().starts_with("InvalidArgument:"));

        let env = d.invoke("audio", "increment_volume", Some(vec![json!(1)]));
        assert!(env.message().unwrap().starts_with("InvalidArgument:"));

        let env = d.invoke("usb", "set_config", Some(vec![json!(1), json!(2)]));
        assert!(env.message().unwrap().starts_with("InvalidArgument:"));
    }

    #[test]
    fn arguments_are_converted() {
        let (_dir, d) = fresh();
        let env = d.invoke("audio", "set_volume", Some(vec![json!("70")]));
        assert_eq!(env.response, json!({"volume": 70}));

        let env = d.invoke("usb", "set_power", Some(vec![json!("yes")]));
        assert_eq!(env.response, json!({"power": true}));

        let env = d.invoke("audio", "set_mute", Some(vec![json!(true)]));
        assert_eq!(env.response, json!({"muted": true}));
    }

    #[test]
    fn set_config_then_get_config() {
        let (_dir, d) = fresh();
        let env = d.invoke("gps", "set_config", Some(vec![json!("f_baud"), json!("9600.5")]));
        assert!(env.success, "{env:?}");
        let cfg = d.invoke("gps", "get_config", None).response;
        assert_eq!(cfg["f_baud"], json!(9600.5));
        assert_eq!(cfg["s_id"], json!("gps"));
    }

    #[test]
    fn single_configstatus() {
        let (_dir, d) = fresh();
        let env = d.invoke("audio", "get_configstatus", None);
        assert!(env.success);
        assert_eq!(env.response["config"]["i_volume"], json!(50));
        assert_eq!(env.response["status"]["volume"], json!(50));
    }

    #[test]
    fn aggregations_follow_registry_order() {
        let (_dir, d) = fresh();
        assert_eq!(d.systems().response, json!(["usb", "audio", "gps"]));
        assert_eq!(d.systems().response, d.systems().response);
        assert_eq!(d.ping().response, json!("pong"));

        let all = d.configstatus().response;
        let ids: Vec<_> = all.as_array().unwrap().iter().map(|e| e["id"].clone()).collect();
        assert_eq!(ids, vec![json!("usb"), json!("audio"), json!("gps")]);
        assert_eq!(d.status().response.as_array().unwrap().len(), 3);
        assert_eq!(d.config().response[1]["config"]["s_type"], json!("audio"));
    }

    #[test]
    fn save_config_persists_changes() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        d.invoke("audio", "set_volume", Some(vec![json!(10)]));
        assert!(d.save_config().success);

        let saved = cyberdeck_config::load(d.config_path()).unwrap();
        assert_eq!(saved.section("audio").unwrap().get_int("i_volume"), Some(10));
        assert_eq!(saved.len(), 3);
    }

    #[test]
    fn unreadable_values_never_reach_saved_file() {
        let dir = tempfile::tempdir().unwrap();
        let d = dispatcher(dir.path());
        let bad = [
            ("s_note", json!("hi\nx_bad = 1")),
            ("s_pad", json!("  padded  ")),
            ("s_a=b", json!("x")),
            ("s_x\n[evil]", json!("x")),
        ];
        for (key, value) in bad {
            let env = d.invoke("gps", "set_config", Some(vec![json!(key), value]));
            assert!(env.message().unwrap().starts_with("InvalidArgument:"), "{key:?}: {env:?}");
        }
        let env = d.invoke("gps", "set_config", Some(vec![json!("s_note"), json!("two words: a=b")]));
        assert!(env.success, "{env:?}");

        assert!(d.save_config().success);
        let saved = cyberdeck_config::load(d.config_path()).unwrap();
        let gps = saved.section("gps").unwrap();
        assert_eq!(gps.get_str("s_note"), Some("two words: a=b"));
        assert_eq!(gps.get("s_pad"), None);
    }

    #[test]
    fn set_config_cannot_bypass_driver_state() {
        let (_dir, d) = fresh();
        let env = d.invoke("usb", "set_config", Some(vec![json!("b_power"), json!(true)]));
        assert!(env.message().unwrap().contains("set_power"));
        assert_eq!(d.invoke("usb", "get_status", None).response["power"], json!(false));
        assert_ne!(d.invoke("usb", "get_config", None).response["b_power"], json!(true));

        let env = d.invoke("audio", "set_config", Some(vec![json!("i_volume"), json!(900)]));
        assert!(env.message().unwrap().contains("set_volume"));
        assert_eq!(d.invoke("audio", "get_status", None).response["volume"], json!(50));
    }

    #[test]
    fn save_config_failure_is_envelope() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let d = dispatcher(&blocker);
        let env = d.save_config();
        assert!(!env.success);
        assert!(env.message().unwrap().starts_with("PersistenceError:"));
    }

    struct Panicky;

    impl StatusReporting for Panicky {
        fn status(&self) -> Value {
            panic!("sensor exploded");
        }
    }

    impl Subsystem for Panicky {
        fn id(&self) -> &str {
            "panicky"
        }
        fn kind(&self) -> SubsystemKind {
            SubsystemKind::Device
        }
        fn as_status(&self) -> Option<&dyn StatusReporting> {
            Some(self)
        }
    }

    #[test]
    fn panic_becomes_failed_envelope() {
        let d = Dispatcher::new(SubsystemRegistry::new(vec![Arc::new(Panicky)]).unwrap(), "unused.ini");
        let env = d.invoke("panicky", "get_status", None);
        assert!(!env.success);
        assert!(env.message().unwrap().contains("sensor exploded"));
    }
}
