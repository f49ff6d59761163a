//! Radio transceiver tuned through a hamlib `rigctld` daemon.
//!
//! Each command opens a short-lived TCP connection and speaks the plain text
//! protocol:
//!
//! | Request        | Reply                         |
//! |----------------|-------------------------------|
//! | `f\n`          | frequency in Hz               |
//! | `F <hz>\n`     | `RPRT 0` (non-zero = failure) |
//! | `m\n`          | mode line, passband line      |
//!
//! Connect, read and write are all bounded by `f_timeout` seconds.

use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use cyberdeck_config::{ConfigValue, FieldSpec, SubsystemConfig, ValueType};
use cyberdeck_types::{DeckError, SubsystemKind};
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::context::HardwareContext;
use crate::drivers::common::{ConfigStore, PowerSwitch};
use crate::subsystem::{Configurable, PowerControllable, RadioTuning, StatusReporting, Subsystem};

pub const SCHEMA: &[FieldSpec] = &[
    FieldSpec::optional("s_host", ValueType::Str),
    FieldSpec::optional("i_port", ValueType::Int),
    FieldSpec::optional("f_timeout", ValueType::Float),
    FieldSpec::optional("f_frequency", ValueType::Float),
    FieldSpec::optional("i_power_pin", ValueType::Int),
    FieldSpec::optional("b_active_low", ValueType::Bool),
    FieldSpec::optional("b_power", ValueType::Bool),
];

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: i64 = 4532;
const DEFAULT_TIMEOUT_SECS: f64 = 1.0;

pub struct RigCtl {
    id: String,
    store: Arc<ConfigStore>,
    power: Option<PowerSwitch>,
}

impl RigCtl {
    pub fn new(id: &str, config: SubsystemConfig, ctx: &HardwareContext) -> Result<Self, DeckError> {
        let store = Arc::new(ConfigStore::new(config));
        let power = PowerSwitch::from_store(id, &store, ctx)?;
        Ok(Self {
            id: id.to_string(),
            store,
            power,
        })
    }

    fn endpoint(&self) -> Result<SocketAddr, DeckError> {
        let host = self.store.get_str("s_host").unwrap_or_else(|| DEFAULT_HOST.to_string());
        let port = self.store.get_int("i_port").unwrap_or(DEFAULT_PORT);
        let port = u16::try_from(port)
            .map_err(|_| DeckError::Config(format!("[{}] i_port {port} is out of range", self.id)))?;
        (host.as_str(), port)
            .to_socket_addrs()
            .map_err(|e| DeckError::hardware(&self.id, format!("cannot resolve {host}: {e}")))?
            .next()
            .ok_or_else(|| DeckError::hardware(&self.id, format!("{host} resolved to no address")))
    }

    fn timeout(&self) -> Duration {
        let secs = self.store.get_float("f_timeout").unwrap_or(DEFAULT_TIMEOUT_SECS);
        Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(1))
    }

    /// Send one command and read `lines` reply lines.
    fn query(&self, command: &str, lines: usize) -> Result<Vec<String>, DeckError> {
        let addr = self.endpoint()?;
        let timeout = self.timeout();
        let component = format!("{}@{addr}", self.id);
        let io_err = |e: std::io::Error| DeckError::hardware(component.clone(), e);

        let mut stream = TcpStream::connect_timeout(&addr, timeout).map_err(io_err)?;
        stream.set_read_timeout(Some(timeout)).map_err(io_err)?;
        stream.set_write_timeout(Some(timeout)).map_err(io_err)?;
        stream.write_all(format!("{command}\n").as_bytes()).map_err(io_err)?;
        debug!(subsystem = %self.id, %command, "rigctl request");

        let mut reader = BufReader::new(stream);
        let mut reply = Vec::with_capacity(lines);
        for _ in 0..lines {
            let mut line = String::new();
            if reader.read_line(&mut line).map_err(io_err)? == 0 {
                return Err(DeckError::hardware(component.clone(), "connection closed mid-reply"));
            }
            let line = line.trim().to_string();
            if let Some(code) = line.strip_prefix("RPRT ") {
                if code != "0" {
                    return Err(DeckError::hardware(component.clone(), format!("rigctld error {code}")));
                }
            }
            reply.push(line);
        }
        Ok(reply)
    }
}

impl RadioTuning for RigCtl {
    fn get_frequency(&self) -> Result<Value, DeckError> {
        let reply = self.query("f", 1)?;
        let hz: f64 = reply[0]
            .parse()
            .map_err(|_| DeckError::hardware(&self.id, format!("unexpected frequency reply '{}'", reply[0])))?;
        Ok(json!({ "frequency": hz }))
    }

    fn set_frequency(&self, hz: f64) -> Result<Value, DeckError> {
        if !hz.is_finite() || hz <= 0.0 {
            return Err(DeckError::InvalidArgument(format!("frequency must be positive, got {hz}")));
        }
        self.query(&format!("F {hz:.0}"), 1)?;
        self.store.set("f_frequency", ConfigValue::Float(hz.round()));
        info!(subsystem = %self.id, hz, "frequency set");
        Ok(json!({ "frequency": hz.round() }))
    }

    fn get_mode(&self) -> Result<Value, DeckError> {
        let reply = self.query("m", 2)?;
        let passband: i64 = reply[1].parse().unwrap_or(0);
        Ok(json!({ "mode": reply[0], "passband": passband }))
    }
}

impl StatusReporting for RigCtl {
    fn status(&self) -> Value {
        let frequency = self.get_frequency().ok().and_then(|v| v.get("frequency").cloned());
        json!({
            "reachable": frequency.is_some(),
            "frequency": frequency,
            "power": self.power.as_ref().map(|p| p.power()),
        })
    }
}

impl Subsystem for RigCtl {
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

    fn as_radio(&self) -> Option<&dyn RadioTuning> {
        Some(self)
    }
}
