//! [`Daemon`] – boot and orderly shutdown of the whole supervisor.
//!
//! Boot order:
//!
//! 1. acquire the hardware context (real bus + pins, or simulated);
//! 2. load the subsystem configuration and build the registry;
//! 3. start every background loop through the lifecycle supervisor;
//! 4. probe the power-management microcontroller and start the heartbeat.
//!
//! Any failure in steps 1–3 aborts the boot, as does an unknown heartbeat
//! parameter id (checked before any loop starts).  A heartbeat peripheral
//! that does not answer the probe is only logged; its packets are still sent.
//!
//! Shutdown reverses the order: heartbeat first, then the background loops.

use std::path::PathBuf;
use std::sync::Arc;

use cyberdeck_config::load;
use cyberdeck_hal::{HardwareContext, SimBus, SimPins};
use cyberdeck_kernel::{
    Dispatcher, HeartbeatConfig, HeartbeatController, LifecycleSupervisor, LoopState, SubsystemRegistry,
    SupervisorConfig,
};
use cyberdeck_types::DeckError;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Boot failure, tagged with the stage that failed.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("hardware initialisation failed: {0}")]
    Hardware(#[source] DeckError),

    #[error("subsystem configuration rejected: {0}")]
    Config(#[source] DeckError),

    #[error("heartbeat setup failed: {0}")]
    Heartbeat(#[source] DeckError),
}

/// Heartbeat peripheral address and packet settings.
#[derive(Debug, Clone, Copy)]
pub struct HeartbeatSetup {
    pub address: u16,
    pub config: HeartbeatConfig,
}

/// Everything [`Daemon::boot`] needs.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub subsystems_path: PathBuf,
    pub i2c_bus: PathBuf,
    pub gpio_root: PathBuf,
    pub simulate_hardware: bool,
    pub supervisor: SupervisorConfig,
    /// `None` disables the heartbeat entirely.
    pub heartbeat: Option<HeartbeatSetup>,
}

pub struct Daemon {
    dispatcher: Arc<Dispatcher>,
    supervisor: LifecycleSupervisor,
    heartbeat: Option<Arc<HeartbeatController>>,
    heartbeat_task: Option<JoinHandle<()>>,
    heartbeat_cancel: CancellationToken,
}

impl Daemon {
    pub async fn boot(config: &DaemonConfig) -> Result<Self, DaemonError> {
        let ctx = hardware_context(config).map_err(DaemonError::Hardware)?;

        let doc = load(&config.subsystems_path).map_err(|e| DaemonError::Config(e.into()))?;
        let registry = SubsystemRegistry::from_document(&doc, &ctx).map_err(|e| match e {
            DeckError::HardwareIo { .. } => DaemonError::Hardware(e),
            other => DaemonError::Config(other),
        })?;
        info!(path = %config.subsystems_path.display(), subsystems = registry.len(), "configuration loaded");

        let heartbeat = config
            .heartbeat
            .map(|setup| HeartbeatController::new(ctx.bus().device(setup.address), setup.config).map(Arc::new))
            .transpose()
            .map_err(DaemonError::Heartbeat)?;

        let mut supervisor = LifecycleSupervisor::new(&registry, config.supervisor);
        let dispatcher = Arc::new(Dispatcher::new(registry, config.subsystems_path.clone()));
        supervisor.start().await;

        let heartbeat_cancel = CancellationToken::new();
        let mut heartbeat_task = None;
        if let Some(controller) = &heartbeat {
            if !controller.probe().await {
                warn!(param = ?controller.param(), "heartbeat peripheral did not answer the probe");
            }
            heartbeat_task = Some(Arc::clone(controller).spawn(heartbeat_cancel.clone()));
        }

        info!("daemon ready");
        Ok(Self {
            dispatcher,
            supervisor,
            heartbeat,
            heartbeat_task,
            heartbeat_cancel,
        })
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn heartbeat(&self) -> Option<&Arc<HeartbeatController>> {
        self.heartbeat.as_ref()
    }

    /// `(id, state)` of every background loop.
    pub fn loop_states(&self) -> Vec<(String, LoopState)> {
        self.supervisor.states()
    }

    /// Stop the heartbeat, then every background loop.
    pub async fn shutdown(mut self) -> Vec<(String, LoopState)> {
        info!("shutting down");
        self.heartbeat_cancel.cancel();
        if let Some(task) = self.heartbeat_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "heartbeat task ended abnormally");
            }
        }
        self.supervisor.shutdown().await;
        self.supervisor.states()
    }
}

fn hardware_context(config: &DaemonConfig) -> Result<HardwareContext, DeckError> {
    if !config.simulate_hardware {
        return HardwareContext::open(&config.i2c_bus, &config.gpio_root);
    }
    let mut bus = SimBus::new();
    if let Some(setup) = config.heartbeat {
        bus = bus.with_device(setup.address, b"OK".to_vec());
    }
    info!("using simulated hardware");
    Ok(HardwareContext::simulated(bus, SimPins::new()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::Duration;

    use cyberdeck_kernel::heartbeat::PARAM_TIME_SYNC;
    use serde_json::json;

    const DECK: &str = "\
[usb]
s_id = usb
i_power_pin = 4

[sleeper]
s_id = sleeper
s_type = process
s_command = sleep
l_args = [\"30\"]
b_autostart = yes
f_poll_interval = 0.05
";

    fn config(dir: &Path, simulate: bool, heartbeat: bool) -> DaemonConfig {
        let path = dir.join("subsystems.ini");
        std::fs::write(&path, DECK).unwrap();
        DaemonConfig {
            subsystems_path: path,
            i2c_bus: dir.join("i2c-1"),
            gpio_root: dir.to_path_buf(),
            simulate_hardware: simulate,
            supervisor: SupervisorConfig {
                stagger: Duration::from_millis(1),
                stop_timeout: Duration::from_secs(2),
            },
            heartbeat: heartbeat.then_some(HeartbeatSetup {
                address: 0x08,
                config: HeartbeatConfig {
                    param_id: PARAM_TIME_SYNC,
                    interval: Duration::from_millis(20),
                    start_enabled: true,
                    ..HeartbeatConfig::default()
                },
            }),
        }
    }

    #[tokio::test]
    async fn boots_and_shuts_down_in_simulation() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::boot(&config(dir.path(), true, true)).await.unwrap();

        assert_eq!(daemon.dispatcher().systems().response, json!(["usb", "sleeper"]));
        assert_eq!(daemon.loop_states(), vec![("sleeper".to_string(), LoopState::Running)]);
        let hb = daemon.heartbeat().unwrap();
        assert!(hb.is_enabled());
        assert!(hb.probe().await);

        let states = daemon.shutdown().await;
        assert_eq!(states, vec![("sleeper".to_string(), LoopState::Stopped)]);
    }

    #[tokio::test]
    async fn missing_bus_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = Daemon::boot(&config(dir.path(), false, false)).await.err().unwrap();
        assert!(matches!(err, DaemonError::Hardware(_)));
    }

    #[tokio::test]
    async fn bad_configuration_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path(), true, false);
        std::fs::write(&cfg.subsystems_path, "[a]\nx_bad = 1\n").unwrap();
        let err = Daemon::boot(&cfg).await.err().unwrap();
        assert!(matches!(err, DaemonError::Config(_)));
        assert!(err.to_string().contains("ConfigError"));
    }

    #[tokio::test]
    async fn unknown_heartbeat_param_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path(), true, true);
        if let Some(setup) = cfg.heartbeat.as_mut() {
            setup.config.param_id = 0x42;
        }
        let err = Daemon::boot(&cfg).await.err().unwrap();
        assert!(matches!(err, DaemonError::Heartbeat(_)));
    }
}
