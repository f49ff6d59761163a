//! [`ProcessUnit`] – a long-running external program (SDR server, GPS
//! daemon, …) kept alive by a background supervision loop.
//!
//! The loop starts the program when `b_autostart` is set, polls it every
//! `f_poll_interval` seconds and restarts it after an unexpected exit when
//! `b_restart` is set.  `start_process` / `stop_process` change the desired
//! state; the loop honours it on the next tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cyberdeck_config::{FieldSpec, SubsystemConfig, ValueType};
use cyberdeck_types::{DeckError, SubsystemKind};
use serde_json::{Value, json};
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::drivers::common::{ChildProcess, ChildState, CommandLine, ConfigStore, lock};
use crate::subsystem::{BackgroundLoop, Configurable, ProcessControllable, StatusReporting, Subsystem};

pub const SCHEMA: &[FieldSpec] = &[
    FieldSpec::required("s_command", ValueType::Str),
    FieldSpec::optional("l_args", ValueType::List),
    FieldSpec::optional("b_autostart", ValueType::Bool),
    FieldSpec::optional("b_restart", ValueType::Bool),
    FieldSpec::optional("f_poll_interval", ValueType::Float),
];

const DEFAULT_POLL_SECS: f64 = 1.0;

pub struct ProcessUnit {
    id: String,
    store: Arc<ConfigStore>,
    child: ChildProcess,
    wanted: AtomicBool,
    last_error: Mutex<Option<String>>,
}

impl ProcessUnit {
    /// # Errors
    ///
    /// [`DeckError::Config`] when `s_command` is empty.
    pub fn new(id: &str, config: SubsystemConfig) -> Result<Self, DeckError> {
        let store = Arc::new(ConfigStore::new(config));
        CommandLine::from_store(id, &store)?;
        Ok(Self {
            id: id.to_string(),
            child: ChildProcess::new(id),
            store,
            wanted: AtomicBool::new(false),
            last_error: Mutex::new(None),
        })
    }

    fn poll_interval(&self) -> Duration {
        let secs = self.store.get_float("f_poll_interval").unwrap_or(DEFAULT_POLL_SECS);
        Duration::try_from_secs_f64(secs)
            .ok()
            .filter(|d| !d.is_zero())
            .unwrap_or(Duration::from_secs(1))
    }

    fn record(&self, error: Option<String>) {
        *lock(&self.last_error) = error;
    }

    fn launch(&self) -> Result<u32, DeckError> {
        let result = CommandLine::from_store(&self.id, &self.store).and_then(|cmd| self.child.spawn(&cmd, &[]));
        match &result {
            Ok(_) => self.record(None),
            Err(e) => self.record(Some(e.to_string())),
        }
        result
    }

    /// One supervision step: reap an exited child and restart it if wanted.
    fn tick(&self) {
        if !self.wanted.load(Ordering::SeqCst) {
            return;
        }
        let ChildState::Exited(code) = self.child.poll() else {
            return;
        };
        if self.store.get_bool("b_restart").unwrap_or(false) {
            warn!(subsystem = %self.id, ?code, "process exited, restarting");
            if let Err(e) = self.launch() {
                warn!(subsystem = %self.id, error = %e, "restart failed");
            }
        } else {
            info!(subsystem = %self.id, ?code, "process exited");
            self.wanted.store(false, Ordering::SeqCst);
        }
    }
}

impl ProcessControllable for ProcessUnit {
    fn is_running(&self) -> bool {
        self.child.is_running()
    }

    fn start_process(&self) -> Result<Value, DeckError> {
        self.wanted.store(true, Ordering::SeqCst);
        let pid = self.launch()?;
        Ok(json!({ "running": true, "pid": pid }))
    }

    fn stop_process(&self) -> Result<Value, DeckError> {
        self.wanted.store(false, Ordering::SeqCst);
        self.child.stop()?;
        Ok(json!({ "running": false }))
    }
}

#[async_trait]
impl BackgroundLoop for ProcessUnit {
    async fn run(&self, cancel: CancellationToken) -> Result<(), DeckError> {
        if self.store.get_bool("b_autostart").unwrap_or(false) {
            self.wanted.store(true, Ordering::SeqCst);
            if let Err(e) = self.launch() {
                warn!(subsystem = %self.id, error = %e, "autostart failed");
            }
        }

        let mut ticker = time::interval(self.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.tick(),
            }
        }

        self.child.stop()
    }
}

impl StatusReporting for ProcessUnit {
    fn status(&self) -> Value {
        let mut status = self.child.status();
        status["wanted"] = json!(self.wanted.load(Ordering::SeqCst));
        status["last_error"] = json!(*lock(&self.last_error));
        status
    }
}

impl Subsystem for ProcessUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SubsystemKind {
        SubsystemKind::Process
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

    fn as_background(&self) -> Option<&dyn BackgroundLoop> {
        Some(self)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use cyberdeck_config::ConfigDocument;

    fn unit(extra: &str) -> Arc<ProcessUnit> {
        let text = format!("[sdr]\ns_id = sdr\n{extra}");
        let config = ConfigDocument::parse(&text).unwrap().sections()[0].config.clone();
        Arc::new(ProcessUnit::new("sdr", config).unwrap())
    }

    #[test]
    fn empty_command_is_rejected() {
        let config = ConfigDocument::parse("[p]\ns_id = p\ns_command = \n").unwrap().sections()[0]
            .config
            .clone();
        assert!(matches!(ProcessUnit::new("p", config), Err(DeckError::Config(_))));
    }

    #[test]
    fn manual_start_and_stop() {
        let p = unit("s_command = sleep\nl_args = [\"30\"]\n");
        assert!(!p.is_running());
        p.start_process().unwrap();
        assert!(p.is_running());
        assert_eq!(p.status()["wanted"], json!(true));
        p.stop_process().unwrap();
        assert!(!p.is_running());
        assert_eq!(p.status()["wanted"], json!(false));
    }

    #[test]
    fn spawn_failure_is_recorded_in_status() {
        let p = unit("s_command = /nonexistent/cyberdeck-test-binary\n");
        assert!(matches!(p.start_process(), Err(DeckError::Process(_))));
        assert!(p.status()["last_error"].as_str().unwrap().starts_with("ProcessError"));
    }

    #[tokio::test]
    async fn loop_autostarts_and_stops_on_cancel() {
        let p = unit("s_command = sleep\nl_args = [\"30\"]\nb_autostart = yes\nf_poll_interval = 0.05\n");
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let p = Arc::clone(&p);
            let cancel = cancel.clone();
            async move { p.run(cancel).await }
        });

        time::sleep(Duration::from_millis(100)).await;
        assert!(p.is_running());
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(!p.is_running());
    }

    #[tokio::test]
    async fn loop_restarts_exited_process() {
        let p = unit("s_command = true\nb_autostart = yes\nb_restart = yes\nf_poll_interval = 0.02\n");
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let p = Arc::clone(&p);
            let cancel = cancel.clone();
            async move { p.run(cancel).await }
        });

        time::sleep(Duration::from_millis(300)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert!(p.child.starts() > 1);
    }

    #[tokio::test]
    async fn exited_process_without_restart_is_not_wanted() {
        let p = unit("s_command = true\nb_autostart = yes\nf_poll_interval = 0.02\n");
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let p = Arc::clone(&p);
            let cancel = cancel.clone();
            async move { p.run(cancel).await }
        });

        time::sleep(Duration::from_millis(200)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(p.child.starts(), 1);
        assert_eq!(p.status()["wanted"], json!(false));
    }
}
