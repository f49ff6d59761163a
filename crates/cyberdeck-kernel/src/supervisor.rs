//! [`LifecycleSupervisor`] – starts and stops the subsystems' background
//! loops.
//!
//! Every subsystem exposing a [`BackgroundLoop`][cyberdeck_hal::BackgroundLoop]
//! gets one tokio task.  Starts are staggered so that drivers do not all hit
//! the bus in the same instant.  Shutdown cancels a single shared
//! [`CancellationToken`], so all loops observe it together, then joins every
//! task against one deadline and aborts any loop still running past it.
//!
//! Per-loop state:
//!
//! ```text
//! NotStarted ──start──▶ Running ──shutdown──▶ StopRequested ──exit/abort──▶ Stopped
//! ```
//!
//! A loop that returns on its own (error or not) goes straight to `Stopped`.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use cyberdeck_hal::Subsystem;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::registry::SubsystemRegistry;

/// Lifecycle state of one background loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopState {
    NotStarted,
    Running,
    StopRequested,
    Stopped,
}

/// Timing knobs for [`LifecycleSupervisor`].
#[derive(Debug, Clone, Copy)]
pub struct SupervisorConfig {
    /// Pause between consecutive loop starts.
    pub stagger: Duration,
    /// Longest wait for one loop to finish after cancellation.
    pub stop_timeout: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            stagger: Duration::from_millis(100),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
struct LoopRecord {
    id: String,
    state: LoopState,
    last_error: Option<String>,
}

type Records = Arc<Mutex<Vec<LoopRecord>>>;

fn lock(records: &Records) -> MutexGuard<'_, Vec<LoopRecord>> {
    records.lock().unwrap_or_else(PoisonError::into_inner)
}

fn set_state(records: &Records, index: usize, state: LoopState) {
    if let Some(record) = lock(records).get_mut(index) {
        record.state = state;
    }
}

pub struct LifecycleSupervisor {
    config: SupervisorConfig,
    subsystems: Vec<Arc<dyn Subsystem>>,
    records: Records,
    handles: Vec<(usize, JoinHandle<()>)>,
    cancel: CancellationToken,
}

impl LifecycleSupervisor {
    /// Track every subsystem of `registry` that has a background loop.
    pub fn new(registry: &SubsystemRegistry, config: SupervisorConfig) -> Self {
        let subsystems: Vec<Arc<dyn Subsystem>> = registry
            .iter()
            .filter(|s| s.as_background().is_some())
            .cloned()
            .collect();
        let records = subsystems
            .iter()
            .map(|s| LoopRecord {
                id: s.id().to_string(),
                state: LoopState::NotStarted,
                last_error: None,
            })
            .collect();
        Self {
            config,
            subsystems,
            records: Arc::new(Mutex::new(records)),
            handles: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// The token every loop observes.  Cancelling it is what
    /// [`shutdown`][Self::shutdown] does first.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawn every loop that has not been started, staggering the starts.
    pub async fn start(&mut self) {
        let mut first = true;
        for (index, subsystem) in self.subsystems.iter().enumerate() {
            if lock(&self.records)[index].state != LoopState::NotStarted {
                continue;
            }
            if !first && !self.config.stagger.is_zero() {
                tokio::time::sleep(self.config.stagger).await;
            }
            first = false;

            set_state(&self.records, index, LoopState::Running);
            info!(subsystem = subsystem.id(), "background loop started");
            let handle = tokio::spawn(run_loop(
                Arc::clone(subsystem),
                index,
                Arc::clone(&self.records),
                self.cancel.clone(),
            ));
            self.handles.push((index, handle));
        }
    }

    /// Cancel every loop and wait for each to finish, aborting stragglers.
    ///
    /// All loops share one `stop_timeout` deadline measured from the
    /// cancellation, so the wait does not grow with the number of loops.
    pub async fn shutdown(&mut self) {
        for record in lock(&self.records).iter_mut() {
            if record.state == LoopState::Running {
                record.state = LoopState::StopRequested;
            }
        }
        self.cancel.cancel();
        let deadline = tokio::time::Instant::now() + self.config.stop_timeout;

        for (index, mut handle) in self.handles.drain(..) {
            let id = lock(&self.records)[index].id.clone();
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!(subsystem = %id, error = %e, "background loop panicked");
                    if let Some(record) = lock(&self.records).get_mut(index) {
                        record.last_error = Some(e.to_string());
                    }
                }
                Err(_) => {
                    warn!(subsystem = %id, timeout = ?self.config.stop_timeout, "background loop did not stop in time, aborting");
                    handle.abort();
                }
            }
            set_state(&self.records, index, LoopState::Stopped);
        }
        info!("all background loops stopped");
    }

    /// State of the loop owned by subsystem `id`, if it has one.
    pub fn state(&self, id: &str) -> Option<LoopState> {
        lock(&self.records).iter().find(|r| r.id == id).map(|r| r.state)
    }

    /// Last error returned by the loop of subsystem `id`.
    pub fn last_error(&self, id: &str) -> Option<String> {
        lock(&self.records)
            .iter()
            .find(|r| r.id == id)
            .and_then(|r| r.last_error.clone())
    }

    /// `(id, state)` for every tracked loop, in registry order.
    pub fn states(&self) -> Vec<(String, LoopState)> {
        lock(&self.records).iter().map(|r| (r.id.clone(), r.state)).collect()
    }
}

async fn run_loop(subsystem: Arc<dyn Subsystem>, index: usize, records: Records, cancel: CancellationToken) {
    let Some(background) = subsystem.as_background() else {
        set_state(&records, index, LoopState::Stopped);
        return;
    };
    let result = background.run(cancel).await;
    let mut guard = lock(&records);
    if let Some(record) = guard.get_mut(index) {
        if let Err(e) = result {
            warn!(subsystem = %record.id, error = %e, "background loop failed");
            record.last_error = Some(e.to_string());
        } else {
            info!(subsystem = %record.id, "background loop finished");
        }
        record.state = LoopState::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use cyberdeck_hal::BackgroundLoop;
    use cyberdeck_types::{DeckError, SubsystemKind};
    use tokio::time::{Instant, interval};

    const TICK: Duration = Duration::from_millis(100);

    enum Behaviour {
        Ticking,
        Failing,
        Stubborn,
    }

    struct Mock {
        id: String,
        behaviour: Behaviour,
    }

    #[async_trait]
    impl BackgroundLoop for Mock {
        async fn run(&self, cancel: CancellationToken) -> Result<(), DeckError> {
            match self.behaviour {
                Behaviour::Ticking => {
                    let mut ticker = interval(TICK);
                    loop {
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(()),
                            _ = ticker.tick() => {}
                        }
                    }
                }
                Behaviour::Failing => Err(DeckError::Process(format!("{} crashed", self.id))),
                Behaviour::Stubborn => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }

    impl Subsystem for Mock {
        fn id(&self) -> &str {
            &self.id
        }
        fn kind(&self) -> SubsystemKind {
            SubsystemKind::Process
        }
        fn as_background(&self) -> Option<&dyn BackgroundLoop> {
            Some(self)
        }
    }

    struct Passive;

    impl Subsystem for Passive {
        fn id(&self) -> &str {
            "passive"
        }
        fn kind(&self) -> SubsystemKind {
            SubsystemKind::Device
        }
    }

    fn mock(id: &str, behaviour: Behaviour) -> Arc<dyn Subsystem> {
        Arc::new(Mock {
            id: id.to_string(),
            behaviour,
        })
    }

    fn config() -> SupervisorConfig {
        SupervisorConfig {
            stagger: Duration::from_millis(10),
            stop_timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn all_loops_stop_within_one_tick() {
        for count in [1usize, 8, 64] {
            let subsystems = (0..count).map(|i| mock(&format!("loop{i}"), Behaviour::Ticking)).collect();
            let registry = SubsystemRegistry::new(subsystems).unwrap();
            let mut sup = LifecycleSupervisor::new(&registry, config());
            sup.start().await;
            assert!(sup.states().iter().all(|(_, s)| *s == LoopState::Running));

            let begun = Instant::now();
            sup.shutdown().await;
            assert!(begun.elapsed() <= TICK, "{count} loops took {:?}", begun.elapsed());
            assert!(sup.states().iter().all(|(_, s)| *s == LoopState::Stopped));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn starts_are_staggered() {
        let registry = SubsystemRegistry::new(vec![
            mock("a", Behaviour::Ticking),
            mock("b", Behaviour::Ticking),
            mock("c", Behaviour::Ticking),
        ]).unwrap();
        let mut sup = LifecycleSupervisor::new(&registry, config());
        let begun = Instant::now();
        sup.start().await;
        assert_eq!(begun.elapsed(), Duration::from_millis(20));
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn only_background_subsystems_are_tracked() {
        let registry = SubsystemRegistry::new(vec![Arc::new(Passive) as Arc<dyn Subsystem>, mock("sdr", Behaviour::Ticking)]).unwrap();
        let mut sup = LifecycleSupervisor::new(&registry, config());
        assert_eq!(sup.state("passive"), None);
        assert_eq!(sup.state("sdr"), Some(LoopState::NotStarted));
        sup.start().await;
        assert_eq!(sup.state("sdr"), Some(LoopState::Running));
        sup.shutdown().await;
        assert_eq!(sup.state("sdr"), Some(LoopState::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_loop_is_recorded_and_others_continue() {
        let registry = SubsystemRegistry::new(vec![mock("bad", Behaviour::Failing), mock("good", Behaviour::Ticking)]).unwrap();
        let mut sup = LifecycleSupervisor::new(&registry, config());
        sup.start().await;
        tokio::time::sleep(TICK).await;

        assert_eq!(sup.state("bad"), Some(LoopState::Stopped));
        assert!(sup.last_error("bad").unwrap().contains("crashed"));
        assert_eq!(sup.state("good"), Some(LoopState::Running));
        sup.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_deadline_is_shared_by_stubborn_loops() {
        let registry = SubsystemRegistry::new(vec![
            mock("stuck0", Behaviour::Stubborn),
            mock("stuck1", Behaviour::Stubborn),
            mock("stuck2", Behaviour::Stubborn),
            mock("stuck3", Behaviour::Stubborn),
        ])
        .unwrap();
        let mut sup = LifecycleSupervisor::new(&registry, config());
        sup.start().await;

        let begun = Instant::now();
        sup.shutdown().await;
        assert!(begun.elapsed() < config().stop_timeout * 2, "took {:?}", begun.elapsed());
        assert!(sup.states().iter().all(|(_, s)| *s == LoopState::Stopped));
    }

    #[tokio::test(start_paused = true)]
    async fn stubborn_loop_is_aborted() {
        let registry = SubsystemRegistry::new(vec![mock("stuck", Behaviour::Stubborn), mock("ok", Behaviour::Ticking)]).unwrap();
        let mut sup = LifecycleSupervisor::new(&registry, config());
        sup.start().await;

        let begun = Instant::now();
        sup.shutdown().await;
        assert!(begun.elapsed() >= config().stop_timeout);
        assert!(begun.elapsed() < config().stop_timeout * 2);
        assert_eq!(sup.state("stuck"), Some(LoopState::Stopped));
        assert_eq!(sup.state("ok"), Some(LoopState::Stopped));
    }
}
