//! `cyberdeck-kernel` – Command Routing & Orchestration
//!
//! Owns the live subsystems and everything that acts on them as a whole.
//!
//! # Modules
//!
//! - [`registry`] – [`SubsystemRegistry`][registry::SubsystemRegistry]:
//!   the ordered set of subsystems built from the configuration document,
//!   with the aggregate `status` / `config` / `configstatus` views and
//!   persistence of every live configuration.
//! - [`dispatcher`] – [`Dispatcher`][dispatcher::Dispatcher]:
//!   resolves `(subsystem id, operation, args)` commands against the closed
//!   [`Operation`][cyberdeck_types::Operation] vocabulary and each
//!   subsystem's declared capabilities, always answering with an
//!   [`Envelope`][cyberdeck_types::Envelope].
//! - [`supervisor`] – [`LifecycleSupervisor`][supervisor::LifecycleSupervisor]:
//!   runs every background loop as a tokio task with staggered starts and a
//!   bounded, cancellation-driven shutdown.
//! - [`heartbeat`] – [`HeartbeatController`][heartbeat::HeartbeatController]:
//!   probes the power-management microcontroller and sends it periodic
//!   position or time-sync packets.

pub mod dispatcher;
pub mod heartbeat;
pub mod registry;
pub mod supervisor;

pub use dispatcher::Dispatcher;
pub use heartbeat::{HeartbeatConfig, HeartbeatController, HeartbeatParam};
pub use registry::SubsystemRegistry;
pub use supervisor::{LifecycleSupervisor, LoopState, SupervisorConfig};
