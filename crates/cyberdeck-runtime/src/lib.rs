//! `cyberdeck-runtime` – Process Wiring
//!
//! Turns settings into a running supervisor and back down again.
//!
//! # Modules
//!
//! - [`daemon`] – [`Daemon`][daemon::Daemon]: boots the hardware context,
//!   the subsystem registry, the lifecycle supervisor and the heartbeat, and
//!   shuts them down in reverse order.
//! - [`telemetry`] – [`init_tracing`][telemetry::init_tracing]: installs the
//!   global `tracing` subscriber with an optional OTLP span exporter.  Set
//!   `OTEL_EXPORTER_OTLP_ENDPOINT` to enable export and
//!   `CYBERDECK_LOG_FORMAT=json` for JSON log lines.

pub mod daemon;
pub mod telemetry;

pub use daemon::{Daemon, DaemonConfig, DaemonError, HeartbeatSetup};
pub use telemetry::{TracerProviderGuard, init_tracing};
