//! [`HeartbeatController`] – periodic packets to the power-management
//! microcontroller on the I²C bus.
//!
//! The microcontroller watches for these packets to know the deck is alive.
//! Two packet kinds exist, chosen by the configured parameter id:
//!
//! | Param  | Packet                                                     |
//! |--------|------------------------------------------------------------|
//! | `0x53` | text `"51;83;{lat};{lon}"` (position report)               |
//! | `0x54` | `[0x33, 0x54, h, m, s, year-2000, month, day]` (UTC time)  |
//!
//! [`probe`][HeartbeatController::probe] checks whether the microcontroller
//! is present: it answers `[0xFF, 0x00, 0xFF, 0x00]` with ASCII `"OK"`.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Datelike, Timelike, Utc};
use cyberdeck_hal::I2cDevice;
use cyberdeck_types::DeckError;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Command byte opening every heartbeat packet.
pub const CMD_ID: u8 = 0x33;
/// Parameter id of the position report.
pub const PARAM_POSITION: u8 = 0x53;
/// Parameter id of the time-sync frame.
pub const PARAM_TIME_SYNC: u8 = 0x54;
/// Presence probe written to the microcontroller.
pub const PROBE: [u8; 4] = [0xFF, 0x00, 0xFF, 0x00];
/// Expected answer to [`PROBE`].
pub const PROBE_REPLY: &[u8; 2] = b"OK";

/// Packet kind selected by the configured parameter id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatParam {
    Position,
    TimeSync,
}

impl TryFrom<u8> for HeartbeatParam {
    type Error = DeckError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            PARAM_POSITION => Ok(Self::Position),
            PARAM_TIME_SYNC => Ok(Self::TimeSync),
            other => Err(DeckError::Config(format!("unknown heartbeat parameter id 0x{other:02x}"))),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub param_id: u8,
    pub interval: Duration,
    pub probe_timeout: Duration,
    pub latitude: f64,
    pub longitude: f64,
    /// Transmit from the first tick.  Off by default: packets flow only after
    /// [`HeartbeatController::enable`].
    pub start_enabled: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            param_id: PARAM_TIME_SYNC,
            interval: Duration::from_secs(5),
            probe_timeout: Duration::from_millis(500),
            latitude: 0.0,
            longitude: 0.0,
            start_enabled: false,
        }
    }
}

/// `[CMD_ID, PARAM_TIME_SYNC, hour, minute, second, year-2000, month, day]`.
///
/// Years outside 2000–2255 are clamped into the single year byte.
pub fn time_sync_frame(now: DateTime<Utc>) -> [u8; 8] {
    let year = (now.year() - 2000).clamp(0, i32::from(u8::MAX));
    [
        CMD_ID,
        PARAM_TIME_SYNC,
        now.hour() as u8,
        now.minute() as u8,
        now.second() as u8,
        year as u8,
        now.month() as u8,
        now.day() as u8,
    ]
}

/// `"{cmd};{param};{lat};{lon}"` with the ids in decimal.
///
/// Whole-number coordinates keep one decimal place (`50.0`, not `50`).
pub fn position_frame(latitude: f64, longitude: f64) -> Vec<u8> {
    format!("{CMD_ID};{PARAM_POSITION};{};{}", coordinate(latitude), coordinate(longitude)).into_bytes()
}

fn coordinate(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

pub struct HeartbeatController {
    device: I2cDevice,
    param: HeartbeatParam,
    config: HeartbeatConfig,
    enabled: AtomicBool,
}

impl HeartbeatController {
    /// Transmission starts as `config.start_enabled` says.
    ///
    /// # Errors
    ///
    /// [`DeckError::Config`] for a parameter id other than `0x53` / `0x54`.
    pub fn new(device: I2cDevice, config: HeartbeatConfig) -> Result<Self, DeckError> {
        Ok(Self {
            param: HeartbeatParam::try_from(config.param_id)?,
            device,
            config,
            enabled: AtomicBool::new(config.start_enabled),
        })
    }

    pub fn param(&self) -> HeartbeatParam {
        self.param
    }

    pub fn enable(&self) {
        if !self.enabled.swap(true, Ordering::SeqCst) {
            info!(addr = self.device.address(), "heartbeat enabled");
        }
    }

    pub fn disable(&self) {
        if self.enabled.swap(false, Ordering::SeqCst) {
            info!(addr = self.device.address(), "heartbeat disabled");
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Packet for the configured parameter at time `now`.
    pub fn packet(&self, now: DateTime<Utc>) -> Vec<u8> {
        match self.param {
            HeartbeatParam::Position => position_frame(self.config.latitude, self.config.longitude),
            HeartbeatParam::TimeSync => time_sync_frame(now).to_vec(),
        }
    }

    /// Whether the microcontroller answers the presence probe.
    ///
    /// Bounded by the configured probe timeout; a timeout or bus error both
    /// read as `false`.
    pub async fn probe(&self) -> bool {
        let device = self.device.clone();
        let exchange = tokio::task::spawn_blocking(move || {
            let mut reply = [0u8; 2];
            device.write_then_read(&PROBE, &mut reply).map(|()| reply)
        });
        match time::timeout(self.config.probe_timeout, exchange).await {
            Ok(Ok(Ok(reply))) => {
                let present = &reply == PROBE_REPLY;
                debug!(addr = self.device.address(), present, "heartbeat probe");
                present
            }
            Ok(Ok(Err(e))) => {
                debug!(addr = self.device.address(), error = %e, "heartbeat probe failed");
                false
            }
            Ok(Err(e)) => {
                warn!(error = %e, "heartbeat probe task failed");
                false
            }
            Err(_) => {
                debug!(addr = self.device.address(), "heartbeat probe timed out");
                false
            }
        }
    }

    /// Build and write one packet.
    pub async fn send(&self) -> Result<(), DeckError> {
        let packet = self.packet(Utc::now());
        let device = self.device.clone();
        debug!(addr = device.address(), bytes = packet.len(), "heartbeat packet");
        tokio::task::spawn_blocking(move || device.write(&packet))
            .await
            .map_err(|e| DeckError::hardware("heartbeat", e))?
    }

    /// Run the transmit loop until `cancel` fires.
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = time::interval(self.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(addr = self.device.address(), param = ?self.param, "heartbeat running");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if !self.is_enabled() {
                            continue;
                        }
                        if let Err(e) = self.send().await {
                            warn!(error = %e, "heartbeat write failed");
                        }
                    }
                }
            }
            info!("heartbeat stopped");
        })
    }
}
