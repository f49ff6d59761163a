//! [`HardwareContext`] – the hardware handles shared by every subsystem.
//!
//! Built once by the top-level process and handed by reference to every
//! subsystem constructor and to the heartbeat controller.  Nothing in the
//! workspace reaches hardware through a global.

use std::path::Path;
use std::sync::Arc;

use cyberdeck_types::DeckError;
use tracing::info;

use crate::bus::SharedBus;
use crate::gpio::{PinDriver, SysfsPins};
use crate::linux_i2c::LinuxI2cBus;
use crate::sim::{SimBus, SimPins};

/// Shared I²C bus plus GPIO pin driver.
#[derive(Clone)]
pub struct HardwareContext {
    bus: SharedBus,
    pins: Arc<dyn PinDriver>,
}

impl HardwareContext {
    /// Assemble a context from already-open backends.
    pub fn new(bus: SharedBus, pins: Arc<dyn PinDriver>) -> Self {
        Self { bus, pins }
    }

    /// Open the real bus at `i2c_path` and the sysfs GPIO tree at `gpio_root`.
    ///
    /// # Errors
    ///
    /// Returns [`DeckError::HardwareIo`] if either cannot be acquired.  The
    /// caller must treat this as fatal: no subsystem is built on a partial
    /// context.
    pub fn open(i2c_path: &Path, gpio_root: &Path) -> Result<Self, DeckError> {
        let bus = LinuxI2cBus::open(i2c_path)
            .map_err(|e| DeckError::hardware(i2c_path.display().to_string(), e))?;
        let pins = SysfsPins::open(gpio_root)
            .map_err(|e| DeckError::hardware(gpio_root.display().to_string(), e))?;
        info!(bus = %i2c_path.display(), gpio = %gpio_root.display(), "hardware context acquired");
        Ok(Self::new(SharedBus::new(bus), Arc::new(pins)))
    }

    /// A context backed by simulated hardware.
    pub fn simulated(bus: SimBus, pins: SimPins) -> Self {
        Self::new(SharedBus::new(bus), Arc::new(pins))
    }

    pub fn bus(&self) -> &SharedBus {
        &self.bus
    }

    pub fn pins(&self) -> &Arc<dyn PinDriver> {
        &self.pins
    }
}
