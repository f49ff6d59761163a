//! `cyberdeck-hal` – Hardware Abstraction Layer
//!
//! Everything that touches the deck's hardware or external programs.
//!
//! # Modules
//!
//! - [`bus`] – [`I2cBus`][bus::I2cBus] backends behind a
//!   [`SharedBus`][bus::SharedBus] that serializes whole transactions, and
//!   [`I2cDevice`][bus::I2cDevice] handles bound to one address.
//! - [`linux_i2c`] – the `/dev/i2c-N` backend.
//! - [`gpio`] – [`PinDriver`][gpio::PinDriver] and the sysfs implementation.
//! - [`sim`] – simulated bus and pins for hardware-less runs and tests.
//! - [`context`] – [`HardwareContext`]: the bus and pins shared by every
//!   subsystem, built once by the top-level process.
//! - [`subsystem`] – the [`Subsystem`] trait and one trait per capability.
//! - [`drivers`] – concrete subsystems and the section → driver factory.

pub mod bus;
pub mod context;
pub mod drivers;
pub mod gpio;
pub mod linux_i2c;
pub mod sim;
pub mod subsystem;

pub use bus::{I2cBus, I2cDevice, SharedBus};
pub use context::HardwareContext;
pub use drivers::build;
pub use gpio::{PinDriver, SysfsPins};
pub use sim::{SimBus, SimPins};
pub use subsystem::{
    BackgroundLoop, BrightnessControl, Configurable, HostControl, PowerControllable, ProcessControllable,
    RadioTuning, StatusReporting, Subsystem, VolumeControl,
};
