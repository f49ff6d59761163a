//! In-process simulated hardware for tests and hardware-less runs.
//!
//! [`SimBus`] stands in for the I²C bus and [`SimPins`] for the GPIO header.
//! Both are cheap to clone: all clones share state, so a test can keep one
//! handle for assertions while another is moved into a
//! [`HardwareContext`][crate::context::HardwareContext].
//!
//! # Example
//!
//! ```rust
//! use cyberdeck_hal::bus::SharedBus;
//! use cyberdeck_hal::sim::SimBus;
//!
//! let sim = SimBus::new().with_device(0x08, b"OK".to_vec());
//! let bus = SharedBus::new(sim.clone());
//! bus.device(0x08).write(&[0x33]).unwrap();
//! assert_eq!(sim.writes().len(), 1);
//! ```

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

use crate::bus::I2cBus;
use crate::gpio::PinDriver;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated bus
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimPeripheral {
    reply: Vec<u8>,
    fail: bool,
    delay: Option<Duration>,
}

#[derive(Default)]
struct SimBusState {
    peripherals: HashMap<u16, SimPeripheral>,
    writes: Vec<(u16, Vec<u8>)>,
}

/// A simulated I²C bus.  Writes to unknown addresses fail like a missing ACK.
#[derive(Clone, Default)]
pub struct SimBus {
    state: Arc<Mutex<SimBusState>>,
    bytewise: bool,
}

impl SimBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a peripheral at `addr` that answers every read with `reply`
    /// (zero-padded or truncated to the requested length).
    pub fn with_device(self, addr: u16, reply: Vec<u8>) -> Self {
        lock(&self.state).peripherals.insert(
            addr,
            SimPeripheral {
                reply,
                ..SimPeripheral::default()
            },
        );
        self
    }

    /// Record written bytes one at a time, yielding between them.  Makes
    /// unsynchronised concurrent access visible in [`writes`][Self::writes].
    pub fn bytewise(mut self) -> Self {
        self.bytewise = true;
        self
    }

    /// Make every transaction to `addr` fail (or succeed again).
    pub fn set_failing(&self, addr: u16, fail: bool) {
        if let Some(p) = lock(&self.state).peripherals.get_mut(&addr) {
            p.fail = fail;
        }
    }

    /// Delay every transaction to `addr`, simulating clock stretching.
    pub fn set_delay(&self, addr: u16, delay: Duration) {
        if let Some(p) = lock(&self.state).peripherals.get_mut(&addr) {
            p.delay = Some(delay);
        }
    }

    /// Every completed write so far, in order.
    pub fn writes(&self) -> Vec<(u16, Vec<u8>)> {
        lock(&self.state).writes.clone()
    }

    fn check(&self, addr: u16) -> io::Result<()> {
        let delay = {
            let state = lock(&self.state);
            match state.peripherals.get(&addr) {
                None => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotFound,
                        format!("no device acknowledged address 0x{addr:02x}"),
                    ));
                }
                Some(p) if p.fail => {
                    return Err(io::Error::other("simulated bus fault"));
                }
                Some(p) => p.delay,
            }
        };
        if let Some(d) = delay {
            thread::sleep(d);
        }
        Ok(())
    }

    fn record(&self, addr: u16, data: &[u8]) {
        if !self.bytewise {
            lock(&self.state).writes.push((addr, data.to_vec()));
            return;
        }
        lock(&self.state).writes.push((addr, Vec::with_capacity(data.len())));
        for &b in data {
            thread::yield_now();
            if let Some((_, frame)) = lock(&self.state).writes.last_mut() {
                frame.push(b);
            }
        }
    }
}

impl I2cBus for SimBus {
    fn name(&self) -> &str {
        "sim-i2c"
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> io::Result<()> {
        self.check(addr)?;
        self.record(addr, data);
        Ok(())
    }

    fn write_read(&mut self, addr: u16, out: &[u8], input: &mut [u8]) -> io::Result<()> {
        self.check(addr)?;
        self.record(addr, out);
        let state = lock(&self.state);
        let reply = state
            .peripherals
            .get(&addr)
            .map(|p| p.reply.as_slice())
            .unwrap_or_default();
        for (i, slot) in input.iter_mut().enumerate() {
            *slot = reply.get(i).copied().unwrap_or(0);
        }
        Ok(())
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated pins
// ────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct SimPinState {
    outputs: HashMap<u32, bool>,
    failing: Vec<u32>,
}

/// A simulated GPIO header that remembers the last level written to each pin.
#[derive(Clone, Default)]
pub struct SimPins {
    state: Arc<Mutex<SimPinState>>,
}

impl SimPins {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation on `pin` fail.
    pub fn fail_pin(&self, pin: u32) {
        lock(&self.state).failing.push(pin);
    }

    /// The last level written to `pin`, if it was configured.
    pub fn level(&self, pin: u32) -> Option<bool> {
        lock(&self.state).outputs.get(&pin).copied()
    }

    fn check(&self, pin: u32) -> io::Result<()> {
        if lock(&self.state).failing.contains(&pin) {
            return Err(io::Error::other(format!("simulated fault on gpio{pin}")));
        }
        Ok(())
    }
}

impl PinDriver for SimPins {
    fn configure_output(&self, pin: u32) -> io::Result<()> {
        self.check(pin)?;
        lock(&self.state).outputs.entry(pin).or_insert(false);
        Ok(())
    }

    fn write(&self, pin: u32, high: bool) -> io::Result<()> {
        self.check(pin)?;
        let mut state = lock(&self.state);
        match state.outputs.get_mut(&pin) {
            Some(level) => {
                *level = high;
                Ok(())
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("gpio{pin} is not configured as an output"),
            )),
        }
    }

    fn read(&self, pin: u32) -> io::Result<bool> {
        self.check(pin)?;
        Ok(self.level(pin).unwrap_or(false))
    }
}
