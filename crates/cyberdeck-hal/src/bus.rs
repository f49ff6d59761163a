//! Shared I²C bus access.
//!
//! All subsystems on the control unit talk to their peripherals over one
//! physical I²C bus.  [`SharedBus`] is the single handle to it: every
//! transaction (a write, or a write followed by a read) holds the bus lock
//! for its full duration, so two subsystems can never interleave bytes on the
//! wire.  [`I2cDevice`] binds a bus handle to one 7-bit peripheral address.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use cyberdeck_types::DeckError;

/// A raw I²C bus backend.
///
/// Implementations only need to move bytes; locking is provided by
/// [`SharedBus`].
pub trait I2cBus: Send {
    /// Human-readable bus name used in error messages, e.g. `"/dev/i2c-1"`.
    fn name(&self) -> &str;

    /// Write `data` to the peripheral at `addr`.
    fn write(&mut self, addr: u16, data: &[u8]) -> io::Result<()>;

    /// Write `out` to `addr`, then read exactly `input.len()` bytes back.
    fn write_read(&mut self, addr: u16, out: &[u8], input: &mut [u8]) -> io::Result<()>;
}

/// Cloneable, mutex-serialized handle to one physical bus.
#[derive(Clone)]
pub struct SharedBus {
    inner: Arc<Mutex<Box<dyn I2cBus>>>,
}

impl SharedBus {
    /// Take ownership of `bus`.
    pub fn new(bus: impl I2cBus + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Box::new(bus))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Box<dyn I2cBus>> {
        // A panic while holding the lock cannot leave the bus in a state we
        // could repair here; keep using it.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Name of the underlying bus.
    pub fn name(&self) -> String {
        self.lock().name().to_string()
    }

    /// Write `data` to `addr` as one uninterrupted transaction.
    ///
    /// # Errors
    ///
    /// Returns [`DeckError::HardwareIo`] when the backend reports an error.
    pub fn write(&self, addr: u16, data: &[u8]) -> Result<(), DeckError> {
        let mut bus = self.lock();
        bus.write(addr, data)
            .map_err(|e| DeckError::hardware(format!("{}@0x{addr:02x}", bus.name()), e))
    }

    /// Write `out` then read into `input` without releasing the bus between
    /// the two halves.
    ///
    /// # Errors
    ///
    /// Returns [`DeckError::HardwareIo`] when either half fails.
    pub fn write_read(&self, addr: u16, out: &[u8], input: &mut [u8]) -> Result<(), DeckError> {
        let mut bus = self.lock();
        bus.write_read(addr, out, input)
            .map_err(|e| DeckError::hardware(format!("{}@0x{addr:02x}", bus.name()), e))
    }

    /// A handle addressing the peripheral at `addr`.
    pub fn device(&self, addr: u16) -> I2cDevice {
        I2cDevice {
            bus: self.clone(),
            addr,
        }
    }
}

/// A peripheral at a fixed address on a [`SharedBus`].
#[derive(Clone)]
pub struct I2cDevice {
    bus: SharedBus,
    addr: u16,
}

impl I2cDevice {
    pub fn address(&self) -> u16 {
        self.addr
    }

    pub fn write(&self, data: &[u8]) -> Result<(), DeckError> {
        self.bus.write(self.addr, data)
    }

    pub fn write_then_read(&self, out: &[u8], input: &mut [u8]) -> Result<(), DeckError> {
        self.bus.write_read(self.addr, out, input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimBus;
    use std::thread;

    #[test]
    fn device_writes_reach_the_bus() {
        let sim = SimBus::new().with_device(0x08, b"OK".to_vec());
        let bus = SharedBus::new(sim.clone());
        bus.device(0x08).write(&[1, 2, 3]).unwrap();
        assert_eq!(sim.writes(), vec![(0x08, vec![1, 2, 3])]);
    }

    #[test]
    fn write_read_returns_reply() {
        let sim = SimBus::new().with_device(0x08, b"OK".to_vec());
        let dev = SharedBus::new(sim).device(0x08);
        let mut reply = [0u8; 2];
        dev.write_then_read(&[0xFF, 0x00, 0xFF, 0x00], &mut reply).unwrap();
        assert_eq!(&reply, b"OK");
    }

    #[test]
    fn missing_peripheral_is_hardware_error() {
        let bus = SharedBus::new(SimBus::new());
        let err = bus.write(0x40, &[0]).unwrap_err();
        assert!(matches!(err, DeckError::HardwareIo { .. }));
        assert!(err.to_string().contains("0x40"));
    }

    #[test]
    fn concurrent_transactions_never_interleave() {
        // The sim bus appends each byte of a write separately, so an unlocked
        // bus would show mixed frames in the log.
        let sim = SimBus::new()
            .with_device(0x10, Vec::new())
            .with_device(0x20, Vec::new())
            .bytewise();
        let bus = SharedBus::new(sim.clone());

        let handles: Vec<_> = [(0x10u16, 0xAAu8), (0x20, 0x55)]
            .into_iter()
            .map(|(addr, byte)| {
                let dev = bus.device(addr);
                thread::spawn(move || {
                    for _ in 0..200 {
                        dev.write(&[byte; 16]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let frames = sim.writes();
        assert_eq!(frames.len(), 400);
        for (addr, frame) in frames {
            let expected = if addr == 0x10 { 0xAA } else { 0x55 };
            assert_eq!(frame.len(), 16);
            assert!(frame.iter().all(|&b| b == expected), "interleaved frame {frame:?}");
        }
    }
}
