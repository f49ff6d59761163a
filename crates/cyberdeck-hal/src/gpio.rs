//! Digital output pins used to switch peripheral power rails.

use std::fs;
use std::io;
use std::path::PathBuf;

/// A bank of digital GPIO pins, addressed by BCM number.
///
/// Methods take `&self`; implementations handle their own synchronisation so
/// one driver can be shared by every subsystem.
pub trait PinDriver: Send + Sync {
    /// Claim `pin` and set it up as an output.
    fn configure_output(&self, pin: u32) -> io::Result<()>;

    /// Drive `pin` high or low.
    fn write(&self, pin: u32, high: bool) -> io::Result<()>;

    /// Read back the current level of `pin`.
    fn read(&self, pin: u32) -> io::Result<bool>;
}

/// Pins exposed through the Linux sysfs GPIO interface
/// (`/sys/class/gpio/gpioN/{direction,value}`).
pub struct SysfsPins {
    root: PathBuf,
}

impl SysfsPins {
    /// Open the GPIO class directory at `root`.
    ///
    /// # Errors
    ///
    /// Fails when `root` does not exist, so a missing GPIO subsystem stops the
    /// daemon at startup instead of at the first power command.
    pub fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("gpio root {} does not exist", root.display()),
            ));
        }
        Ok(Self { root })
    }

    fn pin_dir(&self, pin: u32) -> PathBuf {
        self.root.join(format!("gpio{pin}"))
    }
}

impl PinDriver for SysfsPins {
    fn configure_output(&self, pin: u32) -> io::Result<()> {
        if !self.pin_dir(pin).exists() {
            fs::write(self.root.join("export"), pin.to_string())?;
        }
        fs::write(self.pin_dir(pin).join("direction"), "out")
    }

    fn write(&self, pin: u32, high: bool) -> io::Result<()> {
        fs::write(self.pin_dir(pin).join("value"), if high { "1" } else { "0" })
    }

    fn read(&self, pin: u32) -> io::Result<bool> {
        let raw = fs::read_to_string(self.pin_dir(pin).join("value"))?;
        Ok(raw.trim() == "1")
    }
}
