//! Linux `i2c-dev` backend (`/dev/i2c-N`).

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::bus::I2cBus;

/// `ioctl` request selecting the peripheral address for subsequent
/// reads and writes on an i2c-dev file descriptor.
const I2C_SLAVE: libc::c_ulong = 0x0703;

/// An open `/dev/i2c-N` character device.
pub struct LinuxI2cBus {
    name: String,
    file: File,
    selected: Option<u16>,
}

impl LinuxI2cBus {
    /// Open the bus device at `path`.
    ///
    /// # Errors
    ///
    /// Any error opening the character device (missing module, permissions).
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Ok(Self {
            name: path.display().to_string(),
            file,
            selected: None,
        })
    }

    fn select(&mut self, addr: u16) -> io::Result<()> {
        if self.selected == Some(addr) {
            return Ok(());
        }
        // SAFETY: the fd is owned by `self.file` and stays open for the call;
        // I2C_SLAVE takes the address by value and touches no memory.
        let rc = unsafe {
            libc::ioctl(self.file.as_raw_fd(), I2C_SLAVE as _, libc::c_ulong::from(addr))
        };
        if rc < 0 {
            self.selected = None;
            return Err(io::Error::last_os_error());
        }
        self.selected = Some(addr);
        Ok(())
    }
}

impl I2cBus for LinuxI2cBus {
    fn name(&self) -> &str {
        &self.name
    }

    fn write(&mut self, addr: u16, data: &[u8]) -> io::Result<()> {
        self.select(addr)?;
        self.file.write_all(data)
    }

    fn write_read(&mut self, addr: u16, out: &[u8], input: &mut [u8]) -> io::Result<()> {
        self.select(addr)?;
        self.file.write_all(out)?;
        self.file.read_exact(input)
    }
}
