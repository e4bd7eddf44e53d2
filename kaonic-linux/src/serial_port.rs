//! Poll-driven tty port for the serial service.
//!
//! The port is used from two threads at once (the RX loop reads, the
//! radio listener writes); both go through the raw descriptor, so no
//! extra locking is needed beyond what the kernel provides.

use std::fs::OpenOptions;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use log::{error, info};

use kaonic::service::serial::SerialPort;
use kaonic::{Error, Result};

/// A character device opened for read and write.
pub struct TtyPort {
    file: Mutex<std::fs::File>,
    fd: i32,
}

impl TtyPort {
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|err| {
                error!("serial: unable to open {}: {}", path.display(), err);
                Error::Fail
            })?;
        info!("serial: opened {}", path.display());
        let fd = file.as_raw_fd();
        Ok(TtyPort {
            file: Mutex::new(file),
            fd,
        })
    }

    fn poll_readable(&self, timeout: Duration) -> Result<bool> {
        let mut pollfd = libc::pollfd {
            fd: self.fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

        // SAFETY: the descriptor outlives the call; it is owned by
        // `self.file`.
        let ready = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };
        match ready {
            0 => Ok(false),
            n if n > 0 => Ok(true),
            _ => {
                let err = std::io::Error::last_os_error();
                if err.kind() == std::io::ErrorKind::Interrupted {
                    return Ok(false);
                }
                error!("serial: poll failed: {}", err);
                Err(Error::Fail)
            }
        }
    }
}

impl SerialPort for TtyPort {
    fn read_byte(&self, timeout: Duration) -> Result<Option<u8>> {
        if !self.poll_readable(timeout)? {
            return Ok(None);
        }

        let mut byte = [0u8; 1];
        // SAFETY: reading one byte into a valid local buffer.
        let n = unsafe { libc::read(self.fd, byte.as_mut_ptr().cast(), 1) };
        match n {
            1 => Ok(Some(byte[0])),
            0 => Ok(None),
            _ => {
                error!(
                    "serial: read failed: {}",
                    std::io::Error::last_os_error()
                );
                Err(Error::Fail)
            }
        }
    }

    fn write_all(&self, data: &[u8]) -> Result<()> {
        let Ok(mut file) = self.file.lock() else {
            return Err(Error::Fail);
        };
        file.write_all(data).map_err(|err| {
            error!("serial: write failed: {}", err);
            Error::Fail
        })
    }
}
