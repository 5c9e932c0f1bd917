//! [`BusCommunicator`] – serialized access to the shared I²C bus.
//!
//! Power motors, analog sensors, encoders and the battery monitor all live
//! behind one microcontroller on a single I²C bus.  The bus cannot multiplex,
//! so every [`BusTransaction`] holds the communicator's lock for its whole
//! round trip: the command write and, when a response is expected, the read
//! that follows it.
//!
//! Transport failures are reported as [`BrickError::Bus`] and logged here;
//! device drivers turn them into last-known values so the control loop keeps
//! running with a faulted peripheral.

use std::sync::{Mutex, PoisonError};

use brick_types::BrickError;
use tracing::{trace, warn};

/// One request/response exchange on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusTransaction {
    /// 7-bit device address.
    pub address: u16,
    /// Command (register) code written first.
    pub command: u8,
    /// Bytes written after the command code.
    pub payload: Vec<u8>,
    /// Number of response bytes to read back; `0` for pure writes.
    pub response_len: usize,
}

impl BusTransaction {
    /// A write-only transaction.
    pub fn write(address: u16, command: u8, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            address,
            command,
            payload: payload.into(),
            response_len: 0,
        }
    }

    /// A transaction that writes `command` and reads `response_len` bytes back.
    pub fn read(address: u16, command: u8, response_len: usize) -> Self {
        Self {
            address,
            command,
            payload: Vec::new(),
            response_len,
        }
    }
}

/// Physical (or simulated) bus access.
///
/// Implementations never see two transactions at once: the
/// [`BusCommunicator`] serializes every call to [`BusTransport::transfer`].
pub trait BusTransport: Send {
    /// Perform `transaction` and return exactly `response_len` bytes.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Bus`] when the device does not answer or the
    /// underlying I/O fails.
    fn transfer(&mut self, transaction: &BusTransaction) -> Result<Vec<u8>, BrickError>;
}

/// Transport used when the bus device could not be opened.  Every transaction
/// fails, which bus-backed devices already tolerate.
#[derive(Debug)]
pub struct OfflineTransport {
    reason: String,
}

impl OfflineTransport {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl BusTransport for OfflineTransport {
    fn transfer(&mut self, transaction: &BusTransaction) -> Result<Vec<u8>, BrickError> {
        Err(BrickError::Bus {
            address: transaction.address,
            details: format!("bus offline: {}", self.reason),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Linux i2c-dev transport
// ────────────────────────────────────────────────────────────────────────────

#[cfg(unix)]
pub use linux::I2cDevice;

#[cfg(unix)]
mod linux {
    use std::fs::{File, OpenOptions};
    use std::io::{Read, Write};
    use std::os::unix::io::AsRawFd;
    use std::path::{Path, PathBuf};

    use brick_types::BrickError;

    use super::{BusTransaction, BusTransport};

    /// `ioctl` request selecting the slave address on an i2c-dev descriptor.
    const I2C_SLAVE: libc::c_ulong = 0x0703;

    /// An open `/dev/i2c-N` character device.
    #[derive(Debug)]
    pub struct I2cDevice {
        path: PathBuf,
        file: File,
        selected: Option<u16>,
    }

    impl I2cDevice {
        /// Open the bus device at `path`.
        ///
        /// # Errors
        ///
        /// Returns [`BrickError::Io`] when the device file cannot be opened.
        pub fn open(path: impl AsRef<Path>) -> Result<Self, BrickError> {
            let path = path.as_ref().to_path_buf();
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .open(&path)
                .map_err(|e| BrickError::io(path.display(), e))?;
            Ok(Self {
                path,
                file,
                selected: None,
            })
        }

        fn select(&mut self, address: u16) -> Result<(), BrickError> {
            if self.selected == Some(address) {
                return Ok(());
            }
            // SAFETY: the descriptor is owned by `self.file` and stays open for
            // the duration of the call; I2C_SLAVE takes the address by value.
            let rc = unsafe {
                libc::ioctl(
                    self.file.as_raw_fd(),
                    I2C_SLAVE as _,
                    libc::c_ulong::from(address),
                )
            };
            if rc < 0 {
                self.selected = None;
                return Err(BrickError::Bus {
                    address,
                    details: format!(
                        "cannot select device on {}: {}",
                        self.path.display(),
                        std::io::Error::last_os_error()
                    ),
                });
            }
            self.selected = Some(address);
            Ok(())
        }
    }

    impl BusTransport for I2cDevice {
        fn transfer(&mut self, transaction: &BusTransaction) -> Result<Vec<u8>, BrickError> {
            let address = transaction.address;
            let bus_err = |e: std::io::Error| BrickError::Bus {
                address,
                details: e.to_string(),
            };

            self.select(address)?;

            let mut frame = Vec::with_capacity(1 + transaction.payload.len());
            frame.push(transaction.command);
            frame.extend_from_slice(&transaction.payload);
            self.file.write_all(&frame).map_err(bus_err)?;

            let mut response = vec![0u8; transaction.response_len];
            if !response.is_empty() {
                self.file.read_exact(&mut response).map_err(bus_err)?;
            }
            Ok(response)
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// BusCommunicator
// ────────────────────────────────────────────────────────────────────────────

/// Process-wide gate in front of the shared bus.
///
/// The brick creates exactly one communicator and hands an
/// `Arc<BusCommunicator>` to every bus-backed device.
pub struct BusCommunicator {
    transport: Mutex<Box<dyn BusTransport>>,
}

impl BusCommunicator {
    /// Wrap an already opened transport.
    pub fn new(transport: Box<dyn BusTransport>) -> Self {
        Self {
            transport: Mutex::new(transport),
        }
    }

    /// Open the i2c-dev bus at `path`.
    ///
    /// A bus that cannot be opened is not fatal: the failure is logged and
    /// the communicator falls back to an [`OfflineTransport`].
    pub fn open(path: &str) -> Self {
        #[cfg(unix)]
        let opened = I2cDevice::open(path).map(|dev| Box::new(dev) as Box<dyn BusTransport>);
        #[cfg(not(unix))]
        let opened: Result<Box<dyn BusTransport>, BrickError> = Err(BrickError::Io {
            path: path.to_string(),
            details: "i2c-dev is only available on unix".to_string(),
        });

        match opened {
            Ok(transport) => Self::new(transport),
            Err(e) => {
                warn!(path, error = %e, "bus unavailable, bus-backed devices will report stale values");
                Self::new(Box::new(OfflineTransport::new(e.to_string())))
            }
        }
    }

    /// Run one transaction with exclusive access to the bus.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Bus`] on transport failure.  The error is also
    /// logged here, so callers only need to pick a fallback value.
    pub fn request(&self, transaction: &BusTransaction) -> Result<Vec<u8>, BrickError> {
        // A panic inside a transport leaves no partial state worth protecting.
        let mut transport = self
            .transport
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        trace!(
            address = transaction.address,
            command = transaction.command,
            "bus transaction"
        );
        let result = transport.transfer(transaction).and_then(|response| {
            if response.len() == transaction.response_len {
                Ok(response)
            } else {
                Err(BrickError::Bus {
                    address: transaction.address,
                    details: format!(
                        "expected {} response bytes, got {}",
                        transaction.response_len,
                        response.len()
                    ),
                })
            }
        });
        if let Err(e) = &result {
            warn!(
                address = transaction.address,
                command = transaction.command,
                error = %e,
                "bus transaction failed"
            );
        }
        result
    }

    /// Write `payload` after `command`.
    pub fn write(&self, address: u16, command: u8, payload: &[u8]) -> Result<(), BrickError> {
        self.request(&BusTransaction::write(address, command, payload))
            .map(|_| ())
    }

    /// Read a little-endian 16-bit word from `command`.
    pub fn read_u16(&self, address: u16, command: u8) -> Result<u16, BrickError> {
        let bytes = self.request(&BusTransaction::read(address, command, 2))?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a little-endian 32-bit signed value from `command`.
    pub fn read_i32(&self, address: u16, command: u8) -> Result<i32, BrickError> {
        let bytes = self.request(&BusTransaction::read(address, command, 4))?;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{OverlapDetector, RecordingTransport};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn concurrent_requests_never_overlap() {
        let detector = OverlapDetector::new();
        let bus = Arc::new(BusCommunicator::new(Box::new(detector.clone())));

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    for _ in 0..25 {
                        if i % 2 == 0 {
                            bus.write(0x48, 0x14, &[50]).unwrap();
                        } else {
                            bus.read_u16(0x48, 0x25).unwrap();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert!(!detector.overlapped(), "transactions interleaved");
        assert_eq!(detector.completed(), 200);
    }

    #[test]
    fn read_u16_decodes_little_endian() {
        let transport = RecordingTransport::new();
        transport.respond(0x48, 0x25, vec![0x34, 0x12]);
        let bus = BusCommunicator::new(Box::new(transport.clone()));

        assert_eq!(bus.read_u16(0x48, 0x25).unwrap(), 0x1234);
        assert_eq!(
            transport.transactions(),
            vec![BusTransaction::read(0x48, 0x25, 2)]
        );
    }

    #[test]
    fn offline_transport_reports_bus_error() {
        let bus = BusCommunicator::new(Box::new(OfflineTransport::new("no device")));
        let err = bus.write(0x48, 0x14, &[0]).unwrap_err();
        assert!(matches!(err, BrickError::Bus { address: 0x48, .. }));
    }

    #[test]
    fn open_missing_device_falls_back_to_offline() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("i2c-9");
        let bus = BusCommunicator::open(&missing.to_string_lossy());
        assert!(bus.read_i32(0x48, 0x30).is_err());
    }
}
