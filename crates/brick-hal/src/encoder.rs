//! Bus-backed wheel encoder.

use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::config::EncoderConfig;
use crate::i2c::BusCommunicator;

/// Quadrature encoder counted by the peripheral microcontroller.
///
/// `reset` zeroes the count in software; the controller's own counter keeps
/// running.
pub struct Encoder {
    port: String,
    bus: Arc<BusCommunicator>,
    address: u16,
    command: u8,
    raw: AtomicI32,
    offset: AtomicI32,
}

impl Encoder {
    pub fn new(
        port: impl Into<String>,
        bus: Arc<BusCommunicator>,
        address: u16,
        config: &EncoderConfig,
    ) -> Self {
        Self {
            port: port.into(),
            bus,
            address,
            command: config.command,
            raw: AtomicI32::new(0),
            offset: AtomicI32::new(0),
        }
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    fn sample(&self) -> i32 {
        if let Ok(raw) = self.bus.read_i32(self.address, self.command) {
            self.raw.store(raw, Ordering::SeqCst);
        }
        self.raw.load(Ordering::SeqCst)
    }

    /// Ticks since construction or the last [`Encoder::reset`].
    pub fn read(&self) -> i32 {
        self.sample().wrapping_sub(self.offset.load(Ordering::SeqCst))
    }

    pub fn reset(&self) {
        let raw = self.sample();
        self.offset.store(raw, Ordering::SeqCst);
    }
}
