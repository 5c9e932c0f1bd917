//! Scalar sensors.
//!
//! * [`AnalogSensor`] – ADC channel sampled over the shared bus.
//! * [`DigitalSensor`] – device file holding a raw integer, normalised to
//!   `0..=100` against its type's `min`/`max`.
//!
//! Both fall back to the last successful reading when the hardware does not
//! answer.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use brick_types::{BrickError, SensorType};
use tracing::{debug, warn};

use crate::config::{AnalogSensorConfig, DigitalSensorConfig, SensorTypeConfig};
use crate::i2c::BusCommunicator;

/// A sensor producing one integer reading.
pub trait Sensor: Send + Sync {
    fn port(&self) -> &str;

    fn sensor_type(&self) -> SensorType;

    /// Current reading, or the last known one if the hardware is unreachable.
    fn read(&self) -> i32;
}

/// Bus-backed analog input.
pub struct AnalogSensor {
    port: String,
    bus: Arc<BusCommunicator>,
    address: u16,
    command: u8,
    last: AtomicI32,
}

impl AnalogSensor {
    pub fn new(
        port: impl Into<String>,
        bus: Arc<BusCommunicator>,
        address: u16,
        config: &AnalogSensorConfig,
    ) -> Self {
        Self {
            port: port.into(),
            bus,
            address,
            command: config.command,
            last: AtomicI32::new(0),
        }
    }
}

impl Sensor for AnalogSensor {
    fn port(&self) -> &str {
        &self.port
    }

    fn sensor_type(&self) -> SensorType {
        SensorType::Analog
    }

    fn read(&self) -> i32 {
        match self.bus.read_u16(self.address, self.command) {
            Ok(raw) => {
                let value = i32::from(raw);
                self.last.store(value, Ordering::SeqCst);
                value
            }
            Err(_) => self.last.load(Ordering::SeqCst),
        }
    }
}

/// Device-file sensor normalised to a percentage.
pub struct DigitalSensor {
    port: String,
    device_file: PathBuf,
    range: SensorTypeConfig,
    last: AtomicI32,
}

impl DigitalSensor {
    /// # Errors
    ///
    /// Returns [`BrickError::Configuration`] when the device file is missing
    /// or the type's range is empty.
    pub fn new(
        port: impl Into<String>,
        config: &DigitalSensorConfig,
        range: SensorTypeConfig,
    ) -> Result<Self, BrickError> {
        let port = port.into();
        if range.max <= range.min {
            return Err(BrickError::config(
                &port,
                format!("empty sensor range {}..{}", range.min, range.max),
            ));
        }
        if !config.device_file.exists() {
            return Err(BrickError::config(
                &port,
                format!("device file {} not found", config.device_file.display()),
            ));
        }
        Ok(Self {
            port,
            device_file: config.device_file.clone(),
            range,
            last: AtomicI32::new(0),
        })
    }

    fn normalise(&self, raw: i32) -> i32 {
        let SensorTypeConfig { min, max } = self.range;
        let (min, max) = (i64::from(min), i64::from(max));
        let clamped = i64::from(raw).clamp(min, max);
        ((clamped - min) * 100 / (max - min)) as i32
    }

    fn sample(&self) -> Result<i32, BrickError> {
        let raw = fs::read_to_string(&self.device_file)
            .map_err(|e| BrickError::io(self.device_file.display(), e))?;
        raw.trim()
            .parse::<i32>()
            .map_err(|e| BrickError::Protocol(format!("{}: {e}", self.device_file.display())))
    }
}

impl Sensor for DigitalSensor {
    fn port(&self) -> &str {
        &self.port
    }

    fn sensor_type(&self) -> SensorType {
        SensorType::Digital
    }

    fn read(&self) -> i32 {
        match self.sample() {
            Ok(raw) => {
                let value = self.normalise(raw);
                self.last.store(value, Ordering::SeqCst);
                value
            }
            Err(e @ BrickError::Protocol(_)) => {
                debug!(port = %self.port, error = %e, "unparsable sensor value");
                self.last.load(Ordering::SeqCst)
            }
            Err(e) => {
                warn!(port = %self.port, error = %e, "sensor read failed");
                self.last.load(Ordering::SeqCst)
            }
        }
    }
}
