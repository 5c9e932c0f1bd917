//! Three-axis sensors (accelerometer, gyroscope) fed by an input-event device.

use std::sync::{Arc, PoisonError, RwLock};

use brick_types::BrickError;

use crate::config::Sensor3dConfig;
use crate::input::{EV_ABS, InputEvent, InputReader};

const ABS_X: u16 = 0x00;
const ABS_Y: u16 = 0x01;
const ABS_Z: u16 = 0x02;

/// Accelerometer or gyroscope.
///
/// Axis values are clamped to the configured `min..=max`.
pub struct ThreeAxisSensor {
    name: String,
    reading: Arc<RwLock<[i32; 3]>>,
    _reader: InputReader,
}

impl ThreeAxisSensor {
    /// # Errors
    ///
    /// Returns [`BrickError::Configuration`] when the device file cannot be
    /// opened.
    pub fn new(name: impl Into<String>, config: &Sensor3dConfig) -> Result<Self, BrickError> {
        let name = name.into();
        let reading = Arc::new(RwLock::new([0i32; 3]));
        let sink = Arc::clone(&reading);
        let (min, max) = (config.min, config.max);
        let reader = InputReader::spawn(&name, &config.device_file, move |event: InputEvent| {
            if event.kind != EV_ABS {
                return;
            }
            let axis = match event.code {
                ABS_X => 0,
                ABS_Y => 1,
                ABS_Z => 2,
                _ => return,
            };
            let mut reading = sink.write().unwrap_or_else(PoisonError::into_inner);
            reading[axis] = event.value.clamp(min, max);
        })?;
        Ok(Self {
            name,
            reading,
            _reader: reader,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Copy of the latest `[x, y, z]`.
    pub fn read(&self) -> [i32; 3] {
        *self.reading.read().unwrap_or_else(PoisonError::into_inner)
    }
}
