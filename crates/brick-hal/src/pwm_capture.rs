//! PWM input capture.
//!
//! The capture unit publishes the measured signal in two sysfs-style files:
//! the frequency and the duty cycle, each holding one integer.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};

use brick_types::BrickError;
use tracing::warn;

use crate::config::PwmCaptureConfig;

pub struct PwmCapture {
    port: String,
    frequency_file: PathBuf,
    duty_file: PathBuf,
    last_frequency: AtomicI64,
    last_duty: AtomicI64,
}

impl PwmCapture {
    /// # Errors
    ///
    /// Returns [`BrickError::Configuration`] when either capture file is
    /// missing.
    pub fn new(port: impl Into<String>, config: &PwmCaptureConfig) -> Result<Self, BrickError> {
        let port = port.into();
        for file in [&config.frequency_file, &config.duty_file] {
            if !file.exists() {
                return Err(BrickError::config(
                    &port,
                    format!("capture file {} not found", file.display()),
                ));
            }
        }
        Ok(Self {
            port,
            frequency_file: config.frequency_file.clone(),
            duty_file: config.duty_file.clone(),
            last_frequency: AtomicI64::new(0),
            last_duty: AtomicI64::new(0),
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    /// Measured frequency, or the last known one if the file is unreadable.
    pub fn frequency(&self) -> i64 {
        self.sample(&self.frequency_file, &self.last_frequency)
    }

    /// Measured duty cycle, or the last known one if the file is unreadable.
    pub fn duty(&self) -> i64 {
        self.sample(&self.duty_file, &self.last_duty)
    }

    fn sample(&self, file: &Path, last: &AtomicI64) -> i64 {
        let parsed = fs::read_to_string(file)
            .map_err(|e| BrickError::io(file.display(), e))
            .and_then(|raw| {
                raw.trim()
                    .parse::<i64>()
                    .map_err(|e| BrickError::Protocol(format!("{}: {e}", file.display())))
            });
        match parsed {
            Ok(value) => {
                last.store(value, Ordering::SeqCst);
                value
            }
            Err(e) => {
                warn!(port = %self.port, error = %e, "capture read failed");
                last.load(Ordering::SeqCst)
            }
        }
    }
}
