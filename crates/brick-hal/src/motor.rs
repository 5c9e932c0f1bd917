//! Motor drivers.
//!
//! Two families share the [`Motor`] trait:
//!
//! * [`PowerMotor`] – DC motor whose signed power is written over the shared
//!   bus.
//! * [`ServoMotor`] – PWM servo whose duty cycle is written to a sysfs-style
//!   device file, calibrated by a [`MotorTypeConfig`].
//!
//! Power is always a percentage in `-100..=100`; out-of-range requests are
//! clamped.

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};

use brick_types::{BrickError, MotorType};
use tracing::warn;

use crate::config::{MotorTypeConfig, PowerMotorConfig, ServoMotorConfig};
use crate::i2c::BusCommunicator;

const MAX_POWER: i32 = 100;

/// A motor addressable by port.
pub trait Motor: Send + Sync {
    /// Port this motor is plugged into, e.g. `"M1"`.
    fn port(&self) -> &str;

    /// Which family this motor belongs to.
    fn motor_type(&self) -> MotorType;

    /// Command `power` percent.  Hardware failures are logged, never returned:
    /// a faulted motor must not stall the caller.
    fn set_power(&self, power: i32);

    /// Last commanded power.
    fn power(&self) -> i32;

    /// Remove power from the motor.
    fn power_off(&self);
}

fn clamp_power(power: i32) -> i32 {
    power.clamp(-MAX_POWER, MAX_POWER)
}

// ────────────────────────────────────────────────────────────────────────────
// PowerMotor
// ────────────────────────────────────────────────────────────────────────────

/// DC motor driven through the peripheral microcontroller.
pub struct PowerMotor {
    port: String,
    bus: Arc<BusCommunicator>,
    address: u16,
    command: u8,
    invert: bool,
    power: AtomicI32,
}

impl PowerMotor {
    pub fn new(
        port: impl Into<String>,
        bus: Arc<BusCommunicator>,
        address: u16,
        config: &PowerMotorConfig,
    ) -> Self {
        Self {
            port: port.into(),
            bus,
            address,
            command: config.command,
            invert: config.invert,
            power: AtomicI32::new(0),
        }
    }
}

impl Motor for PowerMotor {
    fn port(&self) -> &str {
        &self.port
    }

    fn motor_type(&self) -> MotorType {
        MotorType::Power
    }

    fn set_power(&self, power: i32) {
        let power = clamp_power(power);
        self.power.store(power, Ordering::SeqCst);
        let wire = if self.invert { -power } else { power };
        // The bus already logged the failure.
        let _ = self
            .bus
            .write(self.address, self.command, &[wire as i8 as u8]);
    }

    fn power(&self) -> i32 {
        self.power.load(Ordering::SeqCst)
    }

    fn power_off(&self) {
        self.set_power(0);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ServoMotor
// ────────────────────────────────────────────────────────────────────────────

/// PWM servo.
///
/// Power maps linearly onto the duty range: `-100` → `min`, `0` → `zero`,
/// `100` → `max`.  Powering off writes the type's `stop` duty.
pub struct ServoMotor {
    port: String,
    duty_file: PathBuf,
    calibration: MotorTypeConfig,
    invert: bool,
    power: AtomicI32,
}

impl ServoMotor {
    /// Construct a servo, programming its PWM period when configured.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Configuration`] when the duty file cannot be
    /// opened for writing.
    pub fn new(
        port: impl Into<String>,
        config: &ServoMotorConfig,
        calibration: MotorTypeConfig,
    ) -> Result<Self, BrickError> {
        let port = port.into();
        OpenOptions::new()
            .write(true)
            .open(&config.device_file)
            .map_err(|e| {
                BrickError::config(
                    &port,
                    format!("cannot open {}: {e}", config.device_file.display()),
                )
            })?;

        if let (Some(period_file), Some(period)) = (&config.period_file, config.period) {
            if let Err(e) = fs::write(period_file, period.to_string()) {
                warn!(port = %port, file = %period_file.display(), error = %e, "cannot set servo period");
            }
        }

        Ok(Self {
            port,
            duty_file: config.device_file.clone(),
            calibration,
            invert: config.invert,
            power: AtomicI32::new(0),
        })
    }

    /// Duty value for a (clamped, already inverted) power.
    fn duty_for(&self, power: i32) -> i32 {
        let MotorTypeConfig { min, max, zero, .. } = self.calibration;
        let (min, max, zero) = (i64::from(min), i64::from(max), i64::from(zero));
        let range = if power <= 0 { zero - min } else { max - zero };
        let duty = zero + (f64::from(power) * range as f64 / 100.0) as i64;
        duty.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
    }

    fn write_duty(&self, duty: i32) {
        if let Err(e) = fs::write(&self.duty_file, duty.to_string()) {
            let err = BrickError::io(self.duty_file.display(), e);
            warn!(port = %self.port, error = %err, "servo write failed");
        }
    }
}

impl Motor for ServoMotor {
    fn port(&self) -> &str {
        &self.port
    }

    fn motor_type(&self) -> MotorType {
        MotorType::Servo
    }

    fn set_power(&self, power: i32) {
        let power = clamp_power(power);
        self.power.store(power, Ordering::SeqCst);
        let wire = if self.invert { -power } else { power };
        self.write_duty(self.duty_for(wire));
    }

    fn power(&self) -> i32 {
        self.power.load(Ordering::SeqCst)
    }

    fn power_off(&self) {
        self.power.store(0, Ordering::SeqCst);
        self.write_duty(self.calibration.stop);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingTransport;

    fn power_motor(invert: bool) -> (PowerMotor, RecordingTransport) {
        let transport = RecordingTransport::new();
        let bus = Arc::new(BusCommunicator::new(Box::new(transport.clone())));
        let motor = PowerMotor::new(
            "M1",
            bus,
            0x48,
            &PowerMotorConfig {
                command: 0x14,
                invert,
            },
        );
        (motor, transport)
    }

    const SERVO: MotorTypeConfig = MotorTypeConfig {
        min: 1000,
        max: 2000,
        zero: 1500,
        stop: 0,
    };

    fn servo(dir: &tempfile::TempDir, invert: bool) -> ServoMotor {
        let duty = dir.path().join("duty_ns");
        let period = dir.path().join("period_ns");
        fs::write(&duty, "").unwrap();
        ServoMotor::new(
            "S1",
            &ServoMotorConfig {
                device_file: duty,
                period_file: Some(period),
                period: Some(20_000_000),
                invert,
                motor_type: "servo".to_string(),
            },
            SERVO,
        )
        .unwrap()
    }

    #[test]
    fn power_motor_writes_signed_byte() {
        let (motor, transport) = power_motor(false);
        motor.set_power(-30);
        assert_eq!(motor.power(), -30);
        assert_eq!(transport.writes_to(0x14), vec![vec![(-30i8) as u8]]);
    }

    #[test]
    fn power_motor_clamps_and_inverts() {
        let (motor, transport) = power_motor(true);
        motor.set_power(250);
        assert_eq!(motor.power(), 100);
        assert_eq!(transport.writes_to(0x14), vec![vec![(-100i8) as u8]]);
    }

    #[test]
    fn power_motor_survives_bus_fault() {
        let (motor, transport) = power_motor(false);
        transport.set_failing(true);
        motor.set_power(40);
        assert_eq!(motor.power(), 40);
        motor.power_off();
        assert_eq!(motor.power(), 0);
    }

    #[test]
    fn servo_maps_power_onto_duty_range() {
        let dir = tempfile::tempdir().unwrap();
        let motor = servo(&dir, false);
        let duty = dir.path().join("duty_ns");

        motor.set_power(100);
        assert_eq!(fs::read_to_string(&duty).unwrap(), "2000");
        motor.set_power(-50);
        assert_eq!(fs::read_to_string(&duty).unwrap(), "1250");
        motor.set_power(0);
        assert_eq!(fs::read_to_string(&duty).unwrap(), "1500");

        let period = fs::read_to_string(dir.path().join("period_ns")).unwrap();
        assert_eq!(period, "20000000");
    }

    #[test]
    fn servo_power_off_writes_stop_duty() {
        let dir = tempfile::tempdir().unwrap();
        let motor = servo(&dir, true);
        motor.set_power(100);
        assert_eq!(
            fs::read_to_string(dir.path().join("duty_ns")).unwrap(),
            "1000"
        );
        motor.power_off();
        assert_eq!(motor.power(), 0);
        assert_eq!(fs::read_to_string(dir.path().join("duty_ns")).unwrap(), "0");
    }

    #[test]
    fn servo_duty_math_does_not_overflow_wide_calibration() {
        let dir = tempfile::tempdir().unwrap();
        let duty = dir.path().join("duty_ns");
        fs::write(&duty, "").unwrap();
        let motor = ServoMotor::new(
            "S3",
            &ServoMotorConfig {
                device_file: duty.clone(),
                period_file: None,
                period: None,
                invert: false,
                motor_type: "wide".to_string(),
            },
            MotorTypeConfig {
                min: i32::MIN,
                max: i32::MAX,
                zero: 0,
                stop: 0,
            },
        )
        .unwrap();

        motor.set_power(100);
        assert_eq!(fs::read_to_string(&duty).unwrap(), i32::MAX.to_string());
        motor.set_power(-100);
        assert_eq!(fs::read_to_string(&duty).unwrap(), i32::MIN.to_string());
    }

    #[test]
    fn servo_with_missing_duty_file_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ServoMotor::new(
            "S2",
            &ServoMotorConfig {
                device_file: dir.path().join("missing/duty_ns"),
                period_file: None,
                period: None,
                invert: false,
                motor_type: "servo".to_string(),
            },
            SERVO,
        );
        assert!(matches!(result, Err(BrickError::Configuration { .. })));
    }
}
