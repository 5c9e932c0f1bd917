//! Hardware configuration model.
//!
//! The board layout is described in TOML: one table per device category,
//! keyed by port.  Every section is optional, a missing section simply means
//! the device is absent from the registry.
//!
//! ```toml
//! init_script = "/etc/brick/init.sh"
//!
//! [bus]
//! path = "/dev/i2c-2"
//! device_id = 0x48
//!
//! [motor_types.servo]
//! min = 1200000
//! max = 1800000
//! zero = 1500000
//! stop = 0
//!
//! [power_motors.M1]
//! command = 0x14
//!
//! [servo_motors.S1]
//! device_file = "/sys/class/pwm/ehrpwm.1:1/duty_ns"
//! motor_type = "servo"
//!
//! [line_sensor]
//! program = "/usr/bin/line-detector"
//! tolerance_factor = 1.0
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use brick_types::BrickError;
use serde::{Deserialize, Serialize};

/// Complete hardware description of one brick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrickConfig {
    /// Shell command run once before any device is constructed.
    pub init_script: Option<String>,
    pub bus: BusConfig,
    pub motor_types: BTreeMap<String, MotorTypeConfig>,
    pub power_motors: BTreeMap<String, PowerMotorConfig>,
    pub servo_motors: BTreeMap<String, ServoMotorConfig>,
    pub pwm_captures: BTreeMap<String, PwmCaptureConfig>,
    pub sensor_types: BTreeMap<String, SensorTypeConfig>,
    pub analog_sensors: BTreeMap<String, AnalogSensorConfig>,
    /// Digital (device-file) sensors.
    pub sensors: BTreeMap<String, DigitalSensorConfig>,
    pub encoders: BTreeMap<String, EncoderConfig>,
    pub battery: Option<BatteryConfig>,
    pub accelerometer: Option<Sensor3dConfig>,
    pub gyroscope: Option<Sensor3dConfig>,
    pub keys: Option<KeysConfig>,
    pub led: Option<LedConfig>,
    pub gamepad: Option<GamepadConfig>,
    pub line_sensor: Option<LineSensorConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// i2c-dev character device.
    pub path: String,
    /// Address of the peripheral microcontroller.
    pub device_id: u16,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            path: "/dev/i2c-2".to_string(),
            device_id: 0x48,
        }
    }
}

/// PWM duty calibration shared by servos of one type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorTypeConfig {
    pub min: i32,
    pub max: i32,
    pub zero: i32,
    pub stop: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PowerMotorConfig {
    pub command: u8,
    #[serde(default)]
    pub invert: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServoMotorConfig {
    pub device_file: PathBuf,
    #[serde(default)]
    pub period_file: Option<PathBuf>,
    #[serde(default)]
    pub period: Option<u32>,
    #[serde(default)]
    pub invert: bool,
    pub motor_type: String,
}

/// Input capture channel measuring an incoming PWM signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PwmCaptureConfig {
    pub frequency_file: PathBuf,
    pub duty_file: PathBuf,
}

/// Raw value range used to normalise a digital sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorTypeConfig {
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalogSensorConfig {
    pub command: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalSensorConfig {
    pub device_file: PathBuf,
    pub sensor_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncoderConfig {
    pub command: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatteryConfig {
    pub command: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sensor3dConfig {
    pub min: i32,
    pub max: i32,
    pub device_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeysConfig {
    pub device_file: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedConfig {
    pub red_file: PathBuf,
    pub green_file: PathBuf,
    #[serde(default = "default_led_on")]
    pub on: String,
    #[serde(default = "default_led_off")]
    pub off: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamepadConfig {
    /// UDP port the remote gamepad sends to.
    pub port: u16,
}

/// External line-detection pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineSensorConfig {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default = "default_tolerance_factor")]
    pub tolerance_factor: f64,
}

fn default_led_on() -> String {
    "1".to_string()
}
fn default_led_off() -> String {
    "0".to_string()
}
fn default_tolerance_factor() -> f64 {
    1.0
}

impl BrickConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(raw: &str) -> Result<Self, BrickError> {
        toml::from_str(raw).map_err(|e| BrickError::config("brick config", e.to_string()))
    }

    /// Load a configuration file.
    pub fn load(path: &Path) -> Result<Self, BrickError> {
        let raw = fs::read_to_string(path).map_err(|e| BrickError::io(path.display(), e))?;
        Self::from_toml_str(&raw)
    }

    /// Look up the servo calibration named by a motor entry.
    pub fn motor_type(&self, port: &str, name: &str) -> Result<MotorTypeConfig, BrickError> {
        self.motor_types
            .get(name)
            .copied()
            .ok_or_else(|| BrickError::config(port, format!("unknown motor type '{name}'")))
    }

    /// Look up the value range named by a sensor entry.
    pub fn sensor_type(&self, port: &str, name: &str) -> Result<SensorTypeConfig, BrickError> {
        self.sensor_types
            .get(name)
            .copied()
            .ok_or_else(|| BrickError::config(port, format!("unknown sensor type '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        init_script = "true"

        [bus]
        path = "/dev/i2c-1"
        device_id = 0x48

        [motor_types.servo]
        min = 1200000
        max = 1800000
        zero = 1500000
        stop = 0

        [power_motors.M1]
        command = 0x14

        [power_motors.M2]
        command = 0x15
        invert = true

        [servo_motors.S1]
        device_file = "/tmp/duty"
        motor_type = "servo"

        [pwm_captures.C1]
        frequency_file = "/sys/class/pwm/ecap.0/frequency"
        duty_file = "/sys/class/pwm/ecap.0/duty"

        [analog_sensors.A1]
        command = 0x25

        [led]
        red_file = "/tmp/red"
        green_file = "/tmp/green"

        [line_sensor]
        program = "detector"
    "#;

    #[test]
    fn parses_sample_layout() {
        let cfg = BrickConfig::from_toml_str(SAMPLE).expect("valid config");
        assert_eq!(cfg.bus.path, "/dev/i2c-1");
        assert_eq!(cfg.power_motors.len(), 2);
        assert!(cfg.power_motors["M2"].invert);
        assert!(!cfg.power_motors["M1"].invert);
        assert_eq!(cfg.servo_motors["S1"].motor_type, "servo");
        assert_eq!(cfg.analog_sensors["A1"].command, 0x25);
        assert_eq!(
            cfg.pwm_captures["C1"].duty_file,
            PathBuf::from("/sys/class/pwm/ecap.0/duty")
        );
        let led = cfg.led.as_ref().unwrap();
        assert_eq!((led.on.as_str(), led.off.as_str()), ("1", "0"));
        let line = cfg.line_sensor.as_ref().unwrap();
        assert!((line.tolerance_factor - 1.0).abs() < f64::EPSILON);
        assert!(cfg.battery.is_none());
    }

    #[test]
    fn empty_config_has_no_devices() {
        let cfg = BrickConfig::from_toml_str("").expect("empty is valid");
        assert_eq!(cfg, BrickConfig::default());
        assert_eq!(cfg.bus.device_id, 0x48);
    }

    #[test]
    fn unknown_motor_type_is_configuration_error() {
        let cfg = BrickConfig::from_toml_str(SAMPLE).unwrap();
        let err = cfg.motor_type("S9", "turbo").unwrap_err();
        assert!(matches!(err, BrickError::Configuration { ref device, .. } if device == "S9"));
    }

    #[test]
    fn invalid_toml_is_configuration_error() {
        let err = BrickConfig::from_toml_str("[power_motors.M1]\ncommand = \"x\"").unwrap_err();
        assert!(matches!(err, BrickError::Configuration { .. }));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("brick.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let cfg = BrickConfig::load(&path).unwrap();
        assert_eq!(cfg.init_script.as_deref(), Some("true"));
    }
}
