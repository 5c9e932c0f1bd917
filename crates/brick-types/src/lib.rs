use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// The two motor families a brick drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MotorType {
    /// DC motor driven through the shared bus.
    Power,
    /// PWM servo driven through a sysfs-style duty file.
    Servo,
}

/// The two sensor families a brick reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorType {
    /// ADC channel sampled through the shared bus.
    Analog,
    /// Device file exposing a raw integer value.
    Digital,
}

/// Colour of the status LED.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedColor {
    Off,
    Red,
    Green,
    Orange,
}

/// Reading produced by a line-detection pipeline: `[x, crossroad probability, mass]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineReading(pub [i32; 3]);

impl LineReading {
    /// Horizontal position of the detected line.
    pub fn x(&self) -> i32 {
        self.0[0]
    }

    /// Probability (0..100) that the robot stands on a crossroad.
    pub fn crossroad_probability(&self) -> i32 {
        self.0[1]
    }

    /// Mass of the detected region.
    pub fn mass(&self) -> i32 {
        self.0[2]
    }
}

/// Colour calibration reported by a detection process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvCalibration {
    pub hue: i32,
    pub hue_tolerance: i32,
    pub saturation: i32,
    pub saturation_tolerance: i32,
    pub value: i32,
    pub value_tolerance: i32,
}

impl HsvCalibration {
    /// Return a copy with every tolerance multiplied by `factor`.
    ///
    /// Scaled tolerances are truncated toward zero.
    pub fn scaled(&self, factor: f64) -> Self {
        let scale = |tolerance: i32| (f64::from(tolerance) * factor) as i32;
        Self {
            hue_tolerance: scale(self.hue_tolerance),
            saturation_tolerance: scale(self.saturation_tolerance),
            value_tolerance: scale(self.value_tolerance),
            ..*self
        }
    }
}

/// Complete snapshot of a telemetry worker's shared state.
///
/// Always handed out by value so that callers never observe a partial update.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetrySample {
    pub reading: LineReading,
    pub calibration: Option<HsvCalibration>,
}

/// Unified event wrapper for the brick event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g., "brick-communicator::connection"
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the brick event bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EventPayload {
    /// A script loaded from `path` was queued for execution.
    ScriptStarted { path: String, script_id: u64 },
    /// Inline code received over the command channel was queued for execution.
    DirectScriptStarted { script_id: u64 },
    /// A script finished. `error` is empty on success.
    ScriptCompleted { script_id: u64, error: String },
    /// The brick performed an emergency stop.
    BrickStopped,
    /// Someone asked the board process to shut down.
    Quit,
    HardwareFault { component: String, message: String },
}

/// Error type spanning configuration, bus, protocol, storage and process failures.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BrickError {
    #[error("Configuration error for {device}: {details}")]
    Configuration { device: String, details: String },

    #[error("Bus error at address {address:#04x}: {details}")]
    Bus { address: u16, details: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("I/O error on {path}: {details}")]
    Io { path: String, details: String },

    #[error("Process error in {sensor}: {details}")]
    Process { sensor: String, details: String },

    #[error("Event channel error: {0}")]
    Channel(String),
}

impl BrickError {
    /// Build a [`BrickError::Io`] from a path-like label and an I/O error.
    pub fn io(path: impl std::fmt::Display, err: std::io::Error) -> Self {
        BrickError::Io {
            path: path.to_string(),
            details: err.to_string(),
        }
    }

    /// Build a [`BrickError::Configuration`] for `device`.
    pub fn config(device: impl Into<String>, details: impl Into<String>) -> Self {
        BrickError::Configuration {
            device: device.into(),
            details: details.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hsv_scaling_only_touches_tolerances() {
        let calibration = HsvCalibration {
            hue: 100,
            hue_tolerance: 5,
            saturation: 200,
            saturation_tolerance: 10,
            value: 150,
            value_tolerance: 8,
        };
        let scaled = calibration.scaled(2.0);
        assert_eq!(
            (scaled.hue, scaled.saturation, scaled.value),
            (100, 200, 150)
        );
        assert_eq!(
            (
                scaled.hue_tolerance,
                scaled.saturation_tolerance,
                scaled.value_tolerance
            ),
            (10, 20, 16)
        );
    }

    #[test]
    fn hsv_scaling_truncates_toward_zero() {
        let calibration = HsvCalibration {
            hue_tolerance: 3,
            ..HsvCalibration::default()
        };
        assert_eq!(calibration.scaled(1.5).hue_tolerance, 4);
        assert_eq!(calibration.scaled(0.3).hue_tolerance, 0);
    }

    #[test]
    fn line_reading_accessors() {
        let reading = LineReading([10, 20, 30]);
        assert_eq!(reading.x(), 10);
        assert_eq!(reading.crossroad_probability(), 20);
        assert_eq!(reading.mass(), 30);
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "brick-runtime::script_runner",
            EventPayload::ScriptStarted {
                path: "foo.js".to_string(),
                script_id: 7,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.payload, back.payload);
    }

    #[test]
    fn brick_error_display() {
        let err = BrickError::Bus {
            address: 0x48,
            details: "no ack".to_string(),
        };
        assert!(err.to_string().contains("0x48"));

        let err = BrickError::config("M1", "unknown motor type");
        assert!(err.to_string().contains("M1"));
    }
}
