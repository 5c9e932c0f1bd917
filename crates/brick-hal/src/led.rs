//! Two-colour status LED.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use brick_types::{BrickError, LedColor};
use tracing::warn;

use crate::config::LedConfig;

/// Red/green LED; orange is both channels lit.
pub struct Led {
    red_file: PathBuf,
    green_file: PathBuf,
    on: String,
    off: String,
    color: Mutex<LedColor>,
}

impl Led {
    /// Open both channels and switch the LED off.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Configuration`] when a channel file cannot be
    /// opened for writing.
    pub fn new(config: &LedConfig) -> Result<Self, BrickError> {
        for file in [&config.red_file, &config.green_file] {
            OpenOptions::new()
                .write(true)
                .open(file)
                .map_err(|e| BrickError::config("led", format!("cannot open {}: {e}", file.display())))?;
        }
        let led = Self {
            red_file: config.red_file.clone(),
            green_file: config.green_file.clone(),
            on: config.on.clone(),
            off: config.off.clone(),
            color: Mutex::new(LedColor::Off),
        };
        led.set(LedColor::Off);
        Ok(led)
    }

    /// Light the red channel only.
    pub fn red(&self) {
        self.set(LedColor::Red);
    }

    /// Light the green channel only.
    pub fn green(&self) {
        self.set(LedColor::Green);
    }

    /// Light both channels.
    pub fn orange(&self) {
        self.set(LedColor::Orange);
    }

    /// Switch both channels off.
    pub fn off(&self) {
        self.set(LedColor::Off);
    }

    /// Colour last set.
    pub fn color(&self) -> LedColor {
        *self.color.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set(&self, color: LedColor) {
        let (red, green) = match color {
            LedColor::Off => (false, false),
            LedColor::Red => (true, false),
            LedColor::Green => (false, true),
            LedColor::Orange => (true, true),
        };
        let mut current = self.color.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_channel(&self.red_file, red);
        self.write_channel(&self.green_file, green);
        *current = color;
    }

    fn write_channel(&self, file: &Path, lit: bool) {
        let value = if lit { &self.on } else { &self.off };
        if let Err(e) = fs::write(file, value) {
            warn!(file = %file.display(), error = %e, "led write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn led(dir: &tempfile::TempDir) -> Led {
        let red_file = dir.path().join("red");
        let green_file = dir.path().join("green");
        fs::write(&red_file, "").unwrap();
        fs::write(&green_file, "").unwrap();
        Led::new(&LedConfig {
            red_file,
            green_file,
            on: "255".to_string(),
            off: "0".to_string(),
        })
        .unwrap()
    }

    fn channels(dir: &tempfile::TempDir) -> (String, String) {
        (
            fs::read_to_string(dir.path().join("red")).unwrap(),
            fs::read_to_string(dir.path().join("green")).unwrap(),
        )
    }

    #[test]
    fn colours_drive_both_channels() {
        let dir = tempfile::tempdir().unwrap();
        let led = led(&dir);
        assert_eq!(led.color(), LedColor::Off);
        assert_eq!(channels(&dir), ("0".into(), "0".into()));

        led.orange();
        assert_eq!(led.color(), LedColor::Orange);
        assert_eq!(channels(&dir), ("255".into(), "255".into()));

        led.red();
        assert_eq!(channels(&dir), ("255".into(), "0".into()));

        led.green();
        assert_eq!(channels(&dir), ("0".into(), "255".into()));
    }

    #[test]
    fn missing_channel_is_configuration_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = Led::new(&LedConfig {
            red_file: dir.path().join("red"),
            green_file: dir.path().join("green"),
            on: "1".into(),
            off: "0".into(),
        });
        assert!(matches!(result, Err(BrickError::Configuration { .. })));
    }
}
