//! # brick-hal
//!
//! Hardware layer of the brick.
//!
//! | Module | Contents |
//! |---|---|
//! | [`i2c`] | [`BusCommunicator`], the serialized gate in front of the shared bus |
//! | [`motor`], [`sensor`], [`encoder`], [`battery`], [`pwm_capture`] | bus and device-file drivers |
//! | [`sensor3d`], [`keys`] | input-event devices |
//! | [`led`], [`gamepad`], [`display`] | user-facing peripherals |
//! | [`telemetry_worker`] | out-of-process line detector |
//! | [`config`] | TOML board description |
//! | [`registry`] | [`Brick`], the owner of all of the above |

pub mod battery;
pub mod config;
pub mod display;
pub mod encoder;
pub mod gamepad;
pub mod i2c;
mod input;
pub mod keys;
pub mod led;
pub mod motor;
pub mod pwm_capture;
pub mod registry;
pub mod sensor;
pub mod sensor3d;
pub mod telemetry_worker;

#[cfg(test)]
mod testing;

pub use config::BrickConfig;
pub use display::{Display, DisplaySurface, HeadlessSurface};
pub use i2c::{BusCommunicator, BusTransaction, BusTransport};
pub use motor::Motor;
pub use registry::{Brick, BrickBuilder};
pub use sensor::Sensor;
pub use telemetry_worker::TelemetryWorker;
