//! Battery voltage monitor.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::BatteryConfig;
use crate::i2c::BusCommunicator;

/// Full-scale value of the 10-bit ADC.
const ADC_FULL_SCALE: f64 = 1023.0;
/// ADC reference voltage.
const ADC_REFERENCE_VOLTS: f64 = 3.3;
/// Resistor divider between the battery and the ADC pin (7.15k over 2.37k).
const DIVIDER_RATIO: f64 = (7.15 + 2.37) / 2.37;

/// Battery monitor sampled over the shared bus.
pub struct Battery {
    bus: Arc<BusCommunicator>,
    address: u16,
    command: u8,
    last_volts: AtomicU64,
}

impl Battery {
    pub fn new(bus: Arc<BusCommunicator>, address: u16, config: &BatteryConfig) -> Self {
        Self {
            bus,
            address,
            command: config.command,
            last_volts: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// Battery voltage in volts; the last known value on bus failure.
    pub fn read_voltage(&self) -> f64 {
        if let Ok(raw) = self.bus.read_u16(self.address, self.command) {
            let volts = f64::from(raw) / ADC_FULL_SCALE * ADC_REFERENCE_VOLTS * DIVIDER_RATIO;
            self.last_volts.store(volts.to_bits(), Ordering::SeqCst);
        }
        f64::from_bits(self.last_volts.load(Ordering::SeqCst))
    }
}
