//! Test doubles shared by the driver and registry tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use std::sync::{Arc, Mutex};

use brick_types::BrickError;

use crate::display::DisplaySurface;
use crate::i2c::{BusTransaction, BusTransport};

/// Bus transport that records every transaction and answers from a table.
///
/// Unknown reads answer with zeroes. Clones share the same log.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    log: Arc<Mutex<Vec<BusTransaction>>>,
    responses: Arc<Mutex<HashMap<(u16, u8), Vec<u8>>>>,
    failing: Arc<AtomicBool>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, address: u16, command: u8, bytes: Vec<u8>) {
        self.responses
            .lock()
            .unwrap()
            .insert((address, command), bytes);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn transactions(&self) -> Vec<BusTransaction> {
        self.log.lock().unwrap().clone()
    }

    /// Payloads written with `command`, in order.
    pub fn writes_to(&self, command: u8) -> Vec<Vec<u8>> {
        self.transactions()
            .into_iter()
            .filter(|t| t.command == command && t.response_len == 0)
            .map(|t| t.payload)
            .collect()
    }
}

impl BusTransport for RecordingTransport {
    fn transfer(&mut self, transaction: &BusTransaction) -> Result<Vec<u8>, BrickError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BrickError::Bus {
                address: transaction.address,
                details: "simulated fault".to_string(),
            });
        }
        self.log.lock().unwrap().push(transaction.clone());
        let mut response = self
            .responses
            .lock()
            .unwrap()
            .get(&(transaction.address, transaction.command))
            .cloned()
            .unwrap_or_default();
        response.resize(transaction.response_len, 0);
        Ok(response)
    }
}

/// Display surface that records every call as a short string.
#[derive(Clone, Default)]
pub struct RecordingSurface {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingSurface {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

impl DisplaySurface for RecordingSurface {
    fn show_image(&self, path: &Path) {
        self.record(format!("image {}", path.display()));
    }

    fn add_label(&self, text: &str, x: i32, y: i32) {
        self.record(format!("label {text} {x} {y}"));
    }

    fn clear(&self) {
        self.record("clear".to_string());
    }

    fn hide(&self) {
        self.record("hide".to_string());
    }
}

/// Transport that flags any overlap between two transfers.
#[derive(Clone, Default)]
pub struct OverlapDetector {
    in_flight: Arc<AtomicUsize>,
    overlapped: Arc<AtomicBool>,
    completed: Arc<AtomicUsize>,
}

impl OverlapDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }
}

impl BusTransport for OverlapDetector {
    fn transfer(&mut self, transaction: &BusTransaction) -> Result<Vec<u8>, BrickError> {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) != 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        thread::sleep(Duration::from_micros(200));
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(vec![0; transaction.response_len])
    }
}
