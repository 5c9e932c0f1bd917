//! In-memory doubles for the dispatcher and server tests.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use brick_runtime::ScriptOrigin;
use brick_types::BrickError;

use crate::connection::ScriptHost;
use crate::storage::Storage;

#[derive(Default)]
pub struct MemoryStorage {
    files: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn get(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(path).cloned()
    }

    pub fn put(&self, path: &str, contents: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(path.to_string(), contents.to_string());
    }

    pub fn len(&self) -> usize {
        self.files.lock().unwrap().len()
    }
}

impl Storage for MemoryStorage {
    fn read(&self, path: &str) -> Result<String, BrickError> {
        self.get(path).ok_or_else(|| BrickError::Io {
            path: path.to_string(),
            details: "not found".to_string(),
        })
    }

    fn write(&self, path: &str, contents: &str) -> Result<(), BrickError> {
        self.put(path, contents);
        Ok(())
    }
}

/// Script host that only records what it was asked to do.
#[derive(Default)]
pub struct RecordingHost {
    runs: Mutex<Vec<(String, ScriptOrigin)>>,
    aborts: AtomicUsize,
    next_id: AtomicU64,
}

impl RecordingHost {
    pub fn runs(&self) -> Vec<(String, ScriptOrigin)> {
        self.runs.lock().unwrap().clone()
    }

    pub fn aborts(&self) -> usize {
        self.aborts.load(Ordering::SeqCst)
    }
}

impl ScriptHost for RecordingHost {
    fn run(&self, code: String, origin: ScriptOrigin) -> u64 {
        self.runs.lock().unwrap().push((code, origin));
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn abort(&self) {
        self.aborts.fetch_add(1, Ordering::SeqCst);
    }
}

/// Log records captured by a thread-local subscriber, one line per record.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Run `f` with every record at `WARN` or above written here.
    pub fn warnings<T>(&self, f: impl FnOnce() -> T) -> T {
        let logs = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .without_time()
            .with_writer(move || logs.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f)
    }

    pub fn lines(&self) -> Vec<String> {
        let buf = self.buf.lock().unwrap();
        String::from_utf8_lossy(&buf)
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
