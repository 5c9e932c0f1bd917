//! Linux input-event device reader shared by [`Keys`](crate::keys::Keys) and
//! [`ThreeAxisSensor`](crate::sensor3d::ThreeAxisSensor).
//!
//! The device file is opened non-blocking and polled from an owned thread so
//! that dropping the reader can always stop and join it.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use brick_types::BrickError;
use tracing::{debug, warn};

pub(crate) const EV_KEY: u16 = 0x01;
pub(crate) const EV_ABS: u16 = 0x03;

#[cfg(unix)]
const TIMEVAL_SIZE: usize = std::mem::size_of::<libc::timeval>();
#[cfg(not(unix))]
const TIMEVAL_SIZE: usize = 16;

/// `struct input_event`: timeval, type, code, value.
pub(crate) const EVENT_SIZE: usize = TIMEVAL_SIZE + 8;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct InputEvent {
    pub kind: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    fn decode(raw: &[u8]) -> Self {
        let at = TIMEVAL_SIZE;
        Self {
            kind: u16::from_ne_bytes([raw[at], raw[at + 1]]),
            code: u16::from_ne_bytes([raw[at + 2], raw[at + 3]]),
            value: i32::from_ne_bytes([raw[at + 4], raw[at + 5], raw[at + 6], raw[at + 7]]),
        }
    }

    #[cfg(test)]
    pub(crate) fn encode(kind: u16, code: u16, value: i32) -> Vec<u8> {
        let mut raw = vec![0u8; TIMEVAL_SIZE];
        raw.extend_from_slice(&kind.to_ne_bytes());
        raw.extend_from_slice(&code.to_ne_bytes());
        raw.extend_from_slice(&value.to_ne_bytes());
        raw
    }
}

/// Owned polling thread feeding decoded events to a handler.
pub(crate) struct InputReader {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl InputReader {
    /// Open `path` and start delivering its events to `handler`.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Configuration`] for `device` when the file
    /// cannot be opened.
    pub(crate) fn spawn<F>(device: &str, path: &Path, handler: F) -> Result<Self, BrickError>
    where
        F: FnMut(InputEvent) + Send + 'static,
    {
        let file = open_nonblocking(path)
            .map_err(|e| BrickError::config(device, format!("cannot open {}: {e}", path.display())))?;
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let name = device.to_string();
        let handle = thread::Builder::new()
            .name(format!("input-{device}"))
            .spawn(move || pump(&name, file, &thread_stop, handler))
            .map_err(|e| BrickError::config(device, format!("cannot spawn reader: {e}")))?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }
}

impl Drop for InputReader {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn open_nonblocking(path: &Path) -> std::io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.custom_flags(libc::O_NONBLOCK);
    }
    options.open(path)
}

fn pump<F>(device: &str, mut file: File, stop: &AtomicBool, mut handler: F)
where
    F: FnMut(InputEvent),
{
    let mut pending: Vec<u8> = Vec::with_capacity(EVENT_SIZE * 16);
    let mut chunk = [0u8; EVENT_SIZE * 16];

    while !stop.load(Ordering::SeqCst) {
        match file.read(&mut chunk) {
            Ok(0) => thread::sleep(POLL_INTERVAL),
            Ok(n) => {
                pending.extend_from_slice(&chunk[..n]);
                let complete = pending.len() - pending.len() % EVENT_SIZE;
                for raw in pending[..complete].chunks_exact(EVENT_SIZE) {
                    handler(InputEvent::decode(raw));
                }
                pending.drain(..complete);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => {
                thread::sleep(POLL_INTERVAL);
            }
            Err(e) => {
                warn!(device, error = %e, "input device read failed, reader stopping");
                return;
            }
        }
    }
    debug!(device, "input reader stopped");
}
