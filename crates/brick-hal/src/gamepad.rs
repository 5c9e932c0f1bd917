//! Remote gamepad listening for UDP datagrams.
//!
//! A phone or PC sends one text message per line:
//!
//! | Message | Meaning |
//! |---|---|
//! | `pad <n> <x> <y>` | pad `n` touched at (`x`, `y`), each in `-100..=100` |
//! | `pad <n> up` | pad `n` released |
//! | `btn <n>` | button `n` pressed |
//! | `wheel <percent>` | steering wheel position |
//!
//! Malformed lines are dropped and logged.

use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::net::UdpSocket;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use brick_types::BrickError;
use tracing::{debug, warn};

use crate::config::GamepadConfig;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
struct PadState {
    pads: HashMap<u8, (i32, i32)>,
    buttons: HashSet<u8>,
    wheel: Option<i32>,
}

impl PadState {
    fn apply(&mut self, line: &str) -> Result<(), BrickError> {
        let malformed = || BrickError::Protocol(format!("malformed gamepad message '{line}'"));
        let number = |token: Option<&str>| -> Result<i32, BrickError> {
            token
                .and_then(|t| t.parse::<i32>().ok())
                .ok_or_else(malformed)
        };
        let id = |token: Option<&str>| -> Result<u8, BrickError> {
            token.and_then(|t| t.parse::<u8>().ok()).ok_or_else(malformed)
        };

        let mut tokens = line.split_whitespace();
        match tokens.next() {
            Some("pad") => {
                let pad = id(tokens.next())?;
                match tokens.next() {
                    Some("up") => {
                        self.pads.remove(&pad);
                    }
                    x => {
                        let x = number(x)?;
                        let y = number(tokens.next())?;
                        self.pads.insert(pad, (x, y));
                    }
                }
            }
            Some("btn") => {
                self.buttons.insert(id(tokens.next())?);
            }
            Some("wheel") => {
                self.wheel = Some(number(tokens.next())?);
            }
            _ => return Err(malformed()),
        }
        Ok(())
    }
}

/// Gamepad state shared between the listener thread and scripts.
pub struct Gamepad {
    port: u16,
    state: Arc<Mutex<PadState>>,
    stop: Arc<AtomicBool>,
    listener: Option<JoinHandle<()>>,
}

impl Gamepad {
    /// Bind the configured UDP port and start listening.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Configuration`] when the port cannot be bound.
    pub fn new(config: &GamepadConfig) -> Result<Self, BrickError> {
        let bind_err = |e: std::io::Error| BrickError::config("gamepad", format!("port {}: {e}", config.port));
        let socket = UdpSocket::bind(("0.0.0.0", config.port)).map_err(bind_err)?;
        socket.set_read_timeout(Some(RECV_TIMEOUT)).map_err(bind_err)?;
        let port = socket.local_addr().map_err(bind_err)?.port();

        let state = Arc::new(Mutex::new(PadState::default()));
        let stop = Arc::new(AtomicBool::new(false));
        let listener = {
            let state = Arc::clone(&state);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("gamepad".to_string())
                .spawn(move || listen(&socket, &state, &stop))
                .map_err(|e| BrickError::config("gamepad", e.to_string()))?
        };

        Ok(Self {
            port,
            state,
            stop,
            listener: Some(listener),
        })
    }

    /// UDP port actually bound (differs from the configured one when it was `0`).
    pub fn port(&self) -> u16 {
        self.port
    }

    fn state(&self) -> MutexGuard<'_, PadState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current touch position of `pad`, if it is held.
    pub fn pad(&self, pad: u8) -> Option<(i32, i32)> {
        self.state().pads.get(&pad).copied()
    }

    /// Whether `button` was pressed since the last check; consumes the press.
    pub fn button_was_pressed(&self, button: u8) -> bool {
        self.state().buttons.remove(&button)
    }

    pub fn wheel(&self) -> Option<i32> {
        self.state().wheel
    }

    pub fn reset(&self) {
        *self.state() = PadState::default();
    }
}

impl Drop for Gamepad {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(listener) = self.listener.take() {
            let _ = listener.join();
        }
    }
}

fn listen(socket: &UdpSocket, state: &Mutex<PadState>, stop: &AtomicBool) {
    let mut buf = [0u8; 1024];
    while !stop.load(Ordering::SeqCst) {
        match socket.recv_from(&mut buf) {
            Ok((n, peer)) => {
                let text = String::from_utf8_lossy(&buf[..n]);
                let mut state = state.lock().unwrap_or_else(PoisonError::into_inner);
                for line in text.lines().filter(|l| !l.trim().is_empty()) {
                    if let Err(e) = state.apply(line) {
                        debug!(peer = %peer, error = %e, "gamepad message dropped");
                    }
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => {
                warn!(error = %e, "gamepad socket failed, listener stopping");
                return;
            }
        }
    }
}
