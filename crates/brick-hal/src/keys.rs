//! Front-panel keys fed by an input-event device.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use brick_types::BrickError;
use tracing::debug;

use crate::config::KeysConfig;
use crate::input::{EV_KEY, InputEvent, InputReader};

#[derive(Default)]
struct KeyState {
    pressed: HashSet<u16>,
    last: Option<u16>,
}

/// Records key presses until a script consumes them.
pub struct Keys {
    state: Arc<Mutex<KeyState>>,
    _reader: InputReader,
}

impl Keys {
    /// # Errors
    ///
    /// Returns [`BrickError::Configuration`] when the device file cannot be
    /// opened.
    pub fn new(config: &KeysConfig) -> Result<Self, BrickError> {
        let state = Arc::new(Mutex::new(KeyState::default()));
        let sink = Arc::clone(&state);
        let reader = InputReader::spawn("keys", &config.device_file, move |event: InputEvent| {
            // value 1 = press, 0 = release, 2 = autorepeat
            if event.kind == EV_KEY && event.value == 1 {
                debug!(code = event.code, "key pressed");
                let mut state = sink.lock().unwrap_or_else(PoisonError::into_inner);
                state.pressed.insert(event.code);
                state.last = Some(event.code);
            }
        })?;
        Ok(Self {
            state,
            _reader: reader,
        })
    }

    fn state(&self) -> std::sync::MutexGuard<'_, KeyState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether `code` was pressed since the last check; consumes the press.
    pub fn was_pressed(&self, code: u16) -> bool {
        self.state().pressed.remove(&code)
    }

    /// Code of the most recently pressed key.
    pub fn last_pressed(&self) -> Option<u16> {
        self.state().last
    }

    /// Forget every recorded press.
    pub fn reset(&self) {
        let mut state = self.state();
        state.pressed.clear();
        state.last = None;
    }
}
