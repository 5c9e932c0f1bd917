//! Script-engine boundary.
//!
//! The interpreter itself lives outside this workspace.  The runtime only
//! needs something that can execute a piece of code, notice a cooperative
//! abort, and report an error message.  [`ProcessScriptEngine`] does that by
//! piping the code into an external interpreter.

use std::io::{Read, Write};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use tracing::{debug, info};

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Cooperative cancellation flag for one script run.  Clones share state.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal(Arc<AtomicBool>);

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Executes script source.
pub trait ScriptEngine: Send {
    /// Run `code` to completion.
    ///
    /// Implementations should poll `abort` and return early once it is set.
    ///
    /// # Errors
    ///
    /// Returns the error message reported by the script.
    fn execute(&mut self, code: &str, abort: &AbortSignal) -> Result<(), String>;
}

/// Runs each script in a fresh interpreter process, code on stdin.
#[derive(Debug, Clone)]
pub struct ProcessScriptEngine {
    program: String,
    args: Vec<String>,
}

impl ProcessScriptEngine {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl ScriptEngine for ProcessScriptEngine {
    fn execute(&mut self, code: &str, abort: &AbortSignal) -> Result<(), String> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| format!("cannot start interpreter '{}': {e}", self.program))?;
        debug!(program = %self.program, pid = child.id(), "interpreter started");

        let feeder = child.stdin.take().map(|mut stdin| {
            let code = code.to_string();
            // A script that exits without reading its input is not an error.
            thread::spawn(move || {
                let _ = stdin.write_all(code.as_bytes());
            })
        });
        let collector = child.stderr.take().map(|mut stderr| {
            thread::spawn(move || {
                let mut text = String::new();
                let _ = stderr.read_to_string(&mut text);
                text
            })
        });

        let status = loop {
            if abort.is_aborted() {
                info!(pid = child.id(), "aborting script");
                let _ = child.kill();
                break child.wait().ok();
            }
            match child.try_wait() {
                Ok(Some(status)) => break Some(status),
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => return Err(format!("lost interpreter process: {e}")),
            }
        };

        // Grandchildren of a killed interpreter may keep the pipes open, so
        // an aborted run leaves the helper threads detached.
        if abort.is_aborted() {
            return Ok(());
        }
        if let Some(feeder) = feeder {
            let _ = feeder.join();
        }
        let stderr = collector
            .and_then(|c| c.join().ok())
            .unwrap_or_default();

        match status {
            Some(status) if status.success() => Ok(()),
            Some(status) => Err(failure_message(status, &stderr)),
            None => Err("interpreter status unavailable".to_string()),
        }
    }
}

fn failure_message(status: ExitStatus, stderr: &str) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("interpreter exited with {status}")
    } else {
        stderr.to_string()
    }
}
