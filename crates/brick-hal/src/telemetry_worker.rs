//! [`TelemetryWorker`] – bridge to an out-of-process line detector.
//!
//! The detector is a child process speaking a line protocol.  Commands go to
//! its stdin, one per line (`video_out 1`, `detect`, `hsv ...`).  Its stdout is
//! parsed on a dedicated thread:
//!
//! | Record | Effect |
//! |---|---|
//! | `loc: <x> <crossroad> <mass>` | replaces the [`LineReading`] |
//! | `hsv: <h> <ht> <s> <st> <v> <vt>` | stores the calibration and replies `hsv` with tolerances scaled by the configured factor |
//!
//! The sample lives behind an [`RwLock`]: the parser holds the write side for
//! exactly one record, readers take a copy under the read side.  Lines that
//! are short, carry an unknown tag, or fail to parse are dropped.  Bytes that
//! are not UTF-8 are replaced before parsing, so they never end the stream.
//!
//! When the detector exits the last sample stays readable; nothing respawns
//! it.

use std::io::{BufRead, BufReader, Write};
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use brick_types::{BrickError, HsvCalibration, LineReading, TelemetrySample};
use tracing::{debug, info, trace, warn};

use crate::config::LineSensorConfig;

type CommandSink = Arc<Mutex<Box<dyn Write + Send>>>;

/// One parsed detector record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Record {
    Location(LineReading),
    Hsv(HsvCalibration),
}

fn parse_record(line: &str) -> Result<Option<Record>, BrickError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (arity, tag) = match tokens.first() {
        Some(&"loc:") => (3, "loc:"),
        Some(&"hsv:") => (6, "hsv:"),
        _ => return Ok(None),
    };
    if tokens.len() < arity + 1 {
        return Err(BrickError::Protocol(format!(
            "'{tag}' record needs {arity} values: '{line}'"
        )));
    }
    let mut values = [0i32; 6];
    for (slot, token) in values.iter_mut().zip(&tokens[1..=arity]) {
        *slot = token
            .parse()
            .map_err(|e| BrickError::Protocol(format!("bad value '{token}' in '{line}': {e}")))?;
    }
    let record = match tag {
        "loc:" => Record::Location(LineReading([values[0], values[1], values[2]])),
        _ => Record::Hsv(HsvCalibration {
            hue: values[0],
            hue_tolerance: values[1],
            saturation: values[2],
            saturation_tolerance: values[3],
            value: values[4],
            value_tolerance: values[5],
        }),
    };
    Ok(Some(record))
}

fn calibration_command(calibration: &HsvCalibration) -> String {
    format!(
        "hsv {} {} {} {} {} {}",
        calibration.hue,
        calibration.hue_tolerance,
        calibration.saturation,
        calibration.saturation_tolerance,
        calibration.value,
        calibration.value_tolerance
    )
}

fn send(name: &str, sink: &CommandSink, command: &str) -> Result<(), BrickError> {
    let mut writer = sink.lock().unwrap_or_else(PoisonError::into_inner);
    trace!(sensor = name, command, "detector command");
    writer
        .write_all(command.as_bytes())
        .and_then(|()| writer.write_all(b"\n"))
        .and_then(|()| writer.flush())
        .map_err(|e| BrickError::Process {
            sensor: name.to_string(),
            details: format!("cannot send '{command}': {e}"),
        })
}

/// Owner of one detector process and its parser thread.
pub struct TelemetryWorker {
    name: String,
    sample: Arc<RwLock<TelemetrySample>>,
    commands: CommandSink,
    initialized: AtomicBool,
    child: Option<Child>,
    parser: Option<JoinHandle<()>>,
}

impl TelemetryWorker {
    /// Start the detector described by `config`.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Process`] when the program cannot be started.
    pub fn spawn(name: &str, config: &LineSensorConfig) -> Result<Self, BrickError> {
        let process_err = |details: String| BrickError::Process {
            sensor: name.to_string(),
            details,
        };
        let mut command = Command::new(&config.program);
        command
            .args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null());
        // Own process group, so wrapper scripts die together with the detector.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .map_err(|e| process_err(format!("cannot start '{}': {e}", config.program)))?;
        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            terminate(&mut child);
            return Err(process_err("detector pipes unavailable".to_string()));
        };
        info!(sensor = name, program = %config.program, pid = child.id(), "detector started");
        Self::from_io(
            name,
            BufReader::new(stdout),
            stdin,
            config.tolerance_factor,
            Some(child),
        )
    }

    /// Drive the parser from arbitrary streams.  `child`, when given, is
    /// killed on drop.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Process`] when the parser thread cannot start.
    pub fn from_io<R, W>(
        name: &str,
        reader: R,
        writer: W,
        tolerance_factor: f64,
        child: Option<Child>,
    ) -> Result<Self, BrickError>
    where
        R: BufRead + Send + 'static,
        W: Write + Send + 'static,
    {
        let sample = Arc::new(RwLock::new(TelemetrySample::default()));
        let commands: CommandSink = Arc::new(Mutex::new(Box::new(writer)));

        let parser = {
            let name = name.to_string();
            let sample = Arc::clone(&sample);
            let commands = Arc::clone(&commands);
            thread::Builder::new()
                .name(format!("telemetry-{name}"))
                .spawn(move || parse_stream(&name, reader, &sample, &commands, tolerance_factor))
        };
        let parser = match parser {
            Ok(handle) => handle,
            Err(e) => {
                if let Some(mut child) = child {
                    terminate(&mut child);
                }
                return Err(BrickError::Process {
                    sensor: name.to_string(),
                    details: format!("cannot start parser thread: {e}"),
                });
            }
        };

        Ok(Self {
            name: name.to_string(),
            sample,
            commands,
            initialized: AtomicBool::new(false),
            child,
            parser: Some(parser),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Enable the detector.  Only the first call sends anything.
    pub fn init(&self, show_on_display: bool) -> Result<(), BrickError> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.send_command(if show_on_display {
            "video_out 1"
        } else {
            "video_out 0"
        })
    }

    /// Ask the detector to lock onto the line currently in view.
    pub fn detect(&self) -> Result<(), BrickError> {
        self.send_command("detect")
    }

    /// Write one newline-terminated command to the detector.
    pub fn send_command(&self, command: &str) -> Result<(), BrickError> {
        send(&self.name, &self.commands, command)
    }

    /// Copy of the latest reading.
    pub fn read(&self) -> LineReading {
        self.sample
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .reading
    }

    /// Last calibration reported by the detector, unscaled.
    pub fn calibration(&self) -> Option<HsvCalibration> {
        self.sample
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calibration
    }

    /// Copy of the whole sample.
    pub fn sample(&self) -> TelemetrySample {
        *self.sample.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the parser is still consuming detector output.
    pub fn is_running(&self) -> bool {
        self.parser.as_ref().is_some_and(|p| !p.is_finished())
    }
}

impl Drop for TelemetryWorker {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            terminate(&mut child);
        }
        if let Some(parser) = self.parser.take() {
            let _ = parser.join();
        }
        debug!(sensor = %self.name, "telemetry worker stopped");
    }
}

/// Kill the detector together with everything it started, then reap it.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: plain syscall on a process group this worker created.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

fn parse_stream<R: BufRead>(
    name: &str,
    mut reader: R,
    sample: &RwLock<TelemetrySample>,
    commands: &CommandSink,
    tolerance_factor: f64,
) {
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!(sensor = name, error = %e, "detector output unreadable");
                break;
            }
        }
        let line = String::from_utf8_lossy(&raw);
        let line = line.trim_end_matches(['\n', '\r']);
        match parse_record(line) {
            Ok(Some(Record::Location(reading))) => {
                sample.write().unwrap_or_else(PoisonError::into_inner).reading = reading;
            }
            Ok(Some(Record::Hsv(calibration))) => {
                sample
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .calibration = Some(calibration);
                let reply = calibration_command(&calibration.scaled(tolerance_factor));
                if let Err(e) = send(name, commands, &reply) {
                    warn!(sensor = name, error = %e, "calibration reply failed");
                }
            }
            Ok(None) => trace!(sensor = name, line, "unrecognised detector line"),
            Err(e) => debug!(sensor = name, error = %e, "detector line dropped"),
        }
    }
    let err = BrickError::Process {
        sensor: name.to_string(),
        details: "detector output closed".to_string(),
    };
    warn!(sensor = name, error = %err, "keeping last sample");
}
