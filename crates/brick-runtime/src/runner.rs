//! [`ScriptRunner`] – queued, fire-and-forget script execution.
//!
//! Scripts are executed one at a time on a dedicated worker thread, so a
//! caller handing over a script (for instance a command-socket task) never
//! waits for it to finish.
//!
//! # Events
//!
//! | When | Payload |
//! |---|---|
//! | [`ScriptRunner::run`] with [`ScriptOrigin::File`] | [`EventPayload::ScriptStarted`] |
//! | [`ScriptRunner::run`] with [`ScriptOrigin::Direct`] | [`EventPayload::DirectScriptStarted`] |
//! | the script returns | [`EventPayload::ScriptCompleted`], `error` empty on success or abort |
//!
//! The started event is published by `run` itself, before the script is
//! queued, so it always precedes the matching completion.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use brick_hal::Brick;
use brick_middleware::EventBus;
use brick_types::{BrickError, EventPayload};
use tracing::{debug, info, warn};

use crate::engine::{AbortSignal, ScriptEngine};

const SOURCE: &str = "brick-runtime::runner";

/// Where a script's code came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOrigin {
    /// Loaded from a stored file at this path.
    File(String),
    /// Received inline.
    Direct,
}

struct Job {
    id: u64,
    code: String,
    abort: AbortSignal,
}

type Outstanding = Arc<Mutex<BTreeMap<u64, AbortSignal>>>;

/// Single-worker script queue bound to one [`Brick`].
pub struct ScriptRunner {
    brick: Arc<Brick>,
    events: EventBus,
    next_id: AtomicU64,
    outstanding: Outstanding,
    jobs: Option<Sender<Job>>,
    worker: Option<JoinHandle<()>>,
}

impl ScriptRunner {
    /// Start the worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Process`] when the thread cannot be spawned.
    pub fn new(brick: Arc<Brick>, engine: Box<dyn ScriptEngine>) -> Result<Self, BrickError> {
        let events = brick.event_bus().clone();
        let outstanding: Outstanding = Arc::default();
        let (jobs, queue) = mpsc::channel();

        let worker = {
            let brick = Arc::clone(&brick);
            let events = events.clone();
            let outstanding = Arc::clone(&outstanding);
            thread::Builder::new()
                .name("script-runner".to_string())
                .spawn(move || work(queue, engine, &brick, &events, &outstanding))
                .map_err(|e| BrickError::Process {
                    sensor: "script-runner".to_string(),
                    details: e.to_string(),
                })?
        };

        Ok(Self {
            brick,
            events,
            next_id: AtomicU64::new(1),
            outstanding,
            jobs: Some(jobs),
            worker: Some(worker),
        })
    }

    /// Queue `code` for execution and return its script id.
    pub fn run(&self, code: impl Into<String>, origin: ScriptOrigin) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let abort = AbortSignal::new();
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, abort.clone());

        let started = match origin {
            ScriptOrigin::File(path) => {
                info!(script_id = id, path = %path, "script queued");
                EventPayload::ScriptStarted {
                    path,
                    script_id: id,
                }
            }
            ScriptOrigin::Direct => {
                info!(script_id = id, "direct script queued");
                EventPayload::DirectScriptStarted { script_id: id }
            }
        };
        self.events.publish(SOURCE, started);

        let job = Job {
            id,
            code: code.into(),
            abort,
        };
        let delivered = self.jobs.as_ref().is_some_and(|jobs| jobs.send(job).is_ok());
        if !delivered {
            warn!(script_id = id, "script worker is gone");
            finish(
                &self.events,
                &self.outstanding,
                id,
                "script worker unavailable".to_string(),
            );
        }
        id
    }

    /// Cancel the running script and everything queued behind it, then stop
    /// the brick.  Returns without waiting for the script to notice.
    pub fn abort(&self) {
        let outstanding = self.outstanding.lock().unwrap_or_else(PoisonError::into_inner);
        for (id, signal) in outstanding.iter() {
            debug!(script_id = id, "abort requested");
            signal.abort();
        }
        drop(outstanding);
        self.brick.stop();
    }

    /// Number of scripts queued or running.
    pub fn pending(&self) -> usize {
        self.outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Drop for ScriptRunner {
    fn drop(&mut self) {
        for signal in self
            .outstanding
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
        {
            signal.abort();
        }
        self.jobs.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn work(
    queue: Receiver<Job>,
    mut engine: Box<dyn ScriptEngine>,
    brick: &Brick,
    events: &EventBus,
    outstanding: &Mutex<BTreeMap<u64, AbortSignal>>,
) {
    for job in queue {
        if job.abort.is_aborted() {
            debug!(script_id = job.id, "skipping aborted script");
            finish(events, outstanding, job.id, String::new());
            continue;
        }

        brick.run();
        let result = engine.execute(&job.code, &job.abort);
        brick.reset_event_driven_mode();

        let error = match result {
            _ if job.abort.is_aborted() => {
                info!(script_id = job.id, "script aborted");
                String::new()
            }
            Ok(()) => {
                info!(script_id = job.id, "script finished");
                String::new()
            }
            Err(e) => {
                warn!(script_id = job.id, error = %e, "script failed");
                e
            }
        };
        finish(events, outstanding, job.id, error);
    }
    debug!("script worker stopped");
}

fn finish(
    events: &EventBus,
    outstanding: &Mutex<BTreeMap<u64, AbortSignal>>,
    script_id: u64,
    error: String,
) {
    outstanding
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&script_id);
    events.publish(SOURCE, EventPayload::ScriptCompleted { script_id, error });
}
