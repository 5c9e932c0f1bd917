//! `brick-runtime` – script execution for the brick.
//!
//! # Modules
//!
//! - [`engine`] – the [`ScriptEngine`] boundary, its cooperative
//!   [`AbortSignal`], and [`ProcessScriptEngine`], which pipes code into an
//!   external interpreter.
//! - [`runner`] – [`ScriptRunner`]: one worker thread draining a queue of
//!   scripts, toggling the brick's event-driven mode around each run and
//!   publishing lifecycle events on the brick's event bus.
//! - [`telemetry`] – [`init_tracing`]: global `tracing` subscriber with an
//!   optional OTLP span exporter.

pub mod engine;
pub mod runner;
pub mod telemetry;

pub use engine::{AbortSignal, ProcessScriptEngine, ScriptEngine};
pub use runner::{ScriptOrigin, ScriptRunner};
pub use telemetry::{TracerProviderGuard, init_tracing};
