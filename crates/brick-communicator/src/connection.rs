//! One command-socket connection and the dispatcher behind it.
//!
//! ```text
//! Unbound --run(stream)--> Bound --peer closes / read error--> Closed
//!                          Bound --command--> Bound (dispatch)
//! ```
//!
//! There is no framing: every successful read is treated as one complete
//! command.  Outgoing messages arrive on the connection's outbox and are
//! written to the peer verbatim.

use std::net::SocketAddr;
use std::sync::Arc;

use brick_runtime::{ScriptOrigin, ScriptRunner};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::command::Command;
use crate::storage::Storage;

const READ_BUFFER: usize = 64 * 1024;

/// The script side of the command protocol.
pub trait ScriptHost: Send + Sync {
    /// Queue `code` without waiting for it; returns the script id.
    fn run(&self, code: String, origin: ScriptOrigin) -> u64;

    /// Ask the running script to stop.  Must not block.
    fn abort(&self);
}

impl ScriptHost for ScriptRunner {
    fn run(&self, code: String, origin: ScriptOrigin) -> u64 {
        ScriptRunner::run(self, code, origin)
    }

    fn abort(&self) {
        ScriptRunner::abort(self);
    }
}

/// Turns decoded commands into storage and script actions.
pub struct Dispatcher {
    storage: Arc<dyn Storage>,
    scripts: Arc<dyn ScriptHost>,
}

impl Dispatcher {
    pub fn new(storage: Arc<dyn Storage>, scripts: Arc<dyn ScriptHost>) -> Self {
        Self { storage, scripts }
    }

    /// Decode and act on one received message.  Failures are logged, never
    /// returned: a bad command must not take the connection down.
    pub fn dispatch(&self, raw: &str) -> Option<Command> {
        let command = match Command::parse(raw) {
            Ok(command) => command,
            Err(e) => {
                warn!(error = %e, "dropping command");
                return None;
            }
        };
        if command.is_keepalive() {
            trace!("keepalive");
        } else {
            debug!(command = raw, "command received");
        }

        match &command {
            Command::Keepalive | Command::Unknown => {}
            Command::WriteFile { name, contents } => {
                if let Err(e) = self.storage.write(name, contents) {
                    warn!(file = %name, error = %e, "cannot store file");
                }
            }
            Command::RunFile { path } => match self.storage.read(path) {
                Ok(code) => {
                    self.scripts.run(code, ScriptOrigin::File(path.clone()));
                }
                Err(e) => warn!(file = %path, error = %e, "cannot load script"),
            },
            Command::Stop => self.scripts.abort(),
            Command::RunDirect { code } => {
                self.scripts.run(code.clone(), ScriptOrigin::Direct);
            }
        }
        Some(command)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Unbound,
    Bound,
    Closed,
}

pub struct Connection {
    id: u64,
    state: ConnectionState,
    dispatcher: Arc<Dispatcher>,
}

impl Connection {
    pub fn new(id: u64, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            id,
            state: ConnectionState::Unbound,
            dispatcher,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Drive the connection until the peer goes away.
    ///
    /// Commands are dispatched in arrival order on the blocking pool so the
    /// reactor never waits on storage or hardware.
    pub async fn run(
        mut self,
        stream: TcpStream,
        mut outbox: mpsc::UnboundedReceiver<String>,
    ) -> ConnectionState {
        let peer = stream
            .peer_addr()
            .map_or_else(|_| "unknown".to_string(), |addr: SocketAddr| addr.to_string());
        self.state = ConnectionState::Bound;
        info!(connection = self.id, peer = %peer, "peer connected");

        let (mut reader, mut writer) = stream.into_split();
        let mut buf = vec![0u8; READ_BUFFER];
        let mut outbox_open = true;

        while self.state == ConnectionState::Bound {
            tokio::select! {
                read = reader.read(&mut buf) => match read {
                    Ok(0) => self.state = ConnectionState::Closed,
                    Ok(n) => {
                        let raw = String::from_utf8_lossy(&buf[..n]).into_owned();
                        let dispatcher = Arc::clone(&self.dispatcher);
                        if let Err(e) = tokio::task::spawn_blocking(move || dispatcher.dispatch(&raw)).await {
                            warn!(connection = self.id, error = %e, "command dispatch panicked");
                        }
                    }
                    Err(e) => {
                        warn!(connection = self.id, peer = %peer, error = %e, "read failed");
                        self.state = ConnectionState::Closed;
                    }
                },
                message = outbox.recv(), if outbox_open => match message {
                    Some(text) => {
                        if let Err(e) = writer.write_all(text.as_bytes()).await {
                            warn!(connection = self.id, peer = %peer, error = %e, "write failed");
                            self.state = ConnectionState::Closed;
                        }
                    }
                    None => outbox_open = false,
                },
            }
        }

        info!(connection = self.id, peer = %peer, "peer disconnected");
        self.state
    }
}
