//! [`CommandServer`] – TCP front end for remote script control.
//!
//! Listens on `0.0.0.0:8888` (configurable via [`CommandServer::with_port`]).
//! Every accepted socket gets its own [`Connection`] task.  A [`Messenger`]
//! obtained before the server starts can push text to every connected peer.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use brick_types::BrickError;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::connection::{Connection, Dispatcher, ScriptHost};
use crate::storage::Storage;

/// Default TCP port of the command protocol.
pub const DEFAULT_PORT: u16 = 8888;

/// Handle for sending raw text to connected peers.
#[derive(Clone, Default)]
pub struct Messenger {
    peers: Arc<Mutex<BTreeMap<u64, mpsc::UnboundedSender<String>>>>,
}

impl Messenger {
    /// Write `text` to every connected peer, unframed.  Returns how many
    /// peers it was queued for.
    pub fn send_message(&self, text: &str) -> usize {
        let peers = self.peers.lock().unwrap_or_else(PoisonError::into_inner);
        peers
            .values()
            .filter(|outbox| outbox.send(text.to_string()).is_ok())
            .count()
    }

    pub fn peer_count(&self) -> usize {
        self.peers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn register(&self, id: u64) -> mpsc::UnboundedReceiver<String> {
        let (outbox, inbox) = mpsc::unbounded_channel();
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, outbox);
        inbox
    }

    fn unregister(&self, id: u64) {
        self.peers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }
}

pub struct CommandServer {
    dispatcher: Arc<Dispatcher>,
    messenger: Messenger,
    port: u16,
}

impl CommandServer {
    /// Create a server on the [`DEFAULT_PORT`].
    pub fn new(storage: Arc<dyn Storage>, scripts: Arc<dyn ScriptHost>) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(storage, scripts)),
            messenger: Messenger::default(),
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Handle for [`Messenger::send_message`]; stays valid after the server
    /// is moved into [`run`](Self::run).
    pub fn messenger(&self) -> Messenger {
        self.messenger.clone()
    }

    /// Bind the configured port and serve forever.
    ///
    /// # Errors
    ///
    /// Returns [`BrickError::Io`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), BrickError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BrickError::io(addr, e))?;
        self.serve(listener).await
    }

    /// Accept connections on an already bound listener.
    pub async fn serve(self, listener: TcpListener) -> Result<(), BrickError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "command server listening");
        }
        let next_id = AtomicU64::new(1);

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let id = next_id.fetch_add(1, Ordering::Relaxed);
                    debug!(connection = id, %peer, "accepted");
                    let inbox = self.messenger.register(id);
                    let messenger = self.messenger.clone();
                    let connection = Connection::new(id, Arc::clone(&self.dispatcher));
                    tokio::spawn(async move {
                        connection.run(stream, inbox).await;
                        messenger.unregister(id);
                    });
                }
                Err(e) => warn!(error = %e, "accept failed"),
            }
        }
    }
}
