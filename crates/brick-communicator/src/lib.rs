//! `brick-communicator` – remote control of the brick over TCP.
//!
//! A peer (usually the desktop IDE) connects to the [`CommandServer`] and
//! sends plain-text [`Command`]s to upload scripts, run them, or stop the
//! running one.  Script errors travel back to peers through a [`Messenger`].

pub mod command;
pub mod connection;
pub mod server;
pub mod storage;

#[cfg(test)]
mod testing;

pub use command::Command;
pub use connection::{Connection, ConnectionState, Dispatcher, ScriptHost};
pub use server::{CommandServer, DEFAULT_PORT, Messenger};
pub use storage::{FsStorage, Storage};
