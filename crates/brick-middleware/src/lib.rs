//! `brick-middleware` – event routing for the brick process.
//!
//! Every asynchronous notification in the system (script lifecycle, emergency
//! stops, shutdown requests, hardware faults) travels over the [`EventBus`]
//! instead of direct callbacks, so producers never need to know which thread
//! will observe an event.
//!
//! # Modules
//!
//! - [`bus`] – typed, topic-based publish/subscribe event bus built on Tokio
//!   broadcast channels.

pub mod bus;

pub use bus::{EventBus, Topic, TopicReceiver};
