//! [`EventBus`] – process-wide notifications between brick components.
//!
//! One [`tokio::sync::broadcast`] channel per [`Topic`]: a slow listener lags
//! and loses old events, it never holds up the publisher.  Publishing does
//! not need a runtime, so the script worker and device threads publish
//! directly.
//!
//! | Topic | Events |
//! |---|---|
//! | [`Topic::Scripts`] | Script started / direct script started / script completed |
//! | [`Topic::SystemAlerts`] | Emergency stops, shutdown requests, hardware faults |

use brick_types::{Event, EventPayload};
use tokio::sync::broadcast;
use tracing::trace;

/// Events buffered per topic before a lagging subscriber starts losing them.
const DEFAULT_CAPACITY: usize = 256;

/// Routing lanes of the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Script lifecycle notifications.
    Scripts,
    /// Board-level alerts: stop, quit, faults.
    SystemAlerts,
}

impl Topic {
    /// The lane a payload travels on when published with [`EventBus::publish`].
    pub fn of(payload: &EventPayload) -> Self {
        match payload {
            EventPayload::ScriptStarted { .. }
            | EventPayload::DirectScriptStarted { .. }
            | EventPayload::ScriptCompleted { .. } => Topic::Scripts,
            EventPayload::BrickStopped
            | EventPayload::Quit
            | EventPayload::HardwareFault { .. } => Topic::SystemAlerts,
        }
    }
}

/// Handle to the bus.  Clones publish into and subscribe from the same
/// channels.
#[derive(Clone, Debug)]
pub struct EventBus {
    scripts: broadcast::Sender<Event>,
    system_alerts: broadcast::Sender<Event>,
}

impl EventBus {
    /// `capacity` events are buffered on each topic separately.
    pub fn new(capacity: usize) -> Self {
        let (scripts, _) = broadcast::channel(capacity);
        let (system_alerts, _) = broadcast::channel(capacity);
        Self {
            scripts,
            system_alerts,
        }
    }

    /// Send `event` on `topic` and return how many subscribers got it
    /// (`0` when nobody listens, which is fine).
    pub fn publish_to(&self, topic: Topic, event: Event) -> usize {
        match self.topic_sender(topic).send(event) {
            Ok(n) => n,
            Err(broadcast::error::SendError(event)) => {
                trace!(?topic, source = %event.source, "event dropped, no subscribers");
                0
            }
        }
    }

    /// Publish `payload` on the topic it belongs to, stamped with `source`.
    pub fn publish(&self, source: &str, payload: EventPayload) -> usize {
        let topic = Topic::of(&payload);
        self.publish_to(topic, Event::new(source, payload))
    }

    /// Listen on one topic.  Only events published after this call arrive.
    pub fn subscribe_to(&self, topic: Topic) -> TopicReceiver {
        TopicReceiver {
            topic,
            receiver: self.topic_sender(topic).subscribe(),
        }
    }

    fn topic_sender(&self, topic: Topic) -> &broadcast::Sender<Event> {
        match topic {
            Topic::Scripts => &self.scripts,
            Topic::SystemAlerts => &self.system_alerts,
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Subscriber side
// ---------------------------------------------------------------------------

/// Subscription returned by [`EventBus::subscribe_to`].
pub struct TopicReceiver {
    topic: Topic,
    receiver: broadcast::Receiver<Event>,
}

impl TopicReceiver {
    /// Next event.  `RecvError::Lagged(n)` means `n` events were lost to a
    /// full buffer; `RecvError::Closed` that every bus handle is gone.
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`TopicReceiver::recv`] for synchronous callers.
    pub fn try_recv(&mut self) -> Result<Event, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn topic(&self) -> Topic {
        self.topic
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_routes_by_payload() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut scripts = bus.subscribe_to(Topic::Scripts);
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);

        bus.publish("test", EventPayload::DirectScriptStarted { script_id: 1 });
        bus.publish("test", EventPayload::BrickStopped);

        assert_eq!(
            scripts.recv().await?.payload,
            EventPayload::DirectScriptStarted { script_id: 1 }
        );
        assert_eq!(alerts.recv().await?.payload, EventPayload::BrickStopped);
        assert!(scripts.try_recv().is_err());
        Ok(())
    }

    #[test]
    fn publish_without_subscribers_is_not_an_error() {
        let bus = EventBus::default();
        assert_eq!(bus.publish("test", EventPayload::Quit), 0);
    }

    #[tokio::test]
    async fn every_subscriber_gets_a_copy() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut first = bus.subscribe_to(Topic::SystemAlerts);
        let mut second = bus.subscribe_to(Topic::SystemAlerts);

        assert_eq!(bus.publish("test", EventPayload::Quit), 2);

        assert_eq!(first.recv().await?.payload, EventPayload::Quit);
        assert_eq!(second.recv().await?.payload, EventPayload::Quit);
        Ok(())
    }

    #[tokio::test]
    async fn subscriber_does_not_receive_other_topic_events() {
        let bus = EventBus::default();
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let _scripts = bus.subscribe_to(Topic::Scripts);

        bus.publish(
            "test",
            EventPayload::ScriptCompleted {
                script_id: 3,
                error: String::new(),
            },
        );

        let result =
            tokio::time::timeout(std::time::Duration::from_millis(50), alerts.recv()).await;
        assert!(result.is_err(), "alerts must not see script events");
    }

    #[tokio::test]
    async fn slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(8);
        let mut slow = bus.subscribe_to(Topic::Scripts);

        for script_id in 0..100 {
            bus.publish("flood", EventPayload::DirectScriptStarted { script_id });
        }

        let result = slow.recv().await;
        assert!(
            matches!(result, Err(broadcast::error::RecvError::Lagged(_))),
            "slow subscriber should lag, got {result:?}"
        );
    }
}
