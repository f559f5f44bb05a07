//! [`PublishSink`] – where the background loops hand off what they produce.
//!
//! The status monitor and the frame broadcaster only need "publish this
//! event on that topic, without blocking". Keeping that behind a trait lets
//! the real-time transport change without touching the producers.

use telearm_types::{ArmError, Event};

use crate::bus::{EventBus, Topic};

/// A non-blocking, fan-out publish target.
pub trait PublishSink: Send + Sync {
    /// Publish `event` on `topic`.
    ///
    /// Implementations must return promptly regardless of how slow any
    /// individual subscriber is. Returns the number of subscribers reached.
    fn publish(&self, topic: Topic, event: Event) -> Result<usize, ArmError>;
}

impl PublishSink for EventBus {
    fn publish(&self, topic: Topic, event: Event) -> Result<usize, ArmError> {
        self.publish_to(topic, event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use telearm_types::{EventPayload, Liveness, StatusSnapshot};

    #[tokio::test]
    async fn event_bus_is_a_publish_sink() {
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe_to(Topic::RobotStatus);
        let sink: Arc<dyn PublishSink> = bus.clone();

        let event = Event::new(
            "test",
            EventPayload::RobotStatus(StatusSnapshot::now(Liveness::Connected)),
        );
        assert_eq!(sink.publish(Topic::RobotStatus, event.clone()).unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap().id, event.id);
    }
}
