//! One-shot empty signals

use scenelink_core::{Publisher, Record, Transport};
use std::sync::Arc;
use tracing::error;

use crate::error::BridgeError;

/// Publishes an empty record each time [`SignalEmitter::signal`] is called
pub struct SignalEmitter {
    transport: Arc<dyn Transport>,
    publisher: Option<Publisher>,
}

impl SignalEmitter {
    /// Create an emitter with no destination yet
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            publisher: None,
        }
    }

    pub fn set_topic(&mut self, topic: &str) {
        self.publisher = Some(Publisher::new(self.transport.clone(), topic));
    }

    pub fn topic(&self) -> Option<&str> {
        self.publisher.as_ref().map(Publisher::topic)
    }

    /// Send one signal. Without a topic this reports and does nothing.
    pub fn signal(&self) -> Result<(), BridgeError> {
        let Some(publisher) = &self.publisher else {
            error!("Signal emitted without any topic");
            return Err(BridgeError::NoTopic);
        };
        publisher.publish(Record::Signal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scenelink_core::LocalBus;

    #[test]
    fn test_unconfigured_signal_is_noop() {
        let bus = Arc::new(LocalBus::new());
        let emitter = SignalEmitter::new(bus.clone());

        assert!(matches!(emitter.signal(), Err(BridgeError::NoTopic)));
        assert!(emitter.topic().is_none());
        assert!(bus.topics().is_empty());
    }

    #[test]
    fn test_signal_after_topic() {
        let bus = Arc::new(LocalBus::new());
        let mut rx = bus.subscribe("start");
        let mut emitter = SignalEmitter::new(bus.clone());

        emitter.set_topic("start");
        emitter.signal().unwrap();
        emitter.signal().unwrap();

        assert_eq!(emitter.topic(), Some("start"));
        assert_eq!(rx.try_recv().unwrap(), Record::Signal);
        assert_eq!(rx.try_recv().unwrap(), Record::Signal);
        assert_eq!(bus.sent("start"), 2);
    }
}
