//! Transport abstraction and an in-process implementation
//!
//! Emission is fire-and-forget: components hand a [`Record`] to the transport
//! and never learn whether delivery succeeded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, info, trace};

use crate::records::Record;

/// Default per-topic channel capacity for [`LocalBus`]
pub const DEFAULT_CAPACITY: usize = 100;

/// Publish/subscribe primitives the bridge needs from a transport
pub trait Transport: Send + Sync {
    /// Announce that records will be sent on `topic`
    fn advertise(&self, _topic: &str) {}

    /// Send a record; failures are not reported
    fn send(&self, topic: &str, record: Record);

    /// Receive every record sent on `topic` from now on
    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Record>;
}

/// A transport handle bound to one topic
#[derive(Clone)]
pub struct Publisher {
    transport: Arc<dyn Transport>,
    topic: String,
}

impl Publisher {
    /// Advertise `topic` on the transport and bind to it
    pub fn new(transport: Arc<dyn Transport>, topic: &str) -> Self {
        transport.advertise(topic);
        Self {
            transport,
            topic: topic.to_string(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn publish(&self, record: Record) {
        trace!(topic = %self.topic, kind = record.kind(), "Publishing record");
        self.transport.send(&self.topic, record);
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").field("topic", &self.topic).finish()
    }
}

struct Channel {
    tx: broadcast::Sender<Record>,
    sent: AtomicU64,
}

/// In-process transport: one broadcast channel per topic
pub struct LocalBus {
    capacity: usize,
    channels: RwLock<HashMap<String, Arc<Channel>>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: RwLock::new(HashMap::new()),
        }
    }

    fn channel(&self, topic: &str) -> Arc<Channel> {
        if let Some(channel) = self
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
        {
            return channel.clone();
        }

        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        channels
            .entry(topic.to_string())
            .or_insert_with(|| {
                debug!(topic = %topic, capacity = self.capacity, "Created topic channel");
                let (tx, _) = broadcast::channel(self.capacity);
                Arc::new(Channel {
                    tx,
                    sent: AtomicU64::new(0),
                })
            })
            .clone()
    }

    /// Number of records sent on `topic` so far
    pub fn sent(&self, topic: &str) -> u64 {
        self.channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(topic)
            .map(|c| c.sent.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Topics that have been advertised, sent to, or subscribed to
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        topics.sort();
        topics
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LocalBus {
    fn advertise(&self, topic: &str) {
        self.channel(topic);
        info!(topic = %topic, "Advertised topic");
    }

    fn send(&self, topic: &str, record: Record) {
        let channel = self.channel(topic);
        channel.sent.fetch_add(1, Ordering::Relaxed);
        // No subscribers is not an error
        let _ = channel.tx.send(record);
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<Record> {
        self.channel(topic).tx.subscribe()
    }
}
