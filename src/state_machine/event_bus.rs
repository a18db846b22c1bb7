//! Event bus for topology changes
//!
//! The state machine describes each applied command as a list of events;
//! the runtime tags them with the resulting topology version and broadcasts
//! them here. Subscribers that fall behind lose the oldest events and should
//! re-read the topology snapshot instead.

use super::event::TopologyEvent;
use crate::topology::Version;
use tokio::sync::broadcast;

/// An event together with the topology version that produced it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedEvent {
    pub version: Version,
    pub event: TopologyEvent,
}

pub struct EventBus {
    tx: broadcast::Sender<VersionedEvent>,
}

impl EventBus {
    /// Create a bus buffering at most `capacity` events per subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish one event to all subscribers
    ///
    /// A subscriber whose buffer is full loses its oldest event.
    ///
    /// # Arguments
    /// * `version` - Topology version the event was produced at
    /// * `event` - The event to broadcast
    ///
    /// # Returns
    /// Number of subscribers that received the event
    pub fn publish(&self, version: Version, event: TopologyEvent) -> usize {
        // Err only means nobody is listening
        self.tx.send(VersionedEvent { version, event }).unwrap_or(0)
    }

    /// Publish every event of one applied command, in order
    ///
    /// # Arguments
    /// * `version` - Topology version after the command was applied
    /// * `events` - Events of that command
    ///
    /// # Returns
    /// Total number of event deliveries across all subscribers
    pub fn publish_batch(&self, version: Version, events: Vec<TopologyEvent>) -> usize {
        events
            .into_iter()
            .map(|event| self.publish(version, event))
            .sum()
    }

    /// Receive all future events. Past events are not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<VersionedEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}
