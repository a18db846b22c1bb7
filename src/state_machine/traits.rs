//! State machine trait
//!
//! Commands come from consensus (committed entries); events go to the event bus.

use serde::{Deserialize, Serialize};

/// A deterministic state machine driven by committed log entries.
///
/// Implementations are responsible for:
/// - applying commands to update internal state
/// - describing what changed as events
/// - snapshotting and restoring their full state
pub trait StateMachine: Send + Sync {
    /// Command type (must be serializable for the log)
    type Command: Serialize + for<'de> Deserialize<'de> + Send + Sync;

    /// Event type (broadcast to local subscribers)
    type Event: Clone + Send + Sync;

    type Error: std::error::Error + Send + Sync + 'static;

    /// Apply a committed command.
    ///
    /// A rejected command must leave the state untouched so every replica
    /// rejects it identically.
    fn apply(&mut self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;

    /// Serialize the full state
    fn snapshot(&self) -> Result<Vec<u8>, Self::Error>;

    /// Replace the state with a previously taken snapshot
    fn restore(&mut self, snapshot: &[u8]) -> Result<(), Self::Error>;
}
