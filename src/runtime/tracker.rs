//! Tracking of in-flight fenced operations
//!
//! Every long-running operation a node performs on behalf of the topology
//! (streaming, for instance) registers itself with the version it was
//! started under. `barrier_and_drain` waits until no operation started under
//! an older version is still running.

use crate::topology::Version;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

#[derive(Default)]
pub struct OperationTracker {
    /// Version -> number of running operations started under it
    running: Mutex<BTreeMap<Version, usize>>,
    finished: Notify,
}

/// Keeps an operation registered until dropped
pub struct OperationGuard {
    tracker: Arc<OperationTracker>,
    version: Version,
}

impl OperationGuard {
    pub fn version(&self) -> Version {
        self.version
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        self.tracker.finish(self.version);
    }
}

impl OperationTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register an operation started under `version`
    pub fn start(self: &Arc<Self>, version: Version) -> OperationGuard {
        *self
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(version)
            .or_insert(0) += 1;
        OperationGuard {
            tracker: Arc::clone(self),
            version,
        }
    }

    fn finish(&self, version: Version) {
        {
            let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
            if let Some(count) = running.get_mut(&version) {
                *count -= 1;
                if *count == 0 {
                    running.remove(&version);
                }
            }
        }
        self.finished.notify_waiters();
    }

    /// Number of running operations started before `version`
    pub fn running_below(&self, version: Version) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .range(..version)
            .map(|(_, count)| count)
            .sum()
    }

    /// Wait until every operation started before `version` has finished
    pub async fn drain_below(&self, version: Version) {
        loop {
            // Registered before the check so a finish in between is not missed
            let finished = self.finished.notified();
            if self.running_below(version) == 0 {
                return;
            }
            finished.await;
        }
    }
}
