use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Lifecycle bounds for unconfirmed scans.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    pub ttl: Option<Duration>,
    pub max_entries: Option<usize>,
}

impl EvictionPolicy {
    #[cfg(test)]
    pub fn unbounded() -> Self {
        Self {
            ttl: None,
            max_entries: None,
        }
    }
}

struct PendingScan {
    image: Bytes,
    stored_at: Instant,
}

/// Image bytes of analyzed scans waiting for the client to confirm them,
/// keyed by scan id. Shared by every connection.
pub struct PendingScanStore {
    policy: EvictionPolicy,
    entries: Mutex<HashMap<String, PendingScan>>,
}

impl PendingScanStore {
    pub fn new(policy: EvictionPolicy) -> Self {
        Self {
            policy,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, PendingScan>> {
        // The map is never left half-updated, so a poisoned lock is still usable.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Stores the image for `id`, replacing any previous entry.
    pub fn put(&self, id: impl Into<String>, image: Bytes) {
        let mut entries = self.lock();
        entries.insert(
            id.into(),
            PendingScan {
                image,
                stored_at: Instant::now(),
            },
        );

        if let Some(max) = self.policy.max_entries {
            while entries.len() > max {
                let oldest = entries
                    .iter()
                    .min_by_key(|(_, scan)| scan.stored_at)
                    .map(|(id, _)| id.clone());
                let Some(oldest) = oldest else { break };
                entries.remove(&oldest);
                debug!(scan_id = %oldest, "pending scan evicted (capacity)");
            }
        }
    }

    /// Removes and returns the image for `id`. Lookup and removal happen under
    /// one lock, so at most one caller ever gets a given entry.
    pub fn take(&self, id: &str) -> Option<Bytes> {
        let scan = self.lock().remove(id)?;
        if self.is_expired(&scan, Instant::now()) {
            debug!(scan_id = %id, "pending scan expired before confirm");
            return None;
        }
        Some(scan.image)
    }

    /// Drops the entry for `id`. Returns whether one existed.
    pub fn discard(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Removes every entry older than the TTL as of `now`.
    pub fn sweep_expired(&self, now: Instant) -> usize {
        if self.policy.ttl.is_none() {
            return 0;
        }
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, scan| !self.is_expired(scan, now));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, scan: &PendingScan, now: Instant) -> bool {
        match self.policy.ttl {
            Some(ttl) => now.saturating_duration_since(scan.stored_at) >= ttl,
            None => false,
        }
    }
}

/// Runs `sweep_expired` every `every`. Abort the handle to stop it.
pub fn spawn_sweeper(store: Arc<PendingScanStore>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            let removed = store.sweep_expired(Instant::now());
            if removed > 0 {
                info!(removed, remaining = store.len(), "swept expired pending scans");
            }
        }
    })
}
