//! Process-wide keyed connection pool
//!
//! Adapters share engine connections keyed by `(address, username,
//! token-presence)`. Handles are reference-counted; a background reaper
//! closes entries that have been idle past the threshold.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::{Duration, Instant};

use super::backend::{BackendError, VectorBackend};

/// Reaper cadence.
const REAP_INTERVAL: Duration = Duration::from_secs(300);

/// Default idle lifetime before a zero-refcount entry is closed.
pub const DEFAULT_IDLE_REAP: Duration = Duration::from_millis(600_000);

/// Connection target for a vector engine.
#[derive(Debug, Clone)]
pub struct StoreTarget {
    pub address: String,
    pub username: Option<String>,
    pub token: Option<String>,
}

impl StoreTarget {
    pub fn embedded() -> Self {
        Self {
            address: "memory://".to_string(),
            username: None,
            token: None,
        }
    }

    fn key(&self) -> PoolKey {
        PoolKey {
            address: self.address.clone(),
            username: self.username.clone().unwrap_or_default(),
            has_token: self.token.is_some(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PoolKey {
    address: String,
    username: String,
    has_token: bool,
}

struct PoolSlot {
    backend: Arc<dyn VectorBackend>,
    refcount: usize,
    idle_since: Option<Instant>,
}

pub type BackendFactory =
    Box<dyn Fn(&StoreTarget) -> Result<Arc<dyn VectorBackend>, BackendError> + Send + Sync>;

pub struct ConnectionPool {
    entries: Mutex<HashMap<PoolKey, PoolSlot>>,
    factory: BackendFactory,
    idle_reap: Duration,
}

impl ConnectionPool {
    /// Create a pool and start its reaper thread. The thread holds only a
    /// weak reference and exits once the pool is dropped.
    pub fn new(factory: BackendFactory, idle_reap: Duration) -> Arc<Self> {
        let pool = Arc::new(Self {
            entries: Mutex::new(HashMap::new()),
            factory,
            idle_reap,
        });

        let weak: Weak<ConnectionPool> = Arc::downgrade(&pool);
        std::thread::Builder::new()
            .name("codesync-pool-reaper".into())
            .spawn(move || loop {
                std::thread::sleep(REAP_INTERVAL);
                match weak.upgrade() {
                    Some(pool) => {
                        let reaped = pool.reap_idle();
                        if reaped > 0 {
                            tracing::info!(reaped, "Reaped idle vector-store connections");
                        }
                    }
                    None => break,
                }
            })
            .ok();

        pool
    }

    /// Retrieve-or-create the pooled connection for a target and take a
    /// reference-counted handle on it.
    pub fn acquire(pool: &Arc<Self>, target: &StoreTarget) -> Result<PoolHandle, BackendError> {
        let key = target.key();
        let mut entries = pool.lock();
        if let Some(slot) = entries.get_mut(&key) {
            slot.refcount += 1;
            slot.idle_since = None;
            return Ok(PoolHandle {
                pool: Arc::clone(pool),
                key,
                backend: Arc::clone(&slot.backend),
            });
        }

        let backend = (pool.factory)(target)?;
        tracing::info!(address = %target.address, "Opened vector-store connection");
        entries.insert(
            key.clone(),
            PoolSlot {
                backend: Arc::clone(&backend),
                refcount: 1,
                idle_since: None,
            },
        );
        Ok(PoolHandle {
            pool: Arc::clone(pool),
            key,
            backend,
        })
    }

    /// Close entries with no holders that have been idle past the
    /// threshold. Returns the number of closed entries.
    pub fn reap_idle(&self) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        let threshold = self.idle_reap;
        entries.retain(|key, slot| {
            let expired = slot.refcount == 0
                && slot
                    .idle_since
                    .map(|t| t.elapsed() > threshold)
                    .unwrap_or(false);
            if expired {
                tracing::debug!(address = %key.address, "Closing idle connection");
            }
            !expired
        });
        before - entries.len()
    }

    /// `(address, refcount)` per live entry, for counters.
    pub fn connection_counts(&self) -> Vec<(String, usize)> {
        let entries = self.lock();
        let mut counts: Vec<(String, usize)> = entries
            .iter()
            .map(|(key, slot)| (key.address.clone(), slot.refcount))
            .collect();
        counts.sort();
        counts
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn release(&self, key: &PoolKey) {
        let mut entries = self.lock();
        if let Some(slot) = entries.get_mut(key) {
            slot.refcount = slot.refcount.saturating_sub(1);
            if slot.refcount == 0 {
                slot.idle_since = Some(Instant::now());
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<PoolKey, PoolSlot>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Reference-counted handle to a pooled connection. Dropping the handle
/// releases the reference; the entry becomes reapable once idle.
pub struct PoolHandle {
    pool: Arc<ConnectionPool>,
    key: PoolKey,
    backend: Arc<dyn VectorBackend>,
}

impl PoolHandle {
    pub fn backend(&self) -> &dyn VectorBackend {
        self.backend.as_ref()
    }
}

impl Drop for PoolHandle {
    fn drop(&mut self) {
        self.pool.release(&self.key);
    }
}
