//! Single-flight search result cache
//!
//! Results are cached per query fingerprint with a TTL. Each fingerprint
//! owns an async slot mutex: the first caller computes while holding the
//! slot, concurrent identical queries wait on it and get the stored result,
//! and queries with different fingerprints never contend. Failed fetches
//! are never stored. A caller cancelled mid-fetch just releases the slot;
//! the next caller computes from scratch.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

use crate::error::PipelineError;
use crate::release::ReleaseInfo;

struct StoredEntry {
    results: Arc<Vec<ReleaseInfo>>,
    stored_at: Instant,
}

type Slot = Arc<AsyncMutex<Option<StoredEntry>>>;

/// TTL cache over search results, keyed by query fingerprint
pub struct SearchCache {
    ttl: Duration,
    slots: parking_lot::Mutex<HashMap<String, Slot>>,
}

impl SearchCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            slots: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, key: &str) -> Slot {
        self.slots
            .lock()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(None)))
            .clone()
    }

    /// Return the cached results for `key`, or run `compute` and store its
    /// output. The boolean is true for a cache hit.
    ///
    /// The slot stays locked for the whole compute, so identical queries
    /// arriving meanwhile wait for this result instead of hitting the site
    /// again. Errors are returned to every waiter's own compute, never
    /// cached.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: &str,
        compute: F,
    ) -> Result<(Arc<Vec<ReleaseInfo>>, bool), PipelineError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Vec<ReleaseInfo>, PipelineError>>,
    {
        let slot = self.slot(key);
        let mut guard = slot.lock().await;

        if let Some(entry) = guard.as_ref() {
            if entry.stored_at.elapsed() < self.ttl {
                debug!(key, "Search cache hit");
                return Ok((entry.results.clone(), true));
            }
        }

        let results = Arc::new(compute().await?);
        *guard = Some(StoredEntry {
            results: results.clone(),
            stored_at: Instant::now(),
        });
        Ok((results, false))
    }

    /// Drop the entry for `key`. A fetch already in flight finishes into
    /// the detached slot and is forgotten with it.
    pub fn invalidate(&self, key: &str) {
        self.slots.lock().remove(key);
    }

    pub fn clear(&self) {
        self.slots.lock().clear();
    }

    /// Drop expired and empty slots, returning how many were removed.
    /// Slots busy computing are left alone.
    pub fn purge_expired(&self) -> usize {
        let mut slots = self.slots.lock();
        let before = slots.len();
        slots.retain(|_, slot| match slot.try_lock() {
            Ok(mut guard) => match guard.as_ref() {
                Some(entry) if entry.stored_at.elapsed() >= self.ttl => {
                    *guard = None;
                    false
                }
                Some(_) => true,
                None => false,
            },
            Err(_) => true,
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }
}
