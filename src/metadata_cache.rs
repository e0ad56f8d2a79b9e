// src/metadata_cache.rs
//
// Per-adapter cache of object metadata, keyed by object name.
//
// Entries are filled on the first stat of a key and dropped whenever the adapter
// writes or deletes that key. A missing entry always means "go ask the backend";
// negative results are never cached.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::backend::ObjectMetadata;

/// Cached metadata with the time it was observed
#[derive(Debug, Clone)]
struct CachedStat {
    metadata: ObjectMetadata,
    cached_at: Instant,
}

/// Epochs of tickets not yet dropped, with how many tickets hold each.
type LiveTickets = Arc<Mutex<BTreeMap<u64, usize>>>;

/// Snapshot of the cache epoch taken before a live stat.
///
/// A fill carrying a ticket older than the key's last invalidation is dropped,
/// so a stat that raced with a save or delete cannot put stale metadata back.
/// The ticket stays live until it is consumed by `fill` or dropped; only live
/// tickets keep invalidation records around.
#[derive(Debug)]
pub struct FillTicket {
    epoch: u64,
    live: LiveTickets,
}

impl Drop for FillTicket {
    fn drop(&mut self) {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = live.get_mut(&self.epoch) {
            *count -= 1;
            if *count == 0 {
                live.remove(&self.epoch);
            }
        }
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<String, CachedStat>,
    /// Epoch at which each key was last invalidated
    invalidated_at: HashMap<String, u64>,
    /// Epoch of the last `clear`, which invalidates every key at once
    cleared_at: u64,
    epoch: u64,
}

/// Thread-safe metadata cache.
///
/// Entries are unbounded unless a TTL is given; with one, `clear_expired`
/// drops stale entries. Invalidation records only live as long as some
/// in-flight stat could still be affected by them.
#[derive(Debug)]
pub struct MetadataCache {
    state: RwLock<CacheState>,
    live: LiveTickets,
    /// `None` keeps entries until invalidated
    ttl: Option<Duration>,
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataCache {
    /// Cache without expiry.
    pub fn new() -> Self {
        Self::with_ttl(None)
    }

    pub fn with_ttl(ttl: Option<Duration>) -> Self {
        Self {
            state: RwLock::new(CacheState::default()),
            live: LiveTickets::default(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    fn oldest_live_ticket(&self) -> Option<u64> {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .next()
            .copied()
    }

    /// Forget invalidations no live ticket predates; they can no longer reject a fill.
    fn prune_fences(&self, state: &mut CacheState) {
        match self.oldest_live_ticket() {
            None => state.invalidated_at.clear(),
            Some(oldest) => state.invalidated_at.retain(|_, &mut epoch| epoch > oldest),
        }
    }

    fn is_expired(&self, entry: &CachedStat) -> bool {
        self.ttl.is_some_and(|ttl| entry.cached_at.elapsed() >= ttl)
    }

    /// Cached metadata for `key`, if present and not expired.
    pub async fn get(&self, key: &str) -> Option<ObjectMetadata> {
        let state = self.state.read().await;
        match state.entries.get(key) {
            Some(entry) if !self.is_expired(entry) => {
                tracing::trace!("Cache HIT: {} ({} bytes)", key, entry.metadata.size);
                Some(entry.metadata.clone())
            }
            Some(entry) => {
                tracing::trace!("Cache EXPIRED: {} (age: {:?})", key, entry.cached_at.elapsed());
                None
            }
            None => {
                tracing::trace!("Cache MISS: {}", key);
                None
            }
        }
    }

    /// Take a ticket before issuing a live stat for a missed key.
    pub async fn ticket(&self) -> FillTicket {
        // Registered under the read lock, so an invalidation either sees this
        // ticket as live or bumps the epoch before it is taken.
        let state = self.state.read().await;
        let epoch = state.epoch;
        *self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(epoch)
            .or_insert(0) += 1;
        FillTicket {
            epoch,
            live: Arc::clone(&self.live),
        }
    }

    /// Store metadata observed with `ticket`.
    ///
    /// Returns false, and stores nothing, if `key` was invalidated after the
    /// ticket was taken.
    pub async fn fill(&self, key: &str, metadata: ObjectMetadata, ticket: FillTicket) -> bool {
        let mut state = self.state.write().await;
        let stale = state.cleared_at > ticket.epoch
            || state
                .invalidated_at
                .get(key)
                .is_some_and(|&epoch| epoch > ticket.epoch);
        drop(ticket);
        self.prune_fences(&mut state);
        if stale {
            tracing::debug!("Discarding stat of {} that raced with an invalidation", key);
            return false;
        }
        tracing::trace!("Caching: {} → {} bytes", key, metadata.size);
        state.entries.insert(
            key.to_string(),
            CachedStat {
                metadata,
                cached_at: Instant::now(),
            },
        );
        true
    }

    /// Drop any entry for `key` and fence off in-flight fills for it.
    pub async fn invalidate(&self, key: &str) {
        let mut state = self.state.write().await;
        state.epoch += 1;
        let epoch = state.epoch;
        state.invalidated_at.insert(key.to_string(), epoch);
        self.prune_fences(&mut state);
        if state.entries.remove(key).is_some() {
            tracing::trace!("Invalidated: {}", key);
        }
    }

    /// Clear expired entries from cache
    pub async fn clear_expired(&self) {
        let mut state = self.state.write().await;
        let before_count = state.entries.len();
        let ttl = self.ttl;
        state.entries.retain(|key, entry| {
            let expired = ttl.is_some_and(|ttl| entry.cached_at.elapsed() >= ttl);
            if expired {
                tracing::debug!("Removing expired cache entry: {}", key);
            }
            !expired
        });
        self.prune_fences(&mut state);
        let removed = before_count - state.entries.len();
        if removed > 0 {
            tracing::info!("Cleared {} expired cache entries ({} remain)", removed, state.entries.len());
        }
    }

    /// Clear all entries from cache.
    ///
    /// Counts as an invalidation of every key, so fills already in flight are dropped.
    pub async fn clear(&self) {
        let mut state = self.state.write().await;
        state.epoch += 1;
        state.cleared_at = state.epoch;
        state.entries.clear();
        state.invalidated_at.clear();
        tracing::debug!("Cleared all cache entries");
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.entries.is_empty()
    }

    /// Get cache statistics
    pub async fn stats(&self) -> CacheStats {
        let state = self.state.read().await;
        let expired = state.entries.values().filter(|e| self.is_expired(e)).count();
        CacheStats {
            total_entries: state.entries.len(),
            expired_entries: expired,
            fenced_keys: state.invalidated_at.len(),
        }
    }
}

/// Statistics about cache state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cached entries
    pub total_entries: usize,

    /// Number of entries that have expired (but not yet cleared)
    pub expired_entries: usize,

    /// Invalidations still held to fence off in-flight stats
    pub fenced_keys: usize,
}

impl CacheStats {
    /// Number of valid (non-expired) entries
    pub fn valid_entries(&self) -> usize {
        self.total_entries - self.expired_entries
    }
}
