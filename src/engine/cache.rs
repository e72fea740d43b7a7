// Grantmesh Engine — Result Cache
//
// Time-windowed cache of aggregated answers keyed by a digest of the
// normalized query, the result cap and the canonical filter form.
//
// Two rules, both absolute:
//   • An expired entry is never returned — expiry found on read is
//     discarded on the spot.
//   • The size cap is enforced: after dropping expired entries, the
//     oldest survivors go next until the cache fits.
//
// Racing readers may compute the same answer twice; both writes store an
// identical value, so the duplicate work is harmless.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use log::{debug, info};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::atoms::types::{AggregatedResponse, QueryFilters};
use crate::engine::config::CacheConfig;

struct CacheEntry {
    response: AggregatedResponse,
    stored_at: Instant,
}

pub struct ResultCache {
    entries: Mutex<HashMap<String, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
}

impl ResultCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(Duration::from_secs(config.ttl_seconds), config.max_entries)
    }

    pub fn with_ttl(ttl: Duration, max_entries: usize) -> Self {
        Self { entries: Mutex::new(HashMap::new()), ttl, max_entries }
    }

    /// Deterministic cache key: SHA-256 over the normalized query, the
    /// result cap and the canonically-ordered filters.
    pub fn key(query: &str, max_results: usize, filters: &QueryFilters) -> String {
        let normalized = normalize_query(query);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        hasher.update(b":");
        hasher.update(max_results.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(filters.canonical().as_bytes());
        hasher.finalize().iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// Fetch a live entry, returning its age in seconds alongside.
    pub fn get(&self, key: &str) -> Option<(AggregatedResponse, f64)> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) => {
                let age = entry.stored_at.elapsed();
                if age <= self.ttl {
                    Some((entry.response.clone(), age.as_secs_f64()))
                } else {
                    entries.remove(key);
                    None
                }
            }
            None => None,
        }
    }

    /// Store an answer, pruning when the cap is exceeded.
    pub fn put(&self, key: impl Into<String>, response: AggregatedResponse) {
        let mut entries = self.entries.lock();
        entries.insert(key.into(), CacheEntry { response, stored_at: Instant::now() });

        if entries.len() > self.max_entries {
            let before = entries.len();
            prune(&mut entries, self.ttl, self.max_entries);
            info!("[cache] Pruned {} entries", before - entries.len());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
        debug!("[cache] Cleared");
    }
}

/// Lowercase, trimmed, whitespace-collapsed query form.
fn normalize_query(query: &str) -> String {
    query.to_lowercase().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Drop expired entries first; if the cache is still over the cap, drop
/// the oldest entries until it fits.
fn prune(entries: &mut HashMap<String, CacheEntry>, ttl: Duration, max_entries: usize) {
    entries.retain(|_, entry| entry.stored_at.elapsed() <= ttl);

    while entries.len() > max_entries {
        let oldest = entries
            .iter()
            .min_by_key(|(_, entry)| entry.stored_at)
            .map(|(key, _)| key.clone());
        match oldest {
            Some(key) => {
                entries.remove(&key);
            }
            None => break,
        }
    }
}
