//! Schema caching with configurable TTL.
//!
//! Holds the table list fetched for each database so repeated `get_schema`
//! calls within the TTL do not hit the server. Entries are only ever
//! replaced whole; concurrent refreshes of one key race and the last writer
//! wins.

use crate::database::TableSchema;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::debug;

/// Table list shared between the cache and callers.
pub type SchemaSnapshot = Arc<Vec<TableSchema>>;

/// Cache entry containing a schema snapshot and its capture time.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// The cached table list.
    pub tables: SchemaSnapshot,

    /// When the entry was captured.
    pub captured_at: Instant,
}

impl CacheEntry {
    pub fn new(tables: SchemaSnapshot) -> Self {
        Self {
            tables,
            captured_at: Instant::now(),
        }
    }

    /// An entry is valid while `now - captured_at < ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        self.captured_at.elapsed() >= ttl
    }

    pub fn age(&self) -> Duration {
        self.captured_at.elapsed()
    }
}

/// Cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Total number of cache hits.
    pub hits: u64,

    /// Total number of cache misses, expired entries included.
    pub misses: u64,

    /// Number of entries currently held.
    pub entry_count: usize,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

/// Per-database schema cache.
///
/// Keys are database names exactly as supplied by the caller.
pub struct SchemaCache {
    entries: RwLock<HashMap<String, CacheEntry>>,
    ttl: Duration,
    stats: RwLock<CacheStats>,
}

impl SchemaCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            stats: RwLock::new(CacheStats::default()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Get a valid snapshot for `database`.
    pub async fn get(&self, database: &str) -> Option<SchemaSnapshot> {
        let hit = {
            let entries = self.entries.read().await;
            entries
                .get(database)
                .filter(|entry| !entry.is_expired(self.ttl))
                .map(|entry| (Arc::clone(&entry.tables), entry.age()))
        };

        let mut stats = self.stats.write().await;
        match hit {
            Some((tables, age)) => {
                stats.hits += 1;
                debug!(database, age_ms = age.as_millis() as u64, "Schema cache hit");
                Some(tables)
            }
            None => {
                stats.misses += 1;
                debug!(database, "Schema cache miss");
                None
            }
        }
    }

    /// Store a fresh snapshot, replacing any previous entry.
    pub async fn insert(&self, database: &str, tables: SchemaSnapshot) {
        let mut entries = self.entries.write().await;
        entries.insert(database.to_string(), CacheEntry::new(tables));
        self.stats.write().await.entry_count = entries.len();
    }

    /// Clear all entries from the cache.
    pub async fn clear(&self) {
        let mut entries = self.entries.write().await;
        entries.clear();
        self.stats.write().await.entry_count = 0;
    }

    /// Get cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let entries = self.entries.read().await;
        let mut stats = self.stats.read().await.clone();
        stats.entry_count = entries.len();
        stats
    }
}
