//! Parsed-program cache
//!
//! Keeps one parsed [`Program`] per script id together with the SHA-256 of
//! the source it was parsed from. A lookup with different source re-parses
//! and replaces the entry.

use crate::error::Result;
use crate::lang::{parse_source, Program};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Source fingerprint
pub type SourceHash = [u8; 32];

/// Hash script source
pub fn hash_source(source: &str) -> SourceHash {
    Sha256::digest(source.as_bytes()).into()
}

/// How a lookup was served
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Same id, same source
    Hit,
    /// Id not cached yet
    Miss,
    /// Id cached with different source; entry replaced
    Replaced,
}

/// Cache entry with metadata
#[derive(Debug, Clone)]
struct CacheEntry {
    hash: SourceHash,
    program: Arc<Program>,

    /// Tick of the last lookup that returned this entry
    last_used: u64,
}

/// AST cache with LRU eviction
#[derive(Debug)]
pub struct AstCache {
    entries: DashMap<String, CacheEntry>,
    capacity: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl AstCache {
    /// Create a cache holding at most `capacity` programs (0 = unbounded)
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get the parsed program for `script_id`, parsing `source` if the id is
    /// not cached or its source changed. Parse failures are not cached.
    pub fn get_or_parse(&self, script_id: &str, source: &str) -> Result<(Arc<Program>, CacheOutcome)> {
        let hash = hash_source(source);
        let tick = self.tick();

        let mut outcome = CacheOutcome::Miss;
        if let Some(mut entry) = self.entries.get_mut(script_id) {
            if entry.hash == hash {
                entry.last_used = tick;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok((Arc::clone(&entry.program), CacheOutcome::Hit));
            }
            outcome = CacheOutcome::Replaced;
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let program = match parse_source(source) {
            Ok(program) => Arc::new(program),
            Err(e) => {
                if outcome == CacheOutcome::Replaced {
                    self.entries.remove(script_id);
                }
                return Err(e);
            }
        };

        if outcome == CacheOutcome::Miss {
            self.evict_if_needed();
        }

        self.entries.insert(
            script_id.to_string(),
            CacheEntry {
                hash,
                program: Arc::clone(&program),
                last_used: tick,
            },
        );
        debug!("Cached AST for script {} ({:?})", script_id, outcome);

        Ok((program, outcome))
    }

    /// Drop the entry for `script_id`
    pub fn invalidate(&self, script_id: &str) -> bool {
        self.entries.remove(script_id).is_some()
    }

    pub fn contains(&self, script_id: &str) -> bool {
        self.entries.contains_key(script_id)
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    /// Remove least recently used entries until one more fits
    fn evict_if_needed(&self) {
        if self.capacity == 0 || self.entries.len() < self.capacity {
            return;
        }

        let mut entries: Vec<(String, u64)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.last_used))
            .collect();

        // Oldest first
        entries.sort_by_key(|&(_, used)| used);

        for (script_id, _) in entries {
            if self.entries.len() < self.capacity {
                break;
            }
            self.entries.remove(&script_id);
            debug!("Evicted AST for script {}", script_id);
        }
    }
}

impl Default for AstCache {
    fn default() -> Self {
        Self::new(512)
    }
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
}
