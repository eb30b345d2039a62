//! Cache memory manager with epoch-based preload cancellation
//!
//! Tracks bytes held by the frame cache and hands out an epoch counter.
//! Every seek bumps the epoch so preload jobs queued for the old play
//! position see a stale epoch and skip their work.

use log::{debug, info};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Memory budget and epoch shared by the cache and the preload workers
#[derive(Debug)]
pub struct CacheManager {
    /// Atomically tracked memory usage (bytes)
    memory_usage: Arc<AtomicUsize>,
    /// Maximum allowed memory (bytes), 0 = unbounded
    max_memory_bytes: AtomicUsize,
    /// Epoch counter for cancelling stale requests
    current_epoch: Arc<AtomicU64>,
}

impl CacheManager {
    /// Create a manager with a memory budget in megabytes (0 = unbounded).
    pub fn new(max_memory_mb: usize) -> Self {
        let max_memory_bytes = max_memory_mb.saturating_mul(1024 * 1024);
        info!(
            "CacheManager init: limit={}",
            if max_memory_bytes == 0 {
                "unbounded".to_string()
            } else {
                format!("{} MB", max_memory_mb)
            }
        );

        Self {
            memory_usage: Arc::new(AtomicUsize::new(0)),
            max_memory_bytes: AtomicUsize::new(max_memory_bytes),
            current_epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn unbounded() -> Self {
        Self::new(0)
    }

    /// Increment epoch and return new value
    ///
    /// Call this when the play position jumps to cancel pending preloads.
    pub fn increment_epoch(&self) -> u64 {
        let new_epoch = self.current_epoch.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Epoch incremented: {}", new_epoch);
        new_epoch
    }

    pub fn current_epoch(&self) -> u64 {
        self.current_epoch.load(Ordering::Relaxed)
    }

    /// Shared epoch counter (for Workers)
    pub fn epoch_ref(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.current_epoch)
    }

    /// True when a budget is set and usage is above it
    pub fn check_memory_limit(&self) -> bool {
        let limit = self.max_memory_bytes.load(Ordering::Relaxed);
        limit > 0 && self.memory_usage.load(Ordering::Relaxed) > limit
    }

    /// Memory statistics (usage, limit)
    pub fn mem(&self) -> (usize, usize) {
        let usage = self.memory_usage.load(Ordering::Relaxed);
        let limit = self.max_memory_bytes.load(Ordering::Relaxed);
        (usage, limit)
    }

    /// Usage as a fraction of the budget (0.0 when unbounded)
    pub fn mem_usage_fraction(&self) -> f64 {
        let (usage, limit) = self.mem();
        if limit == 0 {
            0.0
        } else {
            usage as f64 / limit as f64
        }
    }

    pub fn add_memory(&self, bytes: usize) {
        let new_usage = self.memory_usage.fetch_add(bytes, Ordering::Relaxed) + bytes;
        let limit = self.max_memory_bytes.load(Ordering::Relaxed);
        if limit > 0 && new_usage > limit {
            debug!(
                "Memory limit exceeded: {} KB / {} KB",
                new_usage / 1024,
                limit / 1024
            );
        }
    }

    /// Free memory usage (saturating subtraction to prevent underflow)
    pub fn free_memory(&self, bytes: usize) {
        let _ = self
            .memory_usage
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |current| {
                Some(current.saturating_sub(bytes))
            });
    }

    pub fn set_memory_limit(&self, max_memory_mb: usize) {
        let new_limit = max_memory_mb.saturating_mul(1024 * 1024);
        self.max_memory_bytes.store(new_limit, Ordering::Relaxed);
        info!("Memory limit updated: {} MB", max_memory_mb);
    }
}

impl Default for CacheManager {
    fn default() -> Self {
        Self::unbounded()
    }
}
