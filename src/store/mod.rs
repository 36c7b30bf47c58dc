//! Store Module
//!
//! The shared in-memory key-value map.
//!
//! ## Responsibilities
//! - Single-key atomic get/put/delete
//! - Per-key versions for conditional (compare-and-swap) updates
//! - Bounded waits on another key's value (GETWHEN)
//!
//! ## Concurrency Model: Sharded Locks
//! The keyspace is split into a fixed number of shards, each guarded by its
//! own RwLock. A key always maps to `crc32(key) % shard_count`. Every
//! operation touches exactly one shard lock, so there is no lock ordering
//! to get wrong and contention is limited to keys that share a shard.
//!
//! ```text
//!            crc32(key) % N
//!                 │
//!   ┌─────────┬───┴─────┬─────────┐
//!   ▼         ▼         ▼         ▼
//! ┌──────┐ ┌──────┐ ┌──────┐ ┌──────┐
//! │Shard0│ │Shard1│ │Shard2│ │ ..N-1│
//! │RwLock│ │RwLock│ │RwLock│ │RwLock│
//! └──────┘ └──────┘ └──────┘ └──────┘
//! ```

mod shard;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytes::Bytes;

use crate::error::{KvError, Result};
use shard::Shard;

/// A stored value and its version
///
/// Entries are never mutated in place: a PUT swaps in a fresh Entry, and
/// readers hold their own `Bytes` handle to the value they observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    /// The value payload
    pub value: Bytes,

    /// Starts at 1, incremented by every successful PUT
    ///
    /// Never reused for a key: after a DELETE the next PUT continues from
    /// the deleted entry's version.
    pub version: u64,
}

/// Sharded, thread-safe key-value store
pub struct Store {
    shards: Vec<Shard>,
    closed: AtomicBool,
}

impl Store {
    /// Create a store with `shards` partitions
    pub fn new(shards: usize) -> Result<Self> {
        if shards == 0 {
            return Err(KvError::Config("store needs at least one shard".into()));
        }

        Ok(Self {
            shards: (0..shards).map(|_| Shard::new()).collect(),
            closed: AtomicBool::new(false),
        })
    }

    /// Number of shards
    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index a key maps to
    pub fn shard_index(&self, key: &[u8]) -> usize {
        crc32fast::hash(key) as usize % self.shards.len()
    }

    fn shard_for(&self, key: &[u8]) -> &Shard {
        &self.shards[self.shard_index(key)]
    }

    /// Get the entry for a key (shard read lock)
    pub fn get(&self, key: &[u8]) -> Option<Entry> {
        self.shard_for(key).read().get(key).cloned()
    }

    /// Put a value, optionally only if the current version matches
    ///
    /// An absent key has version 0, so `expected = Some(0)` means
    /// "create only", even for a key that was deleted. Returns the new
    /// version, which is higher than any version the key had before.
    pub fn put(&self, key: Bytes, value: Bytes, expected: Option<u64>) -> Result<u64> {
        let shard = self.shard_for(&key);

        let version = {
            let mut entries = shard.write();
            let actual = entries.get(&key).map_or(0, |e| e.version);

            if let Some(expected) = expected {
                if expected != actual {
                    return Err(KvError::VersionConflict { expected, actual });
                }
            }

            entries.insert(key, value)
        };

        shard.notify();
        Ok(version)
    }

    /// Delete a key, optionally only if the current version matches
    ///
    /// Absence is reported as `NotFound` before any version check.
    pub fn delete(&self, key: &[u8], expected: Option<u64>) -> Result<()> {
        let shard = self.shard_for(key);

        {
            let mut entries = shard.write();
            let actual = match entries.get(key) {
                Some(entry) => entry.version,
                None => return Err(KvError::NotFound),
            };

            if let Some(expected) = expected {
                if expected != actual {
                    return Err(KvError::VersionConflict { expected, actual });
                }
            }

            entries.remove(key);
        }

        shard.notify();
        Ok(())
    }

    /// Wait until `cond_key` holds `cond_value`, then read `key`
    ///
    /// The wait holds no shard lock. Fails with `WaitTimeout` once `timeout`
    /// elapses and with `StoreClosed` if the store is closed meanwhile.
    /// The final read of `key` is a separate single-key read.
    pub fn get_when(
        &self,
        key: &[u8],
        cond_key: &[u8],
        cond_value: &[u8],
        timeout: Duration,
    ) -> Result<Option<Entry>> {
        let cond_shard = self.shard_for(cond_key);
        let deadline = Instant::now() + timeout;

        loop {
            // Sample the epoch before checking, so a write that lands between
            // the check and the sleep is not missed.
            let observed = cond_shard.epoch();

            if self.is_closed() {
                return Err(KvError::StoreClosed);
            }

            let satisfied = cond_shard
                .read()
                .get(cond_key)
                .is_some_and(|e| e.value.as_ref() == cond_value);
            if satisfied {
                break;
            }

            if Instant::now() >= deadline {
                return Err(KvError::WaitTimeout);
            }

            cond_shard.wait_for_change(observed, deadline);
        }

        Ok(self.get(key))
    }

    /// Wake every GETWHEN waiter and refuse new waits
    ///
    /// Plain reads and writes keep working.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for shard in &self.shards {
            shard.notify();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of keys across all shards
    ///
    /// Shards are counted one at a time, so the total is not a snapshot.
    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Key count per shard, for spotting skew
    pub fn shard_sizes(&self) -> Vec<usize> {
        self.shards.iter().map(Shard::len).collect()
    }
}
