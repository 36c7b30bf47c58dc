//! Shard implementation
//!
//! HashMap-based partition with an RwLock for data and a change epoch
//! for GETWHEN waiters.
//!
//! Deleted keys leave a tombstone holding their last version, so a key
//! that is re-created continues from there instead of reusing versions.

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::Entry;

/// Live entries plus tombstones of deleted keys
#[derive(Default)]
pub(crate) struct ShardMap {
    live: HashMap<Bytes, Entry>,
    retired: HashMap<Bytes, u64>,
}

impl ShardMap {
    pub(crate) fn get(&self, key: &[u8]) -> Option<&Entry> {
        self.live.get(key)
    }

    /// Store `value` under the next version for `key` and return it
    ///
    /// The next version is one past the live entry's, or past the
    /// tombstone's if the key was deleted, or 1 for a key never seen.
    pub(crate) fn insert(&mut self, key: Bytes, value: Bytes) -> u64 {
        let last = match self.live.get(&key) {
            Some(entry) => entry.version,
            None => self.retired.remove(&key).unwrap_or(0),
        };
        let version = last + 1;
        self.live.insert(key, Entry { value, version });
        version
    }

    /// Remove a live entry, leaving a tombstone with its version
    pub(crate) fn remove(&mut self, key: &[u8]) -> Option<Entry> {
        let (key, entry) = self.live.remove_entry(key)?;
        self.retired.insert(key, entry.version);
        Some(entry)
    }

    pub(crate) fn len(&self) -> usize {
        self.live.len()
    }
}

/// One independently locked partition of the keyspace
///
/// ## Concurrency:
/// - `entries`: RwLock (many concurrent readers, exclusive writer),
///   covering live entries and tombstones together
/// - `epoch` + `changed`: bumped and signalled after every mutation,
///   so waiters can sleep without holding `entries`
pub(crate) struct Shard {
    entries: RwLock<ShardMap>,
    epoch: Mutex<u64>,
    changed: Condvar,
}

impl Shard {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(ShardMap::default()),
            epoch: Mutex::new(0),
            changed: Condvar::new(),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, ShardMap> {
        self.entries.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, ShardMap> {
        self.entries.write()
    }

    /// Current change epoch
    pub(crate) fn epoch(&self) -> u64 {
        *self.epoch.lock()
    }

    /// Record a mutation and wake every waiter on this shard
    pub(crate) fn notify(&self) {
        let mut epoch = self.epoch.lock();
        *epoch = epoch.wrapping_add(1);
        self.changed.notify_all();
    }

    /// Sleep until the epoch moves past `observed` or `deadline` passes
    ///
    /// Returns immediately if a mutation already happened since `observed`.
    pub(crate) fn wait_for_change(&self, observed: u64, deadline: Instant) {
        let mut epoch = self.epoch.lock();
        while *epoch == observed {
            if self.changed.wait_until(&mut epoch, deadline).timed_out() {
                return;
            }
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }
}
