//! Dispatcher Module
//!
//! Routes decoded operations to the store and turns store results into
//! replies. Expected outcomes (absent key, version conflict, wait timeout)
//! become `Reply` variants; nothing here is fatal to a session.

use std::sync::Arc;
use std::time::Duration;

use crate::error::KvError;
use crate::protocol::{Operation, Reply};
use crate::store::Store;

/// Applies operations to a shared store
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<Store>,

    /// Upper bound on a single GETWHEN wait
    get_when_timeout: Duration,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, get_when_timeout: Duration) -> Self {
        Self {
            store,
            get_when_timeout,
        }
    }

    /// Apply one operation
    ///
    /// No retries: the caller sees exactly what the store decided.
    pub fn apply(&self, operation: Operation) -> Reply {
        match operation {
            Operation::Get { key } => match self.store.get(&key) {
                Some(entry) => Reply::Value {
                    value: entry.value,
                    version: entry.version,
                },
                None => Reply::NotFound,
            },
            Operation::Put {
                key,
                value,
                expected,
            } => match self.store.put(key, value, expected) {
                Ok(version) => Reply::Written { version },
                Err(e) => Self::failure(e),
            },
            Operation::Delete { key, expected } => match self.store.delete(&key, expected) {
                Ok(()) => Reply::Deleted,
                Err(e) => Self::failure(e),
            },
            Operation::GetWhen {
                key,
                cond_key,
                cond_value,
            } => match self
                .store
                .get_when(&key, &cond_key, &cond_value, self.get_when_timeout)
            {
                Ok(Some(entry)) => Reply::Value {
                    value: entry.value,
                    version: entry.version,
                },
                Ok(None) => Reply::NotFound,
                Err(e) => Self::failure(e),
            },
            Operation::Ping => Reply::Pong,
        }
    }

    fn failure(error: KvError) -> Reply {
        match error {
            KvError::NotFound => Reply::NotFound,
            KvError::VersionConflict { actual, .. } => Reply::VersionConflict { actual },
            KvError::WaitTimeout => Reply::TimedOut,
            other => Reply::Error(other.to_string()),
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }
}
