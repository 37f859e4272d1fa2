use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::connection::Connection;

/// A pooled connection. The mutex serializes every call made through it.
pub type SharedConnection = Arc<Mutex<Box<dyn Connection>>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub host_id: String,
    pub credential_id: String,
}

impl PoolKey {
    pub fn new(host_id: impl Into<String>, credential_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            credential_id: credential_id.into(),
        }
    }
}

struct Entry {
    connection: SharedConnection,
    /// Logical clock value of the last successful liveness check.
    validated_at: u64,
}

/// Result of offering a fresh connection to the pool.
pub enum Insert {
    /// The key was free; `evicted` is the entry pushed out to stay in capacity.
    Inserted { evicted: Option<(PoolKey, SharedConnection)> },
    /// Another caller pooled a connection for this key first.
    Existing(SharedConnection),
}

/// Bounded map of live connections keyed by (host, credential).
///
/// Holds no I/O; the channel manager decides liveness and closes whatever
/// the pool hands back.
pub struct ChannelPool {
    capacity: usize,
    clock: u64,
    entries: HashMap<PoolKey, Entry>,
}

impl ChannelPool {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            clock: 0,
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &PoolKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &PoolKey) -> Option<SharedConnection> {
        self.entries.get(key).map(|e| Arc::clone(&e.connection))
    }

    pub fn mark_validated(&mut self, key: &PoolKey) {
        self.clock += 1;
        if let Some(entry) = self.entries.get_mut(key) {
            entry.validated_at = self.clock;
        }
    }

    pub fn insert(&mut self, key: PoolKey, connection: SharedConnection) -> Insert {
        if let Some(existing) = self.entries.get(&key) {
            return Insert::Existing(Arc::clone(&existing.connection));
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_stalest()
        } else {
            None
        };

        self.clock += 1;
        self.entries.insert(
            key,
            Entry {
                connection,
                validated_at: self.clock,
            },
        );
        Insert::Inserted { evicted }
    }

    pub fn remove(&mut self, key: &PoolKey) -> Option<SharedConnection> {
        self.entries.remove(key).map(|e| e.connection)
    }

    /// Remove the entry for `key` only if it still holds `connection`; a
    /// concurrent worker may already have replaced it.
    pub fn remove_if_same(&mut self, key: &PoolKey, connection: &SharedConnection) -> Option<SharedConnection> {
        let same = self
            .entries
            .get(key)
            .is_some_and(|e| Arc::ptr_eq(&e.connection, connection));
        if same {
            self.remove(key)
        } else {
            None
        }
    }

    /// Remove every entry whose key matches, returning the removed connections.
    pub fn remove_where(&mut self, mut pred: impl FnMut(&PoolKey) -> bool) -> Vec<SharedConnection> {
        let keys: Vec<PoolKey> = self.entries.keys().filter(|k| pred(k)).cloned().collect();
        keys.iter().filter_map(|k| self.remove(k)).collect()
    }

    pub fn drain(&mut self) -> Vec<SharedConnection> {
        self.entries.drain().map(|(_, e)| e.connection).collect()
    }

    fn evict_stalest(&mut self) -> Option<(PoolKey, SharedConnection)> {
        let key = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.validated_at)
            .map(|(k, _)| k.clone())?;
        let entry = self.entries.remove(&key)?;
        Some((key, entry.connection))
    }
}
