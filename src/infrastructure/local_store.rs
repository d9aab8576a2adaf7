use crate::domain::models::{Space, TimeEntry};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::storage::KeyValueStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use tracing::warn;

pub const SPACES_KEY: &str = "spaces";
pub const ENTRIES_KEY: &str = "timeEntries";
pub const KNOWN_SPACES_KEY: &str = "known_synced_spaces";
pub const KNOWN_ENTRIES_KEY: &str = "known_synced_entries";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Space,
    Entry,
}

impl RecordKind {
    pub fn ledger_key(self) -> &'static str {
        match self {
            Self::Space => KNOWN_SPACES_KEY,
            Self::Entry => KNOWN_ENTRIES_KEY,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Space => "spaces",
            Self::Entry => "time_entries",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalSnapshot {
    pub spaces: Vec<Space>,
    pub entries: Vec<TimeEntry>,
}

/// Device-local entity sets and sync ledgers on top of a key-value store.
/// Every write of the entity sets goes through [`LocalRepository::update`],
/// which holds the write lock across the read-modify-write.
pub struct LocalRepository<K: KeyValueStore + ?Sized> {
    store: Arc<K>,
    write_lock: Mutex<()>,
}

impl<K: KeyValueStore + ?Sized> LocalRepository<K> {
    pub fn new(store: Arc<K>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn load_spaces(&self) -> Result<Vec<Space>, InfraError> {
        self.read_json(SPACES_KEY)
    }

    pub fn load_entries(&self) -> Result<Vec<TimeEntry>, InfraError> {
        self.read_json(ENTRIES_KEY)
    }

    pub fn snapshot(&self) -> Result<LocalSnapshot, InfraError> {
        Ok(LocalSnapshot {
            spaces: self.load_spaces()?,
            entries: self.load_entries()?,
        })
    }

    /// Applies `mutate` to the current entity sets and persists whatever
    /// changed. Concurrent callers are serialized.
    pub fn update<T>(
        &self,
        mutate: impl FnOnce(&mut LocalSnapshot) -> Result<T, InfraError>,
    ) -> Result<T, InfraError> {
        let _guard = self.lock_writes()?;
        let before = self.snapshot()?;
        let mut after = before.clone();
        let output = mutate(&mut after)?;

        if after.spaces != before.spaces {
            self.write_json(SPACES_KEY, &after.spaces)?;
        }
        if after.entries != before.entries {
            self.write_json(ENTRIES_KEY, &after.entries)?;
        }
        Ok(output)
    }

    /// Ids last confirmed as synchronized. A value that does not parse is
    /// treated as an empty ledger.
    pub fn load_ledger(&self, kind: RecordKind) -> Result<BTreeSet<String>, InfraError> {
        let Some(raw) = self.store.get(kind.ledger_key())? else {
            return Ok(BTreeSet::new());
        };
        match serde_json::from_str::<Vec<String>>(&raw) {
            Ok(ids) => Ok(ids.into_iter().collect()),
            Err(error) => {
                warn!(kind = kind.label(), %error, "ignoring unreadable sync ledger");
                Ok(BTreeSet::new())
            }
        }
    }

    pub fn save_ledger(&self, kind: RecordKind, ids: &BTreeSet<String>) -> Result<(), InfraError> {
        self.write_json(kind.ledger_key(), &ids.iter().collect::<Vec<_>>())
    }

    /// Persists both entity sets and both ledgers in one batch under the
    /// write lock.
    pub fn commit_merge<T>(
        &self,
        merge: impl FnOnce(&mut LocalSnapshot) -> Result<(T, BTreeSet<String>, BTreeSet<String>), InfraError>,
    ) -> Result<T, InfraError> {
        let _guard = self.lock_writes()?;
        let mut snapshot = self.snapshot()?;
        let (output, space_ledger, entry_ledger) = merge(&mut snapshot)?;
        self.store.set_many(&[
            (SPACES_KEY, serde_json::to_string(&snapshot.spaces)?),
            (ENTRIES_KEY, serde_json::to_string(&snapshot.entries)?),
            (KNOWN_SPACES_KEY, serde_json::to_string(&space_ledger)?),
            (KNOWN_ENTRIES_KEY, serde_json::to_string(&entry_ledger)?),
        ])?;
        Ok(output)
    }

    pub fn clear_all(&self) -> Result<(), InfraError> {
        let _guard = self.lock_writes()?;
        self.store
            .remove_many(&[SPACES_KEY, ENTRIES_KEY, KNOWN_SPACES_KEY, KNOWN_ENTRIES_KEY])
    }

    fn lock_writes(&self) -> Result<std::sync::MutexGuard<'_, ()>, InfraError> {
        self.write_lock
            .lock()
            .map_err(|error| InfraError::InvalidConfig(format!("local store lock poisoned: {error}")))
    }

    fn read_json<T: DeserializeOwned>(&self, key: &str) -> Result<Vec<T>, InfraError> {
        match self.store.get(key)? {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<(), InfraError> {
        let payload = serde_json::to_string(value)?;
        self.store.set(key, &payload)
    }
}
