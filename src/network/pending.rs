//! Registries of in-flight connections
//!
//! Sockets still connecting and channels still handshaking are tracked so
//! that shutdown can cancel them and self-connections can be recognized.
//! Each entry is removed exactly once, by its owner or by `stop_all`.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, PoisonError, RwLock};

/// An object that can sit in a [`Pending`] registry.
pub trait Pendable: Send + Sync {
    type Key: Eq + Hash + Copy + Debug + Send + Sync;

    fn key(&self) -> Self::Key;

    /// Abort the in-flight operation.
    fn cancel(&self, code: Error);
}

pub struct Pending<T: Pendable> {
    name: &'static str,
    entries: RwLock<HashMap<T::Key, Arc<T>>>,
}

impl<T: Pendable> Pending<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn exists(&self, key: &T::Key) -> bool {
        self.read().contains_key(key)
    }

    /// True if any entry satisfies `predicate`.
    pub fn any<F>(&self, predicate: F) -> bool
    where
        F: Fn(&T) -> bool,
    {
        self.read().values().any(|entry| predicate(entry))
    }

    pub fn count_where<F>(&self, predicate: F) -> usize
    where
        F: Fn(&T) -> bool,
    {
        self.read().values().filter(|entry| predicate(entry)).count()
    }

    /// Add an entry; fails with `AddressInUse` if the key is present.
    pub fn insert(&self, entry: Arc<T>) -> Result<()> {
        let key = entry.key();
        let mut entries = self.write();
        if entries.contains_key(&key) {
            return Err(Error::AddressInUse);
        }
        entries.insert(key, entry);
        log::trace!("Pending {} +{:?} ({})", self.name, key, entries.len());
        Ok(())
    }

    /// Remove an entry; fails with `NotFound` if absent.
    pub fn remove(&self, key: &T::Key) -> Result<Arc<T>> {
        let mut entries = self.write();
        let entry = entries.remove(key).ok_or(Error::NotFound)?;
        log::trace!("Pending {} -{:?} ({})", self.name, key, entries.len());
        Ok(entry)
    }

    pub fn count(&self) -> usize {
        self.read().len()
    }

    /// Drain the registry and cancel every entry with `code`.
    pub fn stop_all(&self, code: Error) {
        let drained: Vec<Arc<T>> = self.write().drain().map(|(_, entry)| entry).collect();
        if !drained.is_empty() {
            log::debug!("Canceling {} pending {}", drained.len(), self.name);
        }
        for entry in drained {
            entry.cancel(code.clone());
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<T::Key, Arc<T>>> {
        self.entries.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<T::Key, Arc<T>>> {
        self.entries.write().unwrap_or_else(PoisonError::into_inner)
    }
}
