//! Per-name mutual exclusion.
//!
//! Only names that are currently held occupy the table, so it stays as small
//! as the number of concurrent holders no matter how many distinct names pass
//! through it.

use std::collections::HashSet;
use std::sync::{Condvar, Mutex, MutexGuard};

/// A lock table keyed by blob name.
#[derive(Debug, Default)]
pub struct KeyedMutex {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

/// Holds the lock for one name until dropped.
#[derive(Debug)]
pub struct KeyedGuard<'a> {
    owner: &'a KeyedMutex,
    name: String,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block until `name` is free, then take it.
    pub fn lock(&self, name: &str) -> KeyedGuard<'_> {
        let mut held = self.table();
        while held.contains(name) {
            held = self
                .released
                .wait(held)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
        held.insert(name.to_string());

        KeyedGuard {
            owner: self,
            name: name.to_string(),
        }
    }

    /// Take `name` only if nobody holds it.
    pub fn try_lock(&self, name: &str) -> Option<KeyedGuard<'_>> {
        let mut held = self.table();
        if !held.insert(name.to_string()) {
            return None;
        }
        Some(KeyedGuard {
            owner: self,
            name: name.to_string(),
        })
    }

    /// Number of names currently held.
    pub fn held(&self) -> usize {
        self.table().len()
    }

    // The set is always left consistent, so a poisoned lock is still usable.
    fn table(&self) -> MutexGuard<'_, HashSet<String>> {
        self.held.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl KeyedGuard<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for KeyedGuard<'_> {
    fn drop(&mut self) {
        self.owner.table().remove(&self.name);
        self.owner.released.notify_all();
    }
}
