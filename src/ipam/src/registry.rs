use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use super::{allocator::Allocator, error::Error};

/// Directory of live allocators keyed by pool name.
/// The lock is only held for map access, never across an allocation.
#[derive(Debug, Default)]
pub struct AllocatorRegistry {
    inner: RwLock<HashMap<String, Arc<Allocator>>>,
}

impl AllocatorRegistry {
    pub fn new() -> AllocatorRegistry {
        AllocatorRegistry::default()
    }

    pub fn get(&self, name: &str) -> Result<Option<Arc<Allocator>>, Error> {
        let inner = self.inner.read().map_err(|_| Error::FailedToGetLock)?;
        Ok(inner.get(name).cloned())
    }

    /// Registers `allocator` under its pool name, replacing any previous one.
    pub fn insert(&self, allocator: Allocator) -> Result<Arc<Allocator>, Error> {
        let allocator = Arc::new(allocator);
        let mut inner = self.inner.write().map_err(|_| Error::FailedToGetLock)?;
        inner.insert(allocator.name().to_string(), allocator.clone());
        Ok(allocator)
    }

    pub fn remove(&self, name: &str) -> Result<Option<Arc<Allocator>>, Error> {
        let mut inner = self.inner.write().map_err(|_| Error::FailedToGetLock)?;
        Ok(inner.remove(name))
    }

    /// Whether the pool has no allocator yet or its ranges changed.
    pub fn is_stale(&self, name: &str, checksum: &str) -> Result<bool, Error> {
        Ok(match self.get(name)? {
            Some(a) => a.checksum() != checksum,
            None => true,
        })
    }

    pub fn names(&self) -> Result<Vec<String>, Error> {
        let inner = self.inner.read().map_err(|_| Error::FailedToGetLock)?;
        let mut names: Vec<String> = inner.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
