use std::{
    net::IpAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;

use super::{
    error::Error,
    ledger::{Ledger, Reservation},
};

/// Durable home of a pool's ledger.
///
/// `commit` must fail with [`Error::Conflict`] when the record was changed after
/// the ledger passed to it was loaded.
#[async_trait]
pub trait Store: Send + Sync {
    async fn load(&self) -> Result<Ledger, Error>;

    async fn commit(&self, ledger: Ledger) -> Result<(), Error>;

    /// Reserves `addr` for `owner`. Returns false if someone else holds it.
    async fn reserve(&self, owner: &str, addr: &IpAddr) -> Result<bool, Error> {
        let mut ledger = self.load().await?;
        match ledger.reserve(owner, addr) {
            Reservation::Reserved => {
                self.commit(ledger).await?;
                Ok(true)
            }
            r => Ok(r.is_ok()),
        }
    }

    async fn release(&self, addr: &IpAddr) -> Result<(), Error> {
        let mut ledger = self.load().await?;
        if ledger.release(addr) {
            self.commit(ledger).await?;
        }
        Ok(())
    }

    async fn release_by_owner(&self, owner: &str) -> Result<Vec<String>, Error> {
        let mut ledger = self.load().await?;
        let released = ledger.release_by_owner(owner);
        if !released.is_empty() {
            self.commit(ledger).await?;
        }
        Ok(released)
    }

    async fn last_reserved(&self) -> Result<Option<IpAddr>, Error> {
        Ok(self.load().await?.last_reserved())
    }

    async fn list_by_owner(&self, owner: &str) -> Result<Vec<IpAddr>, Error> {
        Ok(self.load().await?.list_by_owner(owner))
    }
}

/// In-process store. Each commit bumps the version, and stale commits are rejected.
#[derive(Debug, Default)]
pub struct MemoryStore {
    ledger: Mutex<Ledger>,
    conflicts: AtomicUsize,
    commits: AtomicUsize,
}

impl MemoryStore {
    pub fn new(ledger: Ledger) -> MemoryStore {
        MemoryStore {
            ledger: Mutex::new(ledger),
            conflicts: AtomicUsize::new(0),
            commits: AtomicUsize::new(0),
        }
    }

    pub fn with_available(available: i64) -> MemoryStore {
        MemoryStore::new(Ledger {
            total: available,
            available,
            ..Default::default()
        })
    }

    /// The next `n` commits fail with a conflict.
    pub fn inject_conflicts(&self, n: usize) {
        self.conflicts.store(n, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> Result<Ledger, Error> {
        self.ledger
            .lock()
            .map(|l| l.clone())
            .map_err(|_| Error::FailedToGetLock)
    }

    pub fn commit_count(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn load(&self) -> Result<Ledger, Error> {
        self.snapshot()
    }

    async fn commit(&self, mut ledger: Ledger) -> Result<(), Error> {
        if self
            .conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Conflict);
        }
        let mut current = self.ledger.lock().map_err(|_| Error::FailedToGetLock)?;
        if current.version != ledger.version {
            return Err(Error::Conflict);
        }
        let next = current
            .version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;
        ledger.version = Some(next.to_string());
        *current = ledger;
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
