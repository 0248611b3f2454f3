use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::net::TcpStream;

use super::error::Error;

#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, address: &str, timeout: Duration) -> Result<(), Error>;
}

/// Checks that a TCP connection to the target can be established.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str, timeout: Duration) -> Result<(), Error> {
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::Timeout(address.to_string()))?
            .map_err(|e| Error::Connect {
                address: address.to_string(),
                reason: e.to_string(),
            })?;
        drop(stream);
        Ok(())
    }
}

/// Answers probes from a table set by the caller. Unknown targets fail.
#[derive(Debug, Default)]
pub struct ScriptedProber {
    results: Mutex<HashMap<String, bool>>,
    calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> ScriptedProber {
        ScriptedProber::default()
    }

    pub fn set(&self, address: &str, reachable: bool) {
        if let Ok(mut results) = self.results.lock() {
            results.insert(address.to_string(), reachable);
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, address: &str, _timeout: Duration) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reachable = self
            .results
            .lock()
            .map_err(|_| Error::FailedToGetLock)?
            .get(address)
            .copied()
            .unwrap_or(false);
        if reachable {
            Ok(())
        } else {
            Err(Error::Connect {
                address: address.to_string(),
                reason: "unreachable".to_string(),
            })
        }
    }
}
