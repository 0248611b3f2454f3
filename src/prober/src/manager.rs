use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, RwLock,
    },
};

use async_trait::async_trait;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

use super::{
    error::Error,
    option::HealthOption,
    probe::Prober,
    worker::{HealthCondition, Worker},
};

/// Receives condition changes from the workers of a [`Manager`], one at a time.
#[async_trait]
pub trait ConditionHandler: Send + Sync {
    async fn update_condition(&self, uid: &str, address: &str, healthy: bool) -> Result<(), Error>;
}

#[derive(Debug)]
struct WorkerHandle {
    option: HealthOption,
    condition: Arc<AtomicBool>,
    stop: Option<oneshot::Sender<()>>,
}

impl WorkerHandle {
    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            // the worker may already be gone
            let _ = stop.send(());
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

type WorkerMap = HashMap<String, WorkerHandle>;

/// Runs probe workers grouped by uid and funnels their condition changes into
/// a single handler.
pub struct Manager {
    workers: RwLock<HashMap<String, WorkerMap>>,
    prober: Arc<dyn Prober>,
    tx: mpsc::Sender<HealthCondition>,
    rx: Mutex<Option<mpsc::Receiver<HealthCondition>>>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("workers", &self.workers)
            .finish()
    }
}

impl Manager {
    pub fn new(prober: Arc<dyn Prober>) -> Manager {
        let (tx, rx) = mpsc::channel(1);
        Manager {
            workers: RwLock::new(HashMap::new()),
            prober,
            tx,
            rx: Mutex::new(Some(rx)),
        }
    }

    /// Spawns the dispatcher delivering conditions to `handler`. Can be called once.
    pub fn start(&self, handler: Arc<dyn ConditionHandler>) -> Result<JoinHandle<()>, Error> {
        let mut rx = self
            .rx
            .lock()
            .map_err(|_| Error::FailedToGetLock)?
            .take()
            .ok_or(Error::AlreadyStarted)?;

        Ok(tokio::spawn(async move {
            while let Some(cond) = rx.recv().await {
                if let Err(e) = handler
                    .update_condition(&cond.uid, &cond.address, cond.healthy)
                    .await
                {
                    tracing::error!(uid = %cond.uid, address = %cond.address, healthy = cond.healthy, error = %e, "Failed to update health condition");
                }
            }
        }))
    }

    /// Starts a worker for `address` in group `uid`.
    /// An existing worker probing the same way keeps running, and its condition is kept.
    /// One with a different option is replaced.
    pub fn add_worker(&self, uid: &str, address: &str, option: HealthOption) -> Result<(), Error> {
        let mut workers = self.workers.write().map_err(|_| Error::FailedToGetLock)?;
        let group = workers.entry(uid.to_string()).or_default();

        if let Some(existing) = group.get(address) {
            if existing.option.same_target(&option) {
                return Ok(());
            }
            tracing::info!(uid, address, "Replace probe worker");
        }

        let worker = Worker::new(uid, option.clone());
        let condition = Arc::new(AtomicBool::new(worker.condition()));
        let (stop_tx, stop_rx) = oneshot::channel();
        tokio::spawn(worker.run(
            self.prober.clone(),
            self.tx.clone(),
            stop_rx,
            condition.clone(),
        ));

        // dropping the replaced handle stops its worker
        group.insert(
            address.to_string(),
            WorkerHandle {
                option,
                condition,
                stop: Some(stop_tx),
            },
        );
        tracing::info!(uid, address, "Add probe worker");
        Ok(())
    }

    pub fn remove_worker(&self, uid: &str, address: &str) -> Result<usize, Error> {
        let mut workers = self.workers.write().map_err(|_| Error::FailedToGetLock)?;
        let Some(group) = workers.get_mut(uid) else {
            return Ok(0);
        };
        let removed = group.remove(address).map(|_| 1).unwrap_or(0);
        if group.is_empty() {
            workers.remove(uid);
        }
        if removed > 0 {
            tracing::info!(uid, address, "Remove probe worker");
        }
        Ok(removed)
    }

    pub fn remove_workers_by_uid(&self, uid: &str) -> Result<usize, Error> {
        let mut workers = self.workers.write().map_err(|_| Error::FailedToGetLock)?;
        let removed = workers.remove(uid).map(|group| group.len()).unwrap_or(0);
        if removed > 0 {
            tracing::info!(uid, count = removed, "Remove probe workers");
        }
        Ok(removed)
    }

    /// Options of the running workers of `uid`, keyed by address.
    pub fn health_options(&self, uid: &str) -> Result<HashMap<String, HealthOption>, Error> {
        let workers = self.workers.read().map_err(|_| Error::FailedToGetLock)?;
        Ok(workers
            .get(uid)
            .map(|group| {
                group
                    .iter()
                    .map(|(addr, w)| (addr.clone(), w.option.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Last condition reported by the worker of `address`.
    pub fn condition(&self, uid: &str, address: &str) -> Result<Option<bool>, Error> {
        let workers = self.workers.read().map_err(|_| Error::FailedToGetLock)?;
        Ok(workers
            .get(uid)
            .and_then(|group| group.get(address))
            .map(|w| w.condition.load(Ordering::SeqCst)))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::probe::ScriptedProber;

    struct Recorder(mpsc::UnboundedSender<HealthCondition>);

    #[async_trait]
    impl ConditionHandler for Recorder {
        async fn update_condition(&self, uid: &str, address: &str, healthy: bool) -> Result<(), Error> {
            self.0
                .send(HealthCondition {
                    uid: uid.to_string(),
                    address: address.to_string(),
                    healthy,
                })
                .map_err(|e| Error::Handler(e.to_string()))
        }
    }

    fn option(address: &str, initial: bool) -> HealthOption {
        HealthOption {
            address: address.to_string(),
            success_threshold: 1,
            failure_threshold: 2,
            timeout: Duration::from_millis(50),
            period: Duration::from_millis(20),
            initial_condition: initial,
        }
    }

    async fn next(rx: &mut mpsc::UnboundedReceiver<HealthCondition>) -> HealthCondition {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn works_manager_dispatch() {
        let prober = Arc::new(ScriptedProber::new());
        prober.set("10.0.0.1:80", true);
        let manager = Manager::new(prober.clone());
        let (tx, mut rx) = mpsc::unbounded_channel();
        manager.start(Arc::new(Recorder(tx))).unwrap();

        manager
            .add_worker("default/lb", "10.0.0.1:80", option("10.0.0.1:80", false))
            .unwrap();
        manager
            .add_worker("default/lb", "10.0.0.2:80", option("10.0.0.2:80", true))
            .unwrap();

        let mut healthy = None;
        let mut unhealthy = None;
        while healthy.is_none() || unhealthy.is_none() {
            let cond = next(&mut rx).await;
            assert_eq!("default/lb", cond.uid);
            match cond.address.as_str() {
                "10.0.0.1:80" => healthy = Some(cond.healthy),
                "10.0.0.2:80" => unhealthy = Some(cond.healthy),
                other => panic!("unexpected address {other}"),
            }
        }
        assert_eq!(Some(true), healthy);
        assert_eq!(Some(false), unhealthy);
        assert_eq!(
            Some(false),
            manager.condition("default/lb", "10.0.0.2:80").unwrap()
        );

        assert_eq!(2, manager.remove_workers_by_uid("default/lb").unwrap());
        assert!(manager.health_options("default/lb").unwrap().is_empty());
    }

    #[tokio::test]
    async fn works_manager_add_replace_remove() {
        let manager = Manager::new(Arc::new(ScriptedProber::new()));

        manager
            .add_worker("default/lb", "10.0.0.1:80", option("10.0.0.1:80", true))
            .unwrap();
        manager
            .add_worker("default/lb", "10.0.0.1:80", option("10.0.0.1:80", true))
            .unwrap();
        assert_eq!(1, manager.health_options("default/lb").unwrap().len());

        // a flipped initial condition keeps the running worker
        manager
            .add_worker("default/lb", "10.0.0.1:80", option("10.0.0.1:80", false))
            .unwrap();
        let options = manager.health_options("default/lb").unwrap();
        assert_eq!(Some(&option("10.0.0.1:80", true)), options.get("10.0.0.1:80"));

        let mut replaced = option("10.0.0.1:80", true);
        replaced.failure_threshold = 5;
        manager
            .add_worker("default/lb", "10.0.0.1:80", replaced.clone())
            .unwrap();
        let options = manager.health_options("default/lb").unwrap();
        assert_eq!(Some(&replaced), options.get("10.0.0.1:80"));

        assert_eq!(0, manager.remove_worker("default/lb", "10.0.0.9:80").unwrap());
        assert_eq!(1, manager.remove_worker("default/lb", "10.0.0.1:80").unwrap());
        assert_eq!(0, manager.remove_workers_by_uid("default/lb").unwrap());
        assert_eq!(None, manager.condition("default/lb", "10.0.0.1:80").unwrap());
    }

    #[tokio::test]
    async fn works_manager_stop_without_tick() {
        let prober = Arc::new(ScriptedProber::new());
        let manager = Manager::new(prober.clone());
        let mut opt = option("10.0.0.1:80", true);
        opt.period = Duration::from_secs(3600);
        manager.add_worker("default/lb", "10.0.0.1:80", opt).unwrap();
        assert_eq!(1, manager.remove_worker("default/lb", "10.0.0.1:80").unwrap());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(0, prober.calls());
    }

    #[tokio::test]
    async fn fails_manager_start_twice() {
        let manager = Manager::new(Arc::new(ScriptedProber::new()));
        let (tx, _rx) = mpsc::unbounded_channel();
        let handler = Arc::new(Recorder(tx));
        manager.start(handler.clone()).unwrap();
        assert_eq!(Some(Error::AlreadyStarted), manager.start(handler).err());
    }
}
