use std::{net::IpAddr, str::FromStr, sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::StreamExt;
use kube::{
    api::{ListParams, PostParams},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event},
        watcher::Config,
    },
    Api, Client, ResourceExt,
};
use vlbd_ipam::{
    allocator::Allocator,
    ledger::Ledger,
    range::{checksum, RangeSet},
    registry::AllocatorRegistry,
    store::Store,
};

use crate::{
    controller::{
        context::{error_policy, ContextWith, Ctx, State},
        error::Error,
        metrics::Metrics,
    },
    crd::{
        condition::{set_condition, CONDITION_READY},
        ip_pool::{IPPool, IPPoolStatus, IP_POOL_FINALIZER, MANUALLY_RELEASE_IP_ANNOTATION},
        load_balancer::LoadBalancer,
    },
    util::split_namespaced_name,
};

/// Keeps the allocation ledger of one pool in its status.
/// A commit carries the resourceVersion it was loaded with.
pub struct IpPoolStore {
    api: Api<IPPool>,
    name: String,
}

impl IpPoolStore {
    pub fn new(api: Api<IPPool>, name: &str) -> IpPoolStore {
        IpPoolStore {
            api,
            name: name.to_string(),
        }
    }

    async fn get(&self) -> Result<IPPool, vlbd_ipam::error::Error> {
        self.api
            .get(&self.name)
            .await
            .map_err(|e| vlbd_ipam::error::Error::Store(e.to_string()))
    }
}

#[async_trait]
impl Store for IpPoolStore {
    async fn load(&self) -> Result<Ledger, vlbd_ipam::error::Error> {
        let pool = self.get().await?;
        Ok(ledger_from(&pool))
    }

    async fn commit(&self, ledger: Ledger) -> Result<(), vlbd_ipam::error::Error> {
        let mut pool = self.get().await?;
        if pool.metadata.resource_version != ledger.version {
            return Err(vlbd_ipam::error::Error::Conflict);
        }
        let status = pool.status.take().unwrap_or_default();
        pool.status = Some(apply_ledger(status, &ledger));

        let data = serde_json::to_vec(&pool)
            .map_err(|e| vlbd_ipam::error::Error::Store(e.to_string()))?;
        match self
            .api
            .replace_status(&self.name, &PostParams::default(), data)
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(vlbd_ipam::error::Error::Conflict),
            Err(e) => Err(vlbd_ipam::error::Error::Store(e.to_string())),
        }
    }
}

fn pool_total(pool: &IPPool) -> i64 {
    match RangeSet::new(&pool.range_specs()) {
        Ok(ranges) => ranges.total() as i64,
        Err(_) => pool.status.as_ref().map(|s| s.total).unwrap_or_default(),
    }
}

/// Reads the ledger kept in the status of `pool`.
pub fn ledger_from(pool: &IPPool) -> Ledger {
    let status = pool.status.clone().unwrap_or_default();
    let total = pool_total(pool);
    Ledger {
        version: pool.metadata.resource_version.clone(),
        total,
        available: total - status.allocated.len() as i64,
        last_allocated: Some(status.last_allocated).filter(|s| !s.is_empty()),
        allocated: status.allocated,
        allocated_history: status.allocated_history,
    }
}

/// Writes `ledger` over the allocation fields of `status`. Conditions are kept.
pub fn apply_ledger(mut status: IPPoolStatus, ledger: &Ledger) -> IPPoolStatus {
    status.total = ledger.total;
    status.available = ledger.available;
    status.last_allocated = ledger.last_allocated.clone().unwrap_or_default();
    status.allocated = ledger.allocated.clone();
    status.allocated_history = ledger.allocated_history.clone();
    status
}

/// Parses the manual release annotation `"<ip>: <namespace>/<name>"`.
pub fn parse_manual_release(value: &str) -> Option<(IpAddr, String)> {
    let (ip, owner) = value.rsplit_once(':')?;
    let ip = IpAddr::from_str(ip.trim()).ok()?;
    let owner = owner.trim();
    split_namespaced_name(owner).ok()?;
    Some((ip, owner.to_string()))
}

/// The status `pool` should have with `ranges` in effect.
pub fn desired_status(pool: &IPPool, ranges: &RangeSet) -> IPPoolStatus {
    let mut ledger = ledger_from(pool);
    ledger.total = ranges.total() as i64;
    ledger.available = ledger.total - ledger.allocated.len() as i64;
    ledger.retain_history(|addr| ranges.contains(addr));

    let mut status = apply_ledger(pool.status.clone().unwrap_or_default(), &ledger);
    set_condition(&mut status.conditions, CONDITION_READY, true, "", "");
    status
}

#[tracing::instrument(skip_all, fields(trace_id))]
pub async fn reconciler(
    pool: Arc<IPPool>,
    ctx: Arc<ContextWith<Arc<AllocatorRegistry>>>,
) -> Result<Action, Error> {
    let pools = Api::<IPPool>::all(ctx.client().clone());

    finalizer(&pools, IP_POOL_FINALIZER, pool, |event| async {
        match event {
            Event::Apply(pool) => reconcile(&pools, &pool, ctx.clone()).await,
            Event::Cleanup(pool) => cleanup(&pools, &pool, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

#[tracing::instrument(skip_all)]
async fn reconcile(
    api: &Api<IPPool>,
    pool: &IPPool,
    ctx: Arc<ContextWith<Arc<AllocatorRegistry>>>,
) -> Result<Action, Error> {
    let trace_id = vlbd_trace::telemetry::get_trace_id();
    tracing::Span::current().record("trace_id", &tracing::field::display(&trace_id));
    let _timer = ctx
        .metrics()
        .lock()
        .map_err(|_| Error::FailedToGetLock)?
        .count_and_measure();
    ctx.touch(pool).await;
    ctx.metrics()
        .lock()
        .map_err(|_| Error::FailedToGetLock)?
        .reconciliation(pool);

    let name = pool.name_any();
    tracing::info!(name, "reconcile IPPool");

    let registry = &ctx.component;
    let specs = pool.range_specs();
    let ranges = match RangeSet::new(&specs) {
        Ok(ranges) => ranges,
        Err(e) => {
            tracing::error!(name, error = %e, "Invalid ranges");
            let mut new_pool = pool.clone();
            let status = new_pool.status.get_or_insert_with(IPPoolStatus::default);
            if set_condition(
                &mut status.conditions,
                CONDITION_READY,
                false,
                "InvalidRange",
                &e.to_string(),
            ) {
                replace_status(api, &new_pool).await?;
            }
            return Ok(Action::await_change());
        }
    };

    if registry
        .is_stale(&name, &checksum(&specs))
        .map_err(Error::Ipam)?
    {
        let store = Arc::new(IpPoolStore::new(api.clone(), &name));
        let allocator = Allocator::new(&name, &specs, store).map_err(Error::Ipam)?;
        registry.insert(allocator).map_err(Error::Ipam)?;
        tracing::info!(name, "Build allocator");
    }

    if let Some(value) = pool.annotations().get(MANUALLY_RELEASE_IP_ANNOTATION) {
        manual_release(api, pool, value, ctx.clone()).await?;
        return Ok(Action::await_change());
    }

    let status = desired_status(pool, &ranges);
    if pool.status.as_ref() != Some(&status) {
        let mut new_pool = pool.clone();
        new_pool.status = Some(status.clone());
        replace_status(api, &new_pool).await?;
        tracing::info!(name, total = status.total, available = status.available, "Update IPPool status");
    }

    ctx.metrics()
        .lock()
        .map_err(|_| Error::FailedToGetLock)?
        .ippool(&name, status.total, status.available);

    Ok(Action::requeue(Duration::from_secs(ctx.interval())))
}

#[tracing::instrument(skip_all)]
async fn manual_release(
    api: &Api<IPPool>,
    pool: &IPPool,
    value: &str,
    ctx: Arc<ContextWith<Arc<AllocatorRegistry>>>,
) -> Result<(), Error> {
    let name = pool.name_any();

    match parse_manual_release(value) {
        None => {
            tracing::warn!(name, value, "Invalid manual release annotation");
        }
        Some((ip, owner)) => {
            let allocated = pool.allocated();
            match allocated.get(&ip.to_string()) {
                Some(o) if *o == owner => {
                    let (ns, lb_name) =
                        split_namespaced_name(&owner).map_err(Error::KubeLibrary)?;
                    let exists = Api::<LoadBalancer>::namespaced(ctx.client().clone(), &ns)
                        .get_opt(&lb_name)
                        .await
                        .map_err(Error::Kube)?
                        .is_some();
                    if exists {
                        tracing::warn!(name, ip = %ip, owner, "Owner still exists, keep the allocation");
                    } else {
                        let allocator = ctx
                            .component
                            .get(&name)
                            .map_err(Error::Ipam)?
                            .ok_or_else(|| Error::AllocatorNotFound(name.clone()))?;
                        allocator.release_address(&ip).await?;
                        tracing::info!(name, ip = %ip, owner, "Release address manually");
                    }
                }
                _ => {
                    tracing::warn!(name, ip = %ip, owner, "Allocation record does not match");
                }
            }
        }
    }

    // the release moved the resourceVersion forward
    let mut latest = api.get(&name).await.map_err(Error::Kube)?;
    latest.annotations_mut().remove(MANUALLY_RELEASE_IP_ANNOTATION);
    api.replace(&name, &PostParams::default(), &latest)
        .await
        .map_err(Error::Kube)?;
    Ok(())
}

#[tracing::instrument(skip_all)]
async fn cleanup(
    _api: &Api<IPPool>,
    pool: &IPPool,
    ctx: Arc<ContextWith<Arc<AllocatorRegistry>>>,
) -> Result<Action, Error> {
    let name = pool.name_any();
    tracing::info!(name, "clean up IPPool");

    if !pool.allocated().is_empty() {
        return Err(Error::PoolInUse(name));
    }

    ctx.component.remove(&name).map_err(Error::Ipam)?;
    ctx.metrics()
        .lock()
        .map_err(|_| Error::FailedToGetLock)?
        .ippool_remove(&name);

    Ok(Action::await_change())
}

async fn replace_status(api: &Api<IPPool>, pool: &IPPool) -> Result<(), Error> {
    api.replace_status(
        &pool.name_any(),
        &PostParams::default(),
        serde_json::to_vec(pool).map_err(Error::Serialization)?,
    )
    .await
    .map_err(Error::Kube)?;
    Ok(())
}

pub async fn run(
    state: State,
    interval: u64,
    registry: Arc<AllocatorRegistry>,
    metrics: Arc<std::sync::Mutex<Metrics>>,
) {
    let client = Client::try_default()
        .await
        .expect("Failed to create kube client");

    let pools = Api::<IPPool>::all(client.clone());
    if let Err(e) = pools.list(&ListParams::default().limit(1)).await {
        tracing::error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        tracing::info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    tracing::info!("Start IPPool reconciler");

    Controller::new(pools, Config::default().any_semantic())
        .shutdown_on_signal()
        .run(
            reconciler,
            error_policy::<IPPool, Error, ContextWith<Arc<AllocatorRegistry>>>,
            state.to_context_with(client, interval, registry, metrics),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
