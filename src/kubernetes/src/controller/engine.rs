use std::sync::Arc;

use async_trait::async_trait;
use kube::{api::ListParams, Api};
use vlbd_ipam::{
    allocator::{Allocator, IpConfig},
    registry::AllocatorRegistry,
    selector::{select, Requirement},
};

use crate::{
    crd::{
        condition::{set_condition, CONDITION_READY},
        ip_pool::IPPool,
        load_balancer::{AllocatedAddress, Ipam, LoadBalancer, LoadBalancerStatus, ADDRESS_ASK_DHCP},
    },
    util::get_namespaced_name,
};

use super::{error::Error, lb_manager::LbManager};

/// Where the engine looks up IPPools to select from.
#[async_trait]
pub trait PoolSource: Send + Sync {
    async fn list_pools(&self) -> Result<Vec<IPPool>, Error>;
}

#[async_trait]
impl PoolSource for Api<IPPool> {
    async fn list_pools(&self) -> Result<Vec<IPPool>, Error> {
        Ok(self
            .list(&ListParams::default())
            .await
            .map_err(Error::Kube)?
            .items)
    }
}

/// Result of one pass over a LoadBalancer.
#[derive(Debug)]
pub struct Outcome {
    /// The status to persist, with the Ready condition set.
    pub status: LoadBalancerStatus,
    pub error: Option<Error>,
}

/// Drives a LoadBalancer toward its spec: an address, then the Service,
/// then backends and their health.
pub struct Engine {
    pools: Arc<dyn PoolSource>,
    registry: Arc<AllocatorRegistry>,
    lb_manager: Arc<dyn LbManager>,
    loose: bool,
}

impl Engine {
    pub fn new(
        pools: Arc<dyn PoolSource>,
        registry: Arc<AllocatorRegistry>,
        lb_manager: Arc<dyn LbManager>,
        loose: bool,
    ) -> Engine {
        Engine {
            pools,
            registry,
            lb_manager,
            loose,
        }
    }

    #[tracing::instrument(skip_all)]
    pub async fn on_change(&self, lb: &LoadBalancer) -> Outcome {
        let mut status = lb.status_or_default();
        let res = self.realize(lb, &mut status).await;

        match &res {
            Ok(_) => {
                set_condition(&mut status.conditions, CONDITION_READY, true, "", "");
            }
            Err(e) => {
                set_condition(
                    &mut status.conditions,
                    CONDITION_READY,
                    false,
                    e.reason(),
                    &e.to_string(),
                );
            }
        }
        Outcome {
            status,
            error: res.err(),
        }
    }

    /// Releases the address and stops probes. Must succeed before the object is gone.
    #[tracing::instrument(skip_all)]
    pub async fn on_remove(&self, lb: &LoadBalancer) -> Result<(), Error> {
        let status = lb.status_or_default();
        let owner = get_namespaced_name(lb);

        if lb.spec.ipam == Ipam::Pool && !status.allocated_address.ip_pool.is_empty() {
            self.release(&status.allocated_address.ip_pool, &owner)
                .await?;
        }
        if lb.is_vm_workload() {
            self.lb_manager.delete_load_balancer(lb).await?;
        }
        Ok(())
    }

    async fn realize(&self, lb: &LoadBalancer, status: &mut LoadBalancerStatus) -> Result<(), Error> {
        self.ensure_allocated_address(lb, status).await?;

        if lb.is_vm_workload() {
            let mut updated = lb.clone();
            updated.status = Some(status.clone());
            self.ensure_vm_load_balancer(&updated, status).await?;
        }
        Ok(())
    }

    async fn ensure_allocated_address(
        &self,
        lb: &LoadBalancer,
        status: &mut LoadBalancerStatus,
    ) -> Result<(), Error> {
        let owner = get_namespaced_name(lb);

        if lb.spec.ipam == Ipam::Dhcp {
            if !status.allocated_address.ip_pool.is_empty() {
                self.release(&status.allocated_address.ip_pool, &owner)
                    .await?;
            }
            if status.allocated_address.ip != ADDRESS_ASK_DHCP
                || !status.allocated_address.ip_pool.is_empty()
            {
                status.allocated_address = AllocatedAddress {
                    ip: ADDRESS_ASK_DHCP.to_string(),
                    ..Default::default()
                };
            }
            return Ok(());
        }

        let requested = lb.spec.ip_pool.clone().filter(|p| !p.is_empty());
        let current_pool = status.allocated_address.ip_pool.clone();
        if let Some(pool) = requested.as_ref() {
            if !current_pool.is_empty() && &current_pool != pool {
                tracing::info!(
                    owner,
                    from = current_pool,
                    to = pool,
                    "IPPool is changed, release the address"
                );
                self.release(&current_pool, &owner).await?;
                status.allocated_address = AllocatedAddress::default();
            }
        }

        if !status.allocated_address.ip_pool.is_empty() {
            return Ok(());
        }

        let pool = match requested {
            Some(pool) => pool,
            None => self.select_pool(&lb.requirement()).await?,
        };
        // an address already held by this owner comes back unchanged
        let config = self.allocator(&pool)?.get(&owner).await?;
        tracing::info!(owner, pool, address = %config.address, "Allocate address");
        status.allocated_address = allocated_address(&pool, &config);
        Ok(())
    }

    async fn ensure_vm_load_balancer(
        &self,
        lb: &LoadBalancer,
        status: &mut LoadBalancerStatus,
    ) -> Result<(), Error> {
        self.lb_manager.ensure_load_balancer(lb).await?;

        match self.lb_manager.ensure_service_ip(lb).await {
            Ok(ip) => status.address = ip,
            Err(e) => {
                status.address = String::new();
                return Err(e);
            }
        }

        status.backend_servers = self.lb_manager.ensure_backend_servers(lb).await?;
        if status.backend_servers.is_empty() {
            return Err(Error::NoRunningBackendServer);
        }

        if lb.health_check().is_some() {
            let count = self.lb_manager.probe_ready_count(lb).await?;
            tracing::debug!(name = %get_namespaced_name(lb), count, "Probe ready backends");
            if count == 0 {
                return Err(Error::AllBackendServersNotHealthy(
                    status.backend_servers.len(),
                ));
            }
        }
        Ok(())
    }

    async fn select_pool(&self, requirement: &Requirement) -> Result<String, Error> {
        let describe = || {
            format!(
                "network={}, project={}, namespace={}, cluster={}",
                requirement.network, requirement.project, requirement.namespace, requirement.cluster
            )
        };
        let pools = self.pools.list_pools().await?;
        match select(&pools, Some(requirement), self.loose) {
            Ok(Some(pool)) => Ok(pool.metadata.name.clone().unwrap_or_default()),
            Ok(None) => Err(Error::NoMatchedPool(describe())),
            Err(e) => Err(Error::NoMatchedPool(format!("{}: {e}", describe()))),
        }
    }

    fn allocator(&self, pool: &str) -> Result<Arc<Allocator>, Error> {
        self.registry
            .get(pool)
            .map_err(Error::Ipam)?
            .ok_or_else(|| Error::AllocatorNotFound(pool.to_string()))
    }

    async fn release(&self, pool: &str, owner: &str) -> Result<(), Error> {
        let released = self.allocator(pool)?.release(owner).await?;
        tracing::info!(owner, pool, ?released, "Release address");
        Ok(())
    }
}

fn allocated_address(pool: &str, config: &IpConfig) -> AllocatedAddress {
    AllocatedAddress {
        ip_pool: pool.to_string(),
        ip: config.address.to_string(),
        mask: config.mask.to_string(),
        gateway: config.gateway.map(|g| g.to_string()).unwrap_or_default(),
    }
}
