use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use k8s_openapi::api::{core::v1::Service, discovery::v1::EndpointSlice};
use kube::{
    api::{ListParams, PostParams},
    Api, Client, ResourceExt,
};
use vlbd_prober::manager::{ConditionHandler, Manager};

use crate::{
    crd::{load_balancer::LoadBalancer, virtual_machine_instance::VirtualMachineInstance},
    util::{get_namespace, get_namespaced_name, split_namespaced_name, split_probe_address},
};

use super::{
    backend::{qualified_servers, BackendServer},
    config::ExternalIp,
    endpoint::{
        build_endpoint_slice, diff_probes, probe_ready_count, set_all_ready, set_ready,
        target_probes,
    },
    error::Error,
    metrics::Metrics,
    service::{build_service, service_ip},
};

/// Realizes a VM workload LoadBalancer in the cluster.
#[async_trait]
pub trait LbManager: Send + Sync {
    /// Creates or updates the forwarding Service.
    async fn ensure_load_balancer(&self, lb: &LoadBalancer) -> Result<(), Error>;

    /// Waits a bounded time for the address assigned to the Service from outside.
    async fn ensure_service_ip(&self, lb: &LoadBalancer) -> Result<String, Error>;

    /// Syncs the EndpointSlice and probes with the matched backends.
    /// Returns the backend addresses.
    async fn ensure_backend_servers(&self, lb: &LoadBalancer) -> Result<Vec<String>, Error>;

    async fn probe_ready_count(&self, lb: &LoadBalancer) -> Result<usize, Error>;

    /// Stops the probes of `lb`. The Service and EndpointSlice go away with their owner.
    async fn delete_load_balancer(&self, lb: &LoadBalancer) -> Result<(), Error>;
}

/// [`LbManager`] backed by a Service of type LoadBalancer and a hand-written EndpointSlice.
pub struct ServiceLbManager {
    client: Client,
    prober: Arc<Manager>,
    external_ip: ExternalIp,
    metrics: Arc<Mutex<Metrics>>,
}

impl ServiceLbManager {
    pub fn new(
        client: Client,
        prober: Arc<Manager>,
        external_ip: ExternalIp,
        metrics: Arc<Mutex<Metrics>>,
    ) -> ServiceLbManager {
        ServiceLbManager {
            client,
            prober,
            external_ip,
            metrics,
        }
    }

    fn services(&self, lb: &LoadBalancer) -> Result<Api<Service>, Error> {
        let ns = get_namespace(lb).map_err(Error::KubeLibrary)?;
        Ok(Api::<Service>::namespaced(self.client.clone(), &ns))
    }

    fn endpoint_slices(&self, lb: &LoadBalancer) -> Result<Api<EndpointSlice>, Error> {
        let ns = get_namespace(lb).map_err(Error::KubeLibrary)?;
        Ok(Api::<EndpointSlice>::namespaced(self.client.clone(), &ns))
    }

    async fn get_service(&self, lb: &LoadBalancer) -> Result<Service, Error> {
        self.services(lb)?
            .get_opt(&lb.name_any())
            .await
            .map_err(Error::Kube)?
            .ok_or_else(|| Error::ServiceNotFound(get_namespaced_name(lb)))
    }

    /// Starts, replaces and stops the probe workers of `lb` to match `eps`.
    #[tracing::instrument(skip_all)]
    fn ensure_probes(&self, lb: &LoadBalancer, eps: &EndpointSlice) -> Result<(), Error> {
        let uid = get_namespaced_name(lb);

        let Some(hc) = lb.health_check() else {
            let removed = self
                .prober
                .remove_workers_by_uid(&uid)
                .map_err(Error::Prober)?;
            if removed > 0 {
                tracing::info!(uid = %uid, removed, "Health check is disabled, remove probes");
            }
            return Ok(());
        };

        let target = target_probes(hc, eps);
        let active = self.prober.health_options(&uid).map_err(Error::Prober)?;
        let diff = diff_probes(&active, &target);
        for address in diff.remove.iter() {
            tracing::debug!(uid = %uid, address = %address, "-probe");
            self.prober
                .remove_worker(&uid, address)
                .map_err(Error::Prober)?;
        }
        for option in diff.replace.into_iter() {
            tracing::debug!(uid = %uid, address = %option.address, "~probe");
            self.prober
                .remove_worker(&uid, &option.address)
                .map_err(Error::Prober)?;
            let address = option.address.clone();
            self.prober
                .add_worker(&uid, &address, option)
                .map_err(Error::Prober)?;
        }
        for option in diff.add.into_iter() {
            tracing::debug!(uid = %uid, address = %option.address, "+probe");
            let address = option.address.clone();
            self.prober
                .add_worker(&uid, &address, option)
                .map_err(Error::Prober)?;
        }
        Ok(())
    }
}

#[async_trait]
impl LbManager for ServiceLbManager {
    #[tracing::instrument(skip_all)]
    async fn ensure_load_balancer(&self, lb: &LoadBalancer) -> Result<(), Error> {
        let services = self.services(lb)?;
        let current = services
            .get_opt(&lb.name_any())
            .await
            .map_err(Error::Kube)?;
        let new = build_service(current.as_ref(), lb);

        match current {
            Some(current) if current == new => {}
            Some(_) => {
                tracing::info!(name = lb.name_any(), "Update Service");
                services
                    .replace(&lb.name_any(), &PostParams::default(), &new)
                    .await
                    .map_err(Error::Kube)?;
            }
            None => {
                tracing::info!(name = lb.name_any(), "Create Service");
                match services.create(&PostParams::default(), &new).await {
                    Ok(_) => {}
                    Err(kube::Error::Api(ae)) if ae.code == 409 => {}
                    Err(e) => return Err(Error::Kube(e)),
                }
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip_all)]
    async fn ensure_service_ip(&self, lb: &LoadBalancer) -> Result<String, Error> {
        let attempts = self.external_ip.attempts.max(1);
        for i in 0..attempts {
            let svc = self.get_service(lb).await?;
            if let Some(ip) = service_ip(&svc) {
                return Ok(ip);
            }
            if i + 1 < attempts {
                tokio::time::sleep(Duration::from_millis(self.external_ip.interval_ms)).await;
            }
        }
        Err(Error::WaitExternalIp(get_namespaced_name(lb)))
    }

    #[tracing::instrument(skip_all)]
    async fn ensure_backend_servers(&self, lb: &LoadBalancer) -> Result<Vec<String>, Error> {
        // the Service comes first
        self.get_service(lb).await?;

        let ns = get_namespace(lb).map_err(Error::KubeLibrary)?;
        let name = lb.name_any();
        let api = self.endpoint_slices(lb)?;
        let current = api.get_opt(&name).await.map_err(Error::Kube)?;

        let vmis = if lb.spec.backend_server_selector.is_empty() {
            Vec::new()
        } else {
            Api::<VirtualMachineInstance>::namespaced(self.client.clone(), &ns)
                .list(&ListParams::default())
                .await
                .map_err(Error::Kube)?
                .items
        };
        let servers = qualified_servers(lb, &vmis);
        let mut new = build_endpoint_slice(current.as_ref(), lb, &servers)?;
        if lb.health_check().is_none() {
            if let Some(all_ready) = set_all_ready(&new, true) {
                tracing::info!(name = %name, namespace = %ns, "Health check is disabled, set all endpoints ready");
                new = all_ready;
            }
        }

        let eps = match current {
            None => {
                tracing::info!(name = %name, namespace = %ns, "Create EndpointSlice");
                api.create(&PostParams::default(), &new)
                    .await
                    .map_err(Error::Kube)?
            }
            Some(current) if current != new => {
                tracing::debug!(name = %name, namespace = %ns, "Update EndpointSlice");
                api.replace(&name, &PostParams::default(), &new)
                    .await
                    .map_err(Error::Kube)?
            }
            Some(current) => current,
        };

        self.ensure_probes(lb, &eps)?;

        Ok(servers.iter().filter_map(|s| s.address()).collect())
    }

    async fn probe_ready_count(&self, lb: &LoadBalancer) -> Result<usize, Error> {
        let eps = self
            .endpoint_slices(lb)?
            .get_opt(&lb.name_any())
            .await
            .map_err(Error::Kube)?;
        match eps {
            Some(eps) => Ok(probe_ready_count(&eps)),
            None => {
                tracing::warn!(name = lb.name_any(), "EndpointSlice is not found");
                Ok(0)
            }
        }
    }

    #[tracing::instrument(skip_all)]
    async fn delete_load_balancer(&self, lb: &LoadBalancer) -> Result<(), Error> {
        let uid = get_namespaced_name(lb);
        let removed = self
            .prober
            .remove_workers_by_uid(&uid)
            .map_err(Error::Prober)?;
        tracing::info!(uid = %uid, removed, "Remove probes");
        Ok(())
    }
}

#[async_trait]
impl ConditionHandler for ServiceLbManager {
    #[tracing::instrument(skip(self))]
    async fn update_condition(
        &self,
        uid: &str,
        address: &str,
        healthy: bool,
    ) -> Result<(), vlbd_prober::error::Error> {
        let handler_err = |e: String| vlbd_prober::error::Error::Handler(e);

        let (ns, name) = split_namespaced_name(uid).map_err(|e| handler_err(e.to_string()))?;
        let (ip, _) = split_probe_address(address).map_err(|e| handler_err(e.to_string()))?;

        let api = Api::<EndpointSlice>::namespaced(self.client.clone(), &ns);
        let eps = match api.get_opt(&name).await {
            Ok(Some(eps)) => eps,
            Ok(None) => {
                tracing::warn!(uid, "EndpointSlice is not found");
                return Ok(());
            }
            Err(e) => return Err(handler_err(e.to_string())),
        };
        if let Some(ep) = eps.endpoints.iter().find(|ep| ep.addresses.len() != 1) {
            return Err(handler_err(format!(
                "endpoint of {uid} must have exactly one address: {:?}",
                ep.addresses
            )));
        }

        if let Some(new) = set_ready(&eps, &ip, healthy) {
            if let Ok(metrics) = self.metrics.lock() {
                metrics.health_condition_changed(healthy);
            }
            tracing::info!(uid, ip = %ip, healthy, "Update endpoint condition");
            api.replace(&name, &PostParams::default(), &new)
                .await
                .map_err(|e| handler_err(e.to_string()))?;
        }
        Ok(())
    }
}
