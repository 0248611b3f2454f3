use std::{
    collections::{BTreeMap, HashMap},
    time::Duration,
};

use k8s_openapi::api::{
    core::v1::ObjectReference,
    discovery::v1::{Endpoint, EndpointConditions, EndpointPort, EndpointSlice},
};
use kube::{core::ObjectMeta, ResourceExt};
use vlbd_prober::option::HealthOption;

use crate::{
    crd::{
        load_balancer::{HealthCheck, LoadBalancer},
        VALUE_TRUE,
    },
    util::create_owner_reference,
};

use super::{
    backend::BackendServer,
    error::Error,
    service::{SERVICE_LB_LABEL, SERVICE_NAME_LABEL},
};

pub const ADDRESS_TYPE_IPV4: &str = "IPv4";
pub const DUMMY_ENDPOINT_ADDRESS: &str = "10.52.0.255";
pub const DUMMY_ENDPOINT_UID: &str = "dummy347-546a-4642-9da6-5608endpoint";

pub fn is_dummy(ep: &Endpoint) -> bool {
    ep.target_ref
        .as_ref()
        .and_then(|r| r.uid.as_deref())
        .map(|uid| uid == DUMMY_ENDPOINT_UID)
        .unwrap_or(false)
}

pub fn is_ready(ep: &Endpoint) -> bool {
    ep.conditions
        .as_ref()
        .and_then(|c| c.ready)
        .unwrap_or(false)
}

fn ready_conditions(ready: bool) -> Option<EndpointConditions> {
    Some(EndpointConditions {
        ready: Some(ready),
        ..Default::default()
    })
}

/// The placeholder keeping a slice from having no ready endpoint.
pub fn dummy_endpoint(lb: &LoadBalancer) -> Endpoint {
    new_dummy(lb.namespace(), lb.name_any())
}

fn new_dummy(namespace: Option<String>, name: String) -> Endpoint {
    Endpoint {
        addresses: vec![DUMMY_ENDPOINT_ADDRESS.to_string()],
        target_ref: Some(ObjectReference {
            namespace,
            name: Some(name),
            uid: Some(DUMMY_ENDPOINT_UID.to_string()),
            ..Default::default()
        }),
        conditions: ready_conditions(true),
        ..Default::default()
    }
}

/// Keeps one ready dummy endpoint while no real endpoint is ready, and none once one is.
fn settle_dummy(eps: &mut EndpointSlice) {
    let dummy = eps.endpoints.iter().find(|ep| is_dummy(ep)).cloned();
    eps.endpoints.retain(|ep| !is_dummy(ep));
    if probe_ready_count(eps) > 0 {
        return;
    }
    let mut dummy = dummy.unwrap_or_else(|| new_dummy(eps.namespace(), eps.name_any()));
    dummy.conditions = ready_conditions(true);
    eps.endpoints.push(dummy);
}

/// Builds the EndpointSlice forwarding to `servers`.
///
/// An endpoint already in `current` with the same target uid and address is kept as is,
/// so its recorded health survives. New endpoints start ready.
/// The dummy endpoint stays in the slice until one of the servers is ready.
pub fn build_endpoint_slice<S: BackendServer>(
    current: Option<&EndpointSlice>,
    lb: &LoadBalancer,
    servers: &[&S],
) -> Result<EndpointSlice, Error> {
    let mut eps = match current {
        Some(eps) => eps.clone(),
        None => EndpointSlice {
            metadata: ObjectMeta {
                name: Some(lb.name_any()),
                namespace: lb.namespace(),
                owner_references: Some(vec![create_owner_reference(lb)]),
                labels: Some(BTreeMap::from([
                    (SERVICE_LB_LABEL.to_string(), VALUE_TRUE.to_string()),
                    (SERVICE_NAME_LABEL.to_string(), lb.name_any()),
                ])),
                ..Default::default()
            },
            address_type: ADDRESS_TYPE_IPV4.to_string(),
            endpoints: Vec::new(),
            ports: None,
        },
    };

    eps.ports = Some(
        lb.spec
            .listeners
            .iter()
            .map(|l| EndpointPort {
                name: Some(l.name.clone()),
                protocol: Some(l.protocol.clone()),
                port: Some(l.backend_port),
                ..Default::default()
            })
            .collect(),
    );

    let mut endpoints = Vec::with_capacity(servers.len());
    for server in servers {
        let Some(address) = server.address() else {
            continue;
        };
        let uid = server.uid();
        let mut existing = None;
        for ep in eps.endpoints.iter() {
            if ep.addresses.len() != 1 {
                return Err(Error::InvalidParameter(format!(
                    "endpoint of {} must have exactly one address: {:?}",
                    lb.name_any(),
                    ep.addresses
                )));
            }
            let same_target = ep
                .target_ref
                .as_ref()
                .map(|r| r.uid.as_deref() == Some(uid.as_str()))
                .unwrap_or(false);
            if same_target && ep.addresses[0] == address {
                existing = Some(ep.clone());
                break;
            }
        }
        endpoints.push(existing.unwrap_or_else(|| Endpoint {
            addresses: vec![address],
            target_ref: Some(ObjectReference {
                namespace: Some(server.namespace()),
                name: Some(server.name()),
                uid: Some(uid),
                ..Default::default()
            }),
            conditions: ready_conditions(true),
            ..Default::default()
        }));
    }
    endpoints.extend(eps.endpoints.iter().find(|ep| is_dummy(ep)).cloned());
    eps.endpoints = endpoints;
    settle_dummy(&mut eps);

    Ok(eps)
}

/// Sets `ready` on every real endpoint. Returns None when nothing changed.
pub fn set_all_ready(eps: &EndpointSlice, ready: bool) -> Option<EndpointSlice> {
    let mut new = eps.clone();
    let mut changed = false;
    for ep in new.endpoints.iter_mut().filter(|ep| !is_dummy(ep)) {
        if ep.conditions.as_ref().and_then(|c| c.ready) != Some(ready) {
            ep.conditions.get_or_insert_with(Default::default).ready = Some(ready);
            changed = true;
        }
    }
    if !changed {
        return None;
    }
    settle_dummy(&mut new);
    Some(new)
}

/// Sets `ready` on the endpoint with `ip`. Returns None when nothing changed.
pub fn set_ready(eps: &EndpointSlice, ip: &str, ready: bool) -> Option<EndpointSlice> {
    let mut new = eps.clone();
    let ep = new
        .endpoints
        .iter_mut()
        .find(|ep| ep.addresses.first().map(|a| a == ip).unwrap_or(false))?;
    if ep.conditions.as_ref().and_then(|c| c.ready) == Some(ready) {
        return None;
    }
    ep.conditions.get_or_insert_with(Default::default).ready = Some(ready);
    settle_dummy(&mut new);
    Some(new)
}

/// Real endpoints currently ready.
pub fn probe_ready_count(eps: &EndpointSlice) -> usize {
    eps.endpoints
        .iter()
        .filter(|ep| !is_dummy(ep) && is_ready(ep))
        .count()
}

pub fn probe_address(ip: &str, port: u32) -> String {
    if ip.contains(':') {
        format!("[{ip}]:{port}")
    } else {
        format!("{ip}:{port}")
    }
}

fn health_option(hc: &HealthCheck, address: String, ep: &Endpoint) -> HealthOption {
    HealthOption {
        address,
        success_threshold: hc.success_threshold,
        failure_threshold: hc.failure_threshold,
        timeout: Duration::from_secs(hc.timeout_seconds as u64),
        period: Duration::from_secs(hc.period_seconds as u64),
        initial_condition: ep.conditions.as_ref().and_then(|c| c.ready).unwrap_or(true),
    }
    .normalized()
}

/// The probes wanted for the real endpoints of `eps`, keyed by probe address.
pub fn target_probes(hc: &HealthCheck, eps: &EndpointSlice) -> HashMap<String, HealthOption> {
    eps.endpoints
        .iter()
        .filter(|ep| !is_dummy(ep))
        .filter_map(|ep| {
            let ip = ep.addresses.first()?;
            let address = probe_address(ip, hc.port);
            Some((address.clone(), health_option(hc, address, ep)))
        })
        .collect()
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct ProbeDiff {
    pub add: Vec<HealthOption>,
    pub replace: Vec<HealthOption>,
    pub remove: Vec<String>,
}

impl ProbeDiff {
    pub fn is_empty(&self) -> bool {
        self.add.is_empty() && self.replace.is_empty() && self.remove.is_empty()
    }
}

/// Compares running probes with wanted ones.
/// Probes with the same target on both sides are left alone, whatever their initial condition.
pub fn diff_probes(
    active: &HashMap<String, HealthOption>,
    target: &HashMap<String, HealthOption>,
) -> ProbeDiff {
    let mut diff = ProbeDiff::default();
    for (address, option) in target.iter() {
        match active.get(address) {
            None => diff.add.push(option.clone()),
            Some(current) if !current.same_target(option) => diff.replace.push(option.clone()),
            Some(_) => {}
        }
    }
    for address in active.keys() {
        if !target.contains_key(address) {
            diff.remove.push(address.clone());
        }
    }
    diff.add.sort_by(|a, b| a.address.cmp(&b.address));
    diff.replace.sort_by(|a, b| a.address.cmp(&b.address));
    diff.remove.sort();
    diff
}
