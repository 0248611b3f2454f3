use std::collections::BTreeMap;

use k8s_openapi::{
    api::core::v1::{Service, ServicePort, ServiceSpec},
    apimachinery::pkg::util::intstr::IntOrString,
};
use kube::{core::ObjectMeta, ResourceExt};

use crate::{
    crd::{
        load_balancer::{Ipam, LoadBalancer, ADDRESS_ASK_DHCP},
        VALUE_TRUE,
    },
    util::create_owner_reference,
};

pub const SERVICE_LB_LABEL: &str = "loadbalancer.harvesterhci.io/servicelb";
pub const SERVICE_NAME_LABEL: &str = "kubernetes.io/service-name";
pub const SERVICE_TYPE_LOAD_BALANCER: &str = "LoadBalancer";

/// Builds the Service realizing `lb`.
/// Metadata of `current` is kept, the load balancer IP and ports follow `lb`.
pub fn build_service(current: Option<&Service>, lb: &LoadBalancer) -> Service {
    let mut svc = match current {
        Some(svc) => svc.clone(),
        None => Service {
            metadata: ObjectMeta {
                name: Some(lb.name_any()),
                namespace: lb.namespace(),
                owner_references: Some(vec![create_owner_reference(lb)]),
                labels: Some(BTreeMap::from([(
                    SERVICE_LB_LABEL.to_string(),
                    VALUE_TRUE.to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                type_: Some(SERVICE_TYPE_LOAD_BALANCER.to_string()),
                ..Default::default()
            }),
            status: None,
        },
    };

    let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
    spec.load_balancer_ip = Some(match lb.spec.ipam {
        Ipam::Dhcp => ADDRESS_ASK_DHCP.to_string(),
        Ipam::Pool => lb.status_or_default().allocated_address.ip,
    });
    spec.ports = Some(
        lb.spec
            .listeners
            .iter()
            .map(|l| ServicePort {
                name: Some(l.name.clone()),
                protocol: Some(l.protocol.clone()),
                port: l.port,
                target_port: Some(IntOrString::Int(l.backend_port)),
                ..Default::default()
            })
            .collect(),
    );

    svc
}

/// The address assigned to the Service from outside, if any.
pub fn service_ip(svc: &Service) -> Option<String> {
    svc.status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?
        .ip
        .clone()
        .filter(|ip| !ip.is_empty())
}
