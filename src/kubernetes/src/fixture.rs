use std::collections::BTreeMap;

use kube::core::ObjectMeta;

use crate::crd::{
    ip_pool::{IPPool, IPPoolSpec, Range},
    load_balancer::{LoadBalancer, LoadBalancerSpec},
    virtual_machine_instance::{
        VirtualMachineInstance, VirtualMachineInstanceNetworkInterface,
        VirtualMachineInstanceSpec, VirtualMachineInstanceStatus,
    },
};

pub fn test_trace() {
    // the global subscriber may be already set by another test
    let _ = vlbd_trace::init::prepare_tracing(vlbd_trace::init::TraceConfig {
        level: "info".to_string(),
        format: String::new(),
        file: None,
        _metrics_endpoint: None,
    });
}

pub fn test_load_balancer(namespace: &str, name: &str) -> LoadBalancer {
    LoadBalancer {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..Default::default()
        },
        spec: LoadBalancerSpec::default(),
        status: None,
    }
}

/// Pool with a single range covering `subnet`.
pub fn test_ip_pool(name: &str, subnet: &str) -> IPPool {
    IPPool {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        spec: IPPoolSpec {
            description: None,
            ranges: vec![Range {
                subnet: subnet.to_string(),
                ..Default::default()
            }],
            selector: Default::default(),
        },
        status: None,
    }
}

pub fn test_vmi(
    namespace: &str,
    name: &str,
    uid: &str,
    labels: &[(&str, &str)],
    ip: Option<&str>,
) -> VirtualMachineInstance {
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let interfaces = match ip {
        Some(ip) => vec![VirtualMachineInstanceNetworkInterface {
            name: Some("default".to_string()),
            ip_address: Some(ip.to_string()),
            ip_addresses: vec![ip.to_string()],
        }],
        None => Vec::new(),
    };

    VirtualMachineInstance {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: VirtualMachineInstanceSpec {},
        status: Some(VirtualMachineInstanceStatus { interfaces }),
    }
}
