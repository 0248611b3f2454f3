use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use vlbd_ipam::selector::Requirement;

use super::condition::Condition;

pub const LOAD_BALANCER_FINALIZER: &str = "loadbalancer.loadbalancer.harvesterhci.io/finalizer";

// pool selection requirements, referred by the cloud provider
pub const ANNOTATION_NETWORK: &str = "loadbalancer.harvesterhci.io/network";
pub const ANNOTATION_PROJECT: &str = "loadbalancer.harvesterhci.io/project";
pub const ANNOTATION_NAMESPACE: &str = "loadbalancer.harvesterhci.io/namespace";
pub const ANNOTATION_CLUSTER: &str = "loadbalancer.harvesterhci.io/cluster";

/// The Service gets its address by DHCP when its load balancer IP is this.
pub const ADDRESS_ASK_DHCP: &str = "0.0.0.0";

#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(
    group = "loadbalancer.harvesterhci.io",
    version = "v1beta1",
    kind = "LoadBalancer",
    shortname = "lb",
    shortname = "lbs"
)]
#[kube(status = "LoadBalancerStatus")]
#[kube(namespaced)]
#[kube(
    printcolumn = r#"{"name":"DESCRIPTION", "type":"string", "description":"Description of LoadBalancer", "jsonPath":".spec.description"}"#,
    printcolumn = r#"{"name":"WORKLOADTYPE", "type":"string", "description":"Type of backend workload", "jsonPath":".spec.workloadType"}"#,
    printcolumn = r#"{"name":"IPAM", "type":"string", "description":"Address management mode", "jsonPath":".spec.ipam"}"#,
    printcolumn = r#"{"name":"ADDRESS", "type":"string", "description":"Assigned address", "jsonPath":".status.address"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "description":"Date from created", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerSpec {
    pub description: Option<String>,
    #[serde(default)]
    pub workload_type: WorkloadType,
    #[serde(default)]
    pub ipam: Ipam,
    pub ip_pool: Option<String>,
    #[serde(default)]
    pub listeners: Vec<Listener>,
    #[serde(default)]
    pub backend_server_selector: BTreeMap<String, Vec<String>>,
    pub health_check: Option<HealthCheck>,
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, JsonSchema, PartialEq, Eq)]
pub enum WorkloadType {
    #[default]
    #[serde(rename = "vm")]
    Vm,
    #[serde(rename = "cluster")]
    Cluster,
}

#[derive(Deserialize, Serialize, Clone, Copy, Default, Debug, JsonSchema, PartialEq, Eq)]
pub enum Ipam {
    #[default]
    #[serde(rename = "pool")]
    Pool,
    #[serde(rename = "dhcp")]
    Dhcp,
}

impl std::fmt::Display for Ipam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Ipam::Pool => write!(f, "pool"),
            Ipam::Dhcp => write!(f, "dhcp"),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Listener {
    #[serde(default)]
    pub name: String,
    pub port: i32,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub backend_port: i32,
}

fn default_protocol() -> String {
    "TCP".to_string()
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    #[serde(default)]
    pub port: u32,
    #[serde(default)]
    pub success_threshold: u32,
    #[serde(default)]
    pub failure_threshold: u32,
    #[serde(default)]
    pub period_seconds: u32,
    #[serde(default)]
    pub timeout_seconds: u32,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerStatus {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backend_servers: Vec<String>,
    #[serde(default)]
    pub allocated_address: AllocatedAddress,
    #[serde(default)]
    pub address: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AllocatedAddress {
    #[serde(default)]
    pub ip_pool: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub mask: String,
    #[serde(default)]
    pub gateway: String,
}

impl LoadBalancer {
    /// The requirement used to pick a pool when `ipPool` is not given.
    /// The namespace defaults to the one of the object.
    pub fn requirement(&self) -> Requirement {
        let annotations = self.annotations();
        let get = |key: &str| annotations.get(key).cloned().unwrap_or_default();
        let mut namespace = get(ANNOTATION_NAMESPACE);
        if namespace.is_empty() {
            namespace = self.namespace().unwrap_or_default();
        }
        Requirement {
            network: get(ANNOTATION_NETWORK),
            project: get(ANNOTATION_PROJECT),
            namespace,
            cluster: get(ANNOTATION_CLUSTER),
        }
    }

    /// The health check, when enabled with a non-zero port.
    pub fn health_check(&self) -> Option<&HealthCheck> {
        self.spec.health_check.as_ref().filter(|hc| hc.port != 0)
    }

    pub fn is_vm_workload(&self) -> bool {
        self.spec.workload_type == WorkloadType::Vm
    }

    pub fn status_or_default(&self) -> LoadBalancerStatus {
        self.status.clone().unwrap_or_default()
    }
}
