use std::net::IpAddr;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Read-only view of a KubeVirt VirtualMachineInstance.
/// Only the fields needed to use it as a backend server are modeled.
#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(
    group = "kubevirt.io",
    version = "v1",
    kind = "VirtualMachineInstance",
    shortname = "vmi"
)]
#[kube(status = "VirtualMachineInstanceStatus")]
#[kube(namespaced)]
pub struct VirtualMachineInstanceSpec {}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceStatus {
    #[serde(default)]
    pub interfaces: Vec<VirtualMachineInstanceNetworkInterface>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineInstanceNetworkInterface {
    pub name: Option<String>,
    pub ip_address: Option<String>,
    #[serde(default)]
    pub ip_addresses: Vec<String>,
}

impl VirtualMachineInstance {
    /// The first IPv4 address reported on any interface.
    pub fn ipv4_address(&self) -> Option<String> {
        self.status
            .as_ref()?
            .interfaces
            .iter()
            .filter_map(|i| i.ip_address.as_deref())
            .find(|ip| matches!(ip.parse::<IpAddr>(), Ok(IpAddr::V4(_))))
            .map(|ip| ip.to_string())
    }
}
