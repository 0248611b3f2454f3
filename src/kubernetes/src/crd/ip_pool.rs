use std::collections::BTreeMap;

use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use vlbd_ipam::{
    range::RangeSpec,
    selector::{Candidate, PoolSelector, Scope},
};

use super::{condition::Condition, VALUE_TRUE};

pub const IP_POOL_FINALIZER: &str = "ippool.loadbalancer.harvesterhci.io/finalizer";
pub const GLOBAL_IP_POOL_LABEL: &str = "loadbalancer.harvesterhci.io/global-ip-pool";
// value format: "<ip>: <namespace>/<name>"
pub const MANUALLY_RELEASE_IP_ANNOTATION: &str = "loadbalancer.harvesterhci.io/manuallyReleaseIP";

#[derive(CustomResource, Debug, Serialize, Deserialize, Default, Clone, JsonSchema)]
#[kube(
    group = "loadbalancer.harvesterhci.io",
    version = "v1beta1",
    kind = "IPPool",
    shortname = "pool",
    shortname = "pools"
)]
#[kube(status = "IPPoolStatus")]
#[kube(
    printcolumn = r#"{"name":"DESCRIPTION", "type":"string", "description":"Description of IPPool", "jsonPath":".spec.description"}"#,
    printcolumn = r#"{"name":"RANGES", "type":"string", "description":"Address ranges", "jsonPath":".spec.ranges"}"#,
    printcolumn = r#"{"name":"PRIORITY", "type":"integer", "description":"Selector priority", "jsonPath":".spec.selector.priority"}"#,
    printcolumn = r#"{"name":"AGE", "type":"date", "description":"Date from created", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct IPPoolSpec {
    pub description: Option<String>,
    pub ranges: Vec<Range>,
    #[serde(default)]
    pub selector: Selector,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub subnet: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_start: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_end: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    #[serde(default)]
    pub priority: u32,
    #[serde(default)]
    pub network: String,
    #[serde(default)]
    pub scope: Vec<Tuple>,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Tuple {
    #[serde(default)]
    pub project: String,
    #[serde(default)]
    pub namespace: String,
    #[serde(default)]
    pub guest_cluster: String,
}

#[derive(Deserialize, Serialize, Clone, Default, Debug, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct IPPoolStatus {
    #[serde(default)]
    pub total: i64,
    #[serde(default)]
    pub available: i64,
    #[serde(default)]
    pub last_allocated: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allocated: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub allocated_history: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl From<&Range> for RangeSpec {
    fn from(r: &Range) -> Self {
        RangeSpec {
            subnet: r.subnet.clone(),
            range_start: r.range_start.clone().filter(|s| !s.is_empty()),
            range_end: r.range_end.clone().filter(|s| !s.is_empty()),
            gateway: r.gateway.clone().filter(|s| !s.is_empty()),
        }
    }
}

impl From<&Tuple> for Scope {
    fn from(t: &Tuple) -> Self {
        Scope::new(&t.project, &t.namespace, &t.guest_cluster)
    }
}

impl From<&Selector> for PoolSelector {
    fn from(s: &Selector) -> Self {
        PoolSelector {
            priority: s.priority,
            network: s.network.clone(),
            scope: s.scope.iter().map(Scope::from).collect(),
        }
    }
}

impl IPPool {
    pub fn range_specs(&self) -> Vec<RangeSpec> {
        self.spec.ranges.iter().map(RangeSpec::from).collect()
    }

    pub fn allocated(&self) -> BTreeMap<String, String> {
        self.status
            .as_ref()
            .map(|s| s.allocated.clone())
            .unwrap_or_default()
    }

    /// Whether the selector makes this pool serve every request.
    pub fn has_global_scope(&self) -> bool {
        PoolSelector::from(&self.spec.selector).is_global()
    }
}

impl Candidate for IPPool {
    fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn selector(&self) -> PoolSelector {
        PoolSelector::from(&self.spec.selector)
    }

    fn is_global(&self) -> bool {
        self.labels()
            .get(GLOBAL_IP_POOL_LABEL)
            .map(|v| v == VALUE_TRUE)
            .unwrap_or(false)
    }
}
