use std::collections::BTreeMap;

use kube::{Resource, ResourceExt};

use crate::crd::{load_balancer::LoadBalancer, virtual_machine_instance::VirtualMachineInstance};

/// A workload that can receive traffic of a LoadBalancer.
pub trait BackendServer: Send + Sync {
    fn uid(&self) -> String;
    fn namespace(&self) -> String;
    fn name(&self) -> String;
    /// The address traffic is forwarded to, if the server has one.
    fn address(&self) -> Option<String>;
}

impl BackendServer for VirtualMachineInstance {
    fn uid(&self) -> String {
        ResourceExt::uid(self).unwrap_or_default()
    }

    fn namespace(&self) -> String {
        ResourceExt::namespace(self).unwrap_or_default()
    }

    fn name(&self) -> String {
        self.name_any()
    }

    fn address(&self) -> Option<String> {
        self.ipv4_address()
    }
}

/// Every key of `selector` must be labeled with one of its listed values.
/// An empty selector or an empty value list never matches.
pub fn selector_matches(
    selector: &BTreeMap<String, Vec<String>>,
    labels: &BTreeMap<String, String>,
) -> bool {
    !selector.is_empty()
        && selector
            .iter()
            .all(|(key, values)| labels.get(key).map(|v| values.contains(v)).unwrap_or(false))
}

/// Picks the VMIs serving `lb`: selected by its backend selector, in its namespace,
/// not being deleted and with an address.
pub fn qualified_servers<'a>(
    lb: &LoadBalancer,
    vmis: &'a [VirtualMachineInstance],
) -> Vec<&'a VirtualMachineInstance> {
    let namespace = lb.namespace().unwrap_or_default();
    vmis.iter()
        .filter(|vmi| ResourceExt::namespace(*vmi).unwrap_or_default() == namespace)
        .filter(|vmi| vmi.meta().deletion_timestamp.is_none())
        .filter(|vmi| selector_matches(&lb.spec.backend_server_selector, vmi.labels()))
        .filter(|vmi| vmi.address().is_some())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use rstest::rstest;

    use crate::fixture::test_vmi;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn sel(pairs: &[(&str, &[&str])]) -> BTreeMap<String, Vec<String>> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect()
    }

    #[rstest(
        selector,
        labels,
        expected,
        case(sel(&[("app", &["web"])]), map(&[("app", "web")]), true),
        case(sel(&[("app", &["web", "api"])]), map(&[("app", "api"), ("tier", "1")]), true),
        case(sel(&[("app", &["web"]), ("tier", &["1"])]), map(&[("app", "web")]), false),
        case(sel(&[("app", &["web"])]), map(&[("app", "db")]), false),
        case(sel(&[("app", &[])]), map(&[("app", "web")]), false),
        case(sel(&[]), map(&[("app", "web")]), false),
    )]
    fn works_selector_matches(
        selector: BTreeMap<String, Vec<String>>,
        labels: BTreeMap<String, String>,
        expected: bool,
    ) {
        assert_eq!(expected, selector_matches(&selector, &labels));
    }

    #[test]
    fn works_qualified_servers() {
        let mut lb = crate::fixture::test_load_balancer("default", "lb1");
        lb.spec.backend_server_selector = sel(&[("app", &["web"])]);

        let ok = test_vmi("default", "vm1", "uid-1", &[("app", "web")], Some("10.0.0.11"));
        let no_addr = test_vmi("default", "vm2", "uid-2", &[("app", "web")], None);
        let v6_only = test_vmi("default", "vm3", "uid-3", &[("app", "web")], Some("fd00::1"));
        let other_ns = test_vmi("other", "vm4", "uid-4", &[("app", "web")], Some("10.0.0.14"));
        let unmatched = test_vmi("default", "vm5", "uid-5", &[("app", "db")], Some("10.0.0.15"));
        let mut deleting = test_vmi("default", "vm6", "uid-6", &[("app", "web")], Some("10.0.0.16"));
        deleting.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));

        let vmis = vec![ok, no_addr, v6_only, other_ns, unmatched, deleting];
        let servers = qualified_servers(&lb, &vmis);
        assert_eq!(1, servers.len());
        assert_eq!("vm1", BackendServer::name(servers[0]));
        assert_eq!(Some("10.0.0.11".to_string()), servers[0].address());
        assert_eq!("uid-1", BackendServer::uid(servers[0]));
    }
}
