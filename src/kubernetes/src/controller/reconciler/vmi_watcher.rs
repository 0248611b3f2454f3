use std::sync::Arc;

use kube::{runtime::reflector::ObjectRef, Resource, ResourceExt};

use crate::{
    controller::backend::selector_matches,
    crd::{load_balancer::LoadBalancer, virtual_machine_instance::VirtualMachineInstance},
};

/// LoadBalancers to enqueue when `vmi` changes or goes away.
pub fn load_balancers_for_vmi(
    vmi: &VirtualMachineInstance,
    lbs: &[Arc<LoadBalancer>],
) -> Vec<ObjectRef<LoadBalancer>> {
    let namespace = vmi.namespace().unwrap_or_default();
    let refs: Vec<ObjectRef<LoadBalancer>> = lbs
        .iter()
        .filter(|lb| lb.namespace().unwrap_or_default() == namespace)
        .filter(|lb| lb.meta().deletion_timestamp.is_none())
        .filter(|lb| lb.is_vm_workload())
        .filter(|lb| selector_matches(&lb.spec.backend_server_selector, vmi.labels()))
        .map(|lb| ObjectRef::from_obj(lb.as_ref()))
        .collect();

    if !refs.is_empty() {
        tracing::debug!(
            vmi = vmi.name_any(),
            namespace,
            count = refs.len(),
            "Enqueue LoadBalancers for VirtualMachineInstance"
        );
    }
    refs
}
