use std::sync::{Arc, Mutex};

use common::{cleanup_kind, setup_kind, test_cluster_load_balancer, test_ip_pool};

use kube::{
    api::{DeleteParams, Patch, PatchParams},
    Api, Client, ResourceExt,
};
use vlbd_ipam::registry::AllocatorRegistry;
use vlbd_kubernetes::{
    controller::{
        self,
        context::{Ctx, State},
        engine::Engine,
        lb_manager::ServiceLbManager,
        metrics::Metrics,
    },
    crd::{
        condition::is_ready,
        ip_pool::IPPool,
        load_balancer::{LoadBalancer, LOAD_BALANCER_FINALIZER},
    },
    fixture::test_trace,
};
use vlbd_prober::{manager::Manager, probe::TcpProber};

mod common;

#[tokio::test]
#[ignore = "use kind cluster"]
async fn integration_test_load_balancer() {
    tracing::info!("Creating a kind cluster");
    setup_kind();

    test_trace();

    tracing::info!("Getting kube client");
    let client = Client::try_default().await.unwrap();
    let metrics = Arc::new(Mutex::new(Metrics::default()));
    let registry = Arc::new(AllocatorRegistry::new());
    let pool_ctx = State::default().to_context_with(
        client.clone(),
        30,
        registry.clone(),
        metrics.clone(),
    );

    let lb_manager = Arc::new(ServiceLbManager::new(
        client.clone(),
        Arc::new(Manager::new(Arc::new(TcpProber))),
        Default::default(),
        metrics.clone(),
    ));
    let engine = Arc::new(Engine::new(
        Arc::new(Api::<IPPool>::all(client.clone())),
        registry,
        lb_manager,
        false,
    ));
    let lb_ctx = State::default().to_context_with(client.clone(), 30, engine, metrics);

    let ssapply = PatchParams::apply("ctrltest");

    tracing::info!("Creating an IPPool resource");
    let pool = test_ip_pool();
    let pool_api = Api::<IPPool>::all(client.clone());
    pool_api
        .patch(&pool.name_any(), &ssapply, &Patch::Apply(pool.clone()))
        .await
        .unwrap();
    let applied_pool = pool_api.get(&pool.name_any()).await.unwrap();
    controller::reconciler::ip_pool::reconciler(Arc::new(applied_pool), pool_ctx.clone())
        .await
        .unwrap();

    tracing::info!("Creating a LoadBalancer resource");
    let mut lb = test_cluster_load_balancer();
    lb.metadata.finalizers = Some(vec![LOAD_BALANCER_FINALIZER.to_string()]);
    let lb_api = Api::<LoadBalancer>::namespaced(lb_ctx.client().clone(), "default");
    lb_api
        .patch(&lb.name_any(), &ssapply, &Patch::Apply(lb.clone()))
        .await
        .unwrap();
    let applied_lb = lb_api.get(&lb.name_any()).await.unwrap();

    tracing::info!("Reconciling LoadBalancer");
    controller::reconciler::load_balancer::reconciler(Arc::new(applied_lb), lb_ctx.clone())
        .await
        .unwrap();

    tracing::info!("Checking the allocated address");
    let reconciled = lb_api.get(&lb.name_any()).await.unwrap();
    let status = reconciled.status.clone().unwrap();
    assert!(is_ready(&status.conditions));
    assert_eq!("test-pool", status.allocated_address.ip_pool);
    assert_eq!("192.168.100.1", status.allocated_address.gateway);
    assert_eq!(status.allocated_address.ip, status.address);

    let pool = pool_api.get("test-pool").await.unwrap();
    let pool_status = pool.status.clone().unwrap();
    assert_eq!(
        Some(&"default/test-lb".to_string()),
        pool_status.allocated.get(&status.allocated_address.ip)
    );
    assert_eq!(9, pool_status.available);

    tracing::info!("Deleting the LoadBalancer");
    lb_api
        .delete(&lb.name_any(), &DeleteParams::default())
        .await
        .unwrap();
    let deleting = lb_api.get(&lb.name_any()).await.unwrap();
    controller::reconciler::load_balancer::reconciler(Arc::new(deleting), lb_ctx.clone())
        .await
        .unwrap();

    tracing::info!("Checking the address is released");
    let pool = pool_api.get("test-pool").await.unwrap();
    let pool_status = pool.status.clone().unwrap();
    assert!(pool_status.allocated.is_empty());
    assert_eq!(10, pool_status.available);
    assert_eq!(
        Some(&"default/test-lb".to_string()),
        pool_status.allocated_history.get(&status.allocated_address.ip)
    );

    tracing::info!("Cleaning up a kind cluster");
    cleanup_kind();
}
