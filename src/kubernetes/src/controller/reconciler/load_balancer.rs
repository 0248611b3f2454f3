use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use k8s_openapi::api::{core::v1::Service, discovery::v1::EndpointSlice};
use kube::{
    api::{ListParams, PostParams},
    runtime::{
        controller::{Action, Controller},
        finalizer::{finalizer, Event},
        watcher::Config,
    },
    Api, Client, ResourceExt,
};

use crate::{
    controller::{
        context::{error_policy, ContextWith, Ctx, State},
        engine::Engine,
        error::{Error, ErrorKind},
        metrics::Metrics,
        service::SERVICE_LB_LABEL,
    },
    crd::{
        condition::is_ready,
        load_balancer::{LoadBalancer, LOAD_BALANCER_FINALIZER},
        virtual_machine_instance::VirtualMachineInstance,
        VALUE_TRUE,
    },
    util::get_namespace,
};

use super::vmi_watcher::load_balancers_for_vmi;

/// Requeue delay while an address or the Service IP is on its way.
pub const ALLOCATING_REQUEUE_SECONDS: u64 = 1;

#[tracing::instrument(skip_all, fields(trace_id))]
pub async fn reconciler(
    lb: Arc<LoadBalancer>,
    ctx: Arc<ContextWith<Arc<Engine>>>,
) -> Result<Action, Error> {
    let ns = get_namespace::<LoadBalancer>(&lb).map_err(Error::KubeLibrary)?;
    let lbs = Api::<LoadBalancer>::namespaced(ctx.client().clone(), &ns);

    finalizer(&lbs, LOAD_BALANCER_FINALIZER, lb, |event| async {
        match event {
            Event::Apply(lb) => reconcile(&lbs, &lb, ctx.clone()).await,
            Event::Cleanup(lb) => cleanup(&lbs, &lb, ctx.clone()).await,
        }
    })
    .await
    .map_err(|e| Error::Finalizer(Box::new(e)))
}

#[tracing::instrument(skip_all)]
async fn reconcile(
    api: &Api<LoadBalancer>,
    lb: &LoadBalancer,
    ctx: Arc<ContextWith<Arc<Engine>>>,
) -> Result<Action, Error> {
    let trace_id = vlbd_trace::telemetry::get_trace_id();
    tracing::Span::current().record("trace_id", &tracing::field::display(&trace_id));
    let _timer = ctx
        .metrics()
        .lock()
        .map_err(|_| Error::FailedToGetLock)?
        .count_and_measure();
    ctx.touch(lb).await;
    ctx.metrics()
        .lock()
        .map_err(|_| Error::FailedToGetLock)?
        .reconciliation(lb);

    let ns = get_namespace::<LoadBalancer>(lb).map_err(Error::KubeLibrary)?;
    let name = lb.name_any();
    tracing::info!(name, namespace = ns, "reconcile LoadBalancer");

    let outcome = ctx.component.on_change(lb).await;

    if lb.status.as_ref() != Some(&outcome.status) {
        let mut new_lb = lb.clone();
        new_lb.status = Some(outcome.status.clone());
        api.replace_status(
            &name,
            &PostParams::default(),
            serde_json::to_vec(&new_lb).map_err(Error::Serialization)?,
        )
        .await
        .map_err(Error::Kube)?;
        tracing::info!(name, namespace = ns, address = %outcome.status.allocated_address.ip, "Update LoadBalancer status");
    }

    ctx.metrics()
        .lock()
        .map_err(|_| Error::FailedToGetLock)?
        .loadbalancer_ready(&ns, &name, is_ready(&outcome.status.conditions));

    match outcome.error {
        None => Ok(Action::requeue(Duration::from_secs(ctx.interval()))),
        Some(e) => match e.kind() {
            ErrorKind::Requeue => {
                tracing::info!(name, namespace = ns, reason = %e, "Requeue LoadBalancer");
                Ok(Action::requeue(Duration::from_secs(
                    ALLOCATING_REQUEUE_SECONDS,
                )))
            }
            ErrorKind::WaitForSignal => {
                tracing::info!(name, namespace = ns, reason = %e, "Wait for backend servers");
                Ok(Action::await_change())
            }
            ErrorKind::Fatal => Err(e),
        },
    }
}

#[tracing::instrument(skip_all)]
async fn cleanup(
    _api: &Api<LoadBalancer>,
    lb: &LoadBalancer,
    ctx: Arc<ContextWith<Arc<Engine>>>,
) -> Result<Action, Error> {
    let ns = get_namespace::<LoadBalancer>(lb).map_err(Error::KubeLibrary)?;
    let name = lb.name_any();
    tracing::info!(name, namespace = ns, "clean up LoadBalancer");

    ctx.component.on_remove(lb).await?;

    ctx.metrics()
        .lock()
        .map_err(|_| Error::FailedToGetLock)?
        .loadbalancer_remove(&ns, &name);

    Ok(Action::await_change())
}

pub async fn run(
    state: State,
    interval: u64,
    engine: Arc<Engine>,
    metrics: Arc<std::sync::Mutex<Metrics>>,
) {
    let client = Client::try_default()
        .await
        .expect("Failed to create kube client");

    let lbs = Api::<LoadBalancer>::all(client.clone());
    if let Err(e) = lbs.list(&ListParams::default().limit(1)).await {
        tracing::error!("CRD is not queryable; {e:?}. Is the CRD installed?");
        tracing::info!("Installation: cargo run --bin crdgen | kubectl apply -f -");
        std::process::exit(1);
    }

    let services = Api::<Service>::all(client.clone());
    let endpoint_slices = Api::<EndpointSlice>::all(client.clone());
    let vmis = Api::<VirtualMachineInstance>::all(client.clone());
    let owned = Config::default().labels(&format!("{SERVICE_LB_LABEL}={VALUE_TRUE}"));

    tracing::info!("Start LoadBalancer reconciler");

    let controller = Controller::new(lbs, Config::default().any_semantic());
    let store = controller.store();
    controller
        .owns(services, owned.clone())
        .owns(endpoint_slices, owned)
        .watches(vmis, Config::default(), move |vmi| {
            load_balancers_for_vmi(&vmi, &store.state())
        })
        .shutdown_on_signal()
        .run(
            reconciler,
            error_policy::<LoadBalancer, Error, ContextWith<Arc<Engine>>>,
            state.to_context_with(client, interval, engine, metrics),
        )
        .filter_map(|x| async move { std::result::Result::ok(x) })
        .for_each(|_| futures::future::ready(()))
        .await;
}
