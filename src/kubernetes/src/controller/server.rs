use std::sync::{Arc, Mutex};

use actix_web::{
    get, middleware, post,
    web::{self, Data},
    App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use kube::{core::admission::AdmissionReview, Api, Client};
use prometheus::{Encoder, TextEncoder};
use vlbd_cert::util::server_config;
use vlbd_ipam::registry::AllocatorRegistry;
use vlbd_prober::{manager::Manager, probe::TcpProber};
use vlbd_trace::init::{prepare_tracing, TraceConfig};

use crate::crd::{ip_pool::IPPool, load_balancer::LoadBalancer};

use super::{
    config::Config, context::State, engine::Engine, error::Error, lb_manager::ServiceLbManager,
    metrics::Metrics, migration, reconciler, webhook,
};

pub fn start(config: Config, trace: TraceConfig) -> Result<(), Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(Error::StdIo)?
        .block_on(run(config, trace))
}

#[tracing::instrument(skip_all)]
async fn run(config: Config, trace_config: TraceConfig) -> Result<(), Error> {
    prepare_tracing(trace_config).map_err(Error::Trace)?;

    let tls_config = server_config(&config.tls.cert, &config.tls.key).map_err(Error::Cert)?;

    // Initiatilize Kubernetes controller state
    let state = State::new("controller");
    let metrics = Arc::new(Mutex::new(
        Metrics::default()
            .register(&state.registry)
            .map_err(Error::Metrics)?,
    ));

    let client = Client::try_default().await.map_err(Error::Kube)?;

    if config.migrate_kubevip {
        match migration::migrate(client.clone()).await {
            Ok(created) => tracing::info!(pools=?created, "Migrate kube-vip address configuration"),
            Err(e) => tracing::error!(error=?e, "failed to migrate kube-vip address configuration"),
        }
    }

    let registry = Arc::new(AllocatorRegistry::new());

    let prober = Arc::new(Manager::new(Arc::new(TcpProber)));
    let lb_manager = Arc::new(ServiceLbManager::new(
        client.clone(),
        prober.clone(),
        config.external_ip,
        metrics.clone(),
    ));
    prober.start(lb_manager.clone()).map_err(Error::Prober)?;

    let engine = Arc::new(Engine::new(
        Arc::new(Api::<IPPool>::all(client)),
        registry.clone(),
        lb_manager,
        config.loose_selector,
    ));

    // Start reconcilers
    tracing::info!("Start IPPool reconciler");
    let ip_pool_state = state.clone();
    let ip_pool_metrics = metrics.clone();
    let interval = config.requeue_interval;
    tokio::spawn(async move {
        reconciler::ip_pool::run(ip_pool_state, interval, registry, ip_pool_metrics).await;
    });

    tracing::info!("Start LoadBalancer reconciler");
    let lb_state = state.clone();
    tokio::spawn(async move {
        reconciler::load_balancer::run(lb_state, interval, engine, metrics).await;
    });

    // Start web server
    let server_state = state.clone();
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(server_state.clone()))
            .service(index)
            .service(health)
            .service(ready)
            .service(metrics_)
            .service(ip_pool_validating_webhook)
            .service(ip_pool_mutating_webhook)
            .service(load_balancer_validating_webhook)
            .service(load_balancer_mutating_webhook)
            .wrap(
                middleware::Logger::default()
                    .exclude("/healthz")
                    .exclude("/readyz"),
            )
    })
    .bind_rustls_021(format!("0.0.0.0:{}", config.https_port), tls_config)
    .map_err(Error::StdIo)?
    .bind(format!("0.0.0.0:{}", config.http_port))
    .map_err(Error::StdIo)?
    .shutdown_timeout(5);

    server.run().await.map_err(Error::StdIo)
}

#[get("/healthz")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/readyz")]
async fn ready(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("ready")
}

#[get("/metrics")]
async fn metrics_(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    if let Err(e) = encoder.encode(&metrics, &mut buffer) {
        tracing::error!(error=?e, "failed to encode metrics");
        return HttpResponse::InternalServerError().finish();
    }
    HttpResponse::Ok().body(buffer)
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[post("/validate-loadbalancer-harvesterhci-io-v1beta1-ippool")]
async fn ip_pool_validating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<IPPool>>,
) -> impl Responder {
    webhook::ip_pool::handle_validation(req, body).await
}

#[post("/mutate-loadbalancer-harvesterhci-io-v1beta1-ippool")]
async fn ip_pool_mutating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<IPPool>>,
) -> impl Responder {
    webhook::ip_pool::handle_mutation(req, body).await
}

#[post("/validate-loadbalancer-harvesterhci-io-v1beta1-loadbalancer")]
async fn load_balancer_validating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<LoadBalancer>>,
) -> impl Responder {
    webhook::load_balancer::handle_validation(req, body).await
}

#[post("/mutate-loadbalancer-harvesterhci-io-v1beta1-loadbalancer")]
async fn load_balancer_mutating_webhook(
    req: HttpRequest,
    body: web::Json<AdmissionReview<LoadBalancer>>,
) -> impl Responder {
    webhook::load_balancer::handle_mutation(req, body).await
}
