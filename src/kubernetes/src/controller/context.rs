use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chrono::{DateTime, Utc};
pub use kube::{runtime::controller::Action, Client, Resource};
use kube::ResourceExt;
use serde::Serialize;
use tokio::sync::RwLock;

use vlbd_trace::error::TraceableError;

use super::metrics::Metrics;

/// Requeue delay after a reconciliation returned an error.
pub const ERROR_REQUEUE_SECONDS: u64 = 10;

pub trait Ctx {
    fn metrics(&self) -> Arc<Mutex<Metrics>>;
    fn client(&self) -> &Client;
}

#[derive(Clone)]
pub struct Context {
    pub client: Client,
    // resync interval of a ready object in seconds
    pub interval: u64,
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub metrics: Arc<Mutex<Metrics>>,
}

impl Ctx for Context {
    fn client(&self) -> &Client {
        &self.client
    }

    fn metrics(&self) -> Arc<Mutex<Metrics>> {
        self.metrics.clone()
    }
}

/// Reconciler context carrying the shared part of a reconciler,
/// such as the allocator registry or the engine.
pub struct ContextWith<T: Clone> {
    pub(crate) inner: Context,
    pub component: T,
}

impl<T: Clone> ContextWith<T> {
    pub fn interval(&self) -> u64 {
        self.inner.interval
    }

    /// Records `resource` as the last reconciled object.
    pub async fn touch<R: Resource<DynamicType = ()>>(&self, resource: &R) {
        let mut diagnostics = self.inner.diagnostics.write().await;
        diagnostics.last_event = Utc::now();
        diagnostics.last_object = format!(
            "{}/{}",
            R::kind(&()),
            crate::util::get_namespaced_name(resource)
        );
    }
}

impl<T: Clone> Ctx for ContextWith<T> {
    fn client(&self) -> &Client {
        &self.inner.client
    }

    fn metrics(&self) -> Arc<Mutex<Metrics>> {
        self.inner.metrics.clone()
    }
}

/// Shared between the reconcilers and the web server.
#[derive(Debug, Clone, Default)]
pub struct State {
    pub diagnostics: Arc<RwLock<Diagnostics>>,
    pub registry: prometheus::Registry,
}

impl State {
    pub fn new(component: &str) -> State {
        State {
            diagnostics: Arc::new(RwLock::new(Diagnostics::new(component))),
            registry: prometheus::Registry::default(),
        }
    }

    pub fn metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    pub async fn diagnostics(&self) -> Diagnostics {
        self.diagnostics.read().await.clone()
    }

    pub fn to_context_with<T: Clone>(
        &self,
        client: Client,
        interval: u64,
        component: T,
        metrics: Arc<Mutex<Metrics>>,
    ) -> Arc<ContextWith<T>> {
        Arc::new(ContextWith {
            inner: Context {
                client,
                interval,
                diagnostics: self.diagnostics.clone(),
                metrics,
            },
            component,
        })
    }
}

/// Served on `/`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnostics {
    pub component: String,
    pub started_at: DateTime<Utc>,
    pub last_event: DateTime<Utc>,
    pub last_object: String,
}

impl Diagnostics {
    pub fn new(component: &str) -> Self {
        let now = Utc::now();
        Self {
            component: component.to_string(),
            started_at: now,
            last_event: now,
            last_object: String::new(),
        }
    }
}

impl Default for Diagnostics {
    fn default() -> Self {
        Diagnostics::new("vlbd")
    }
}

#[tracing::instrument(skip_all)]
pub fn error_policy<T: Resource<DynamicType = ()>, E: TraceableError, C: Ctx>(
    resource: Arc<T>,
    error: &E,
    ctx: Arc<C>,
) -> Action {
    tracing::warn!(
        kind = %T::kind(&()),
        name = resource.name_any(),
        namespace = ?resource.namespace(),
        error = %error.metric_label(),
        "reconcile failed"
    );
    let metrics = ctx.metrics();
    if let Ok(m) = metrics.lock() {
        m.reconcile_failure(resource.as_ref(), &error.metric_label());
    }
    Action::requeue(Duration::from_secs(ERROR_REQUEUE_SECONDS))
}
