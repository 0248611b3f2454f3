use kube::Resource;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec};
use prometheus::{IntGaugeVec, Registry};
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    pub ippool_total: IntGaugeVec,
    pub ippool_available: IntGaugeVec,
    pub loadbalancer_ready: IntGaugeVec,
    pub health_condition_changes: IntCounterVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "vlbd_controller_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &[],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "vlbd_controller_reconciliation_errors_total",
                "Total count of reconciliation errors",
            ),
            &["resource", "instance", "error"],
        )
        .unwrap();
        let reconciliations = IntCounterVec::new(
            opts!(
                "vlbd_controller_reconciliation_total",
                "Total count of reconciliations",
            ),
            &["resource", "instance"],
        )
        .unwrap();
        let ippool_total = IntGaugeVec::new(
            opts!(
                "vlbd_controller_ippool_total",
                "The number of allocatable addresses in IPPool"
            ),
            &["pool"],
        )
        .unwrap();
        let ippool_available = IntGaugeVec::new(
            opts!(
                "vlbd_controller_ippool_available",
                "The number of available addresses in IPPool"
            ),
            &["pool"],
        )
        .unwrap();
        let loadbalancer_ready = IntGaugeVec::new(
            opts!(
                "vlbd_controller_loadbalancer_ready",
                "Whether LoadBalancer is ready"
            ),
            &["namespace", "name"],
        )
        .unwrap();
        let health_condition_changes = IntCounterVec::new(
            opts!(
                "vlbd_controller_health_condition_changes_total",
                "Total count of backend health condition changes"
            ),
            &["healthy"],
        )
        .unwrap();

        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            ippool_total,
            ippool_available,
            loadbalancer_ready,
            health_condition_changes,
        }
    }
}

impl Metrics {
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.ippool_total.clone()))?;
        registry.register(Box::new(self.ippool_available.clone()))?;
        registry.register(Box::new(self.loadbalancer_ready.clone()))?;
        registry.register(Box::new(self.health_condition_changes.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure<T: Resource<DynamicType = ()>>(&self, resource: &T, error: &str) {
        let oref = resource.object_ref(&());
        self.failures
            .with_label_values(&[
                &oref.kind.unwrap_or_default(),
                &oref.name.unwrap_or_default(),
                error,
            ])
            .inc()
    }

    pub fn reconciliation<T: Resource<DynamicType = ()>>(&self, resource: &T) {
        let oref = resource.object_ref(&());
        self.reconciliations
            .with_label_values(&[&oref.kind.unwrap_or_default(), &oref.name.unwrap_or_default()])
            .inc()
    }

    pub fn ippool(&self, pool: &str, total: i64, available: i64) {
        self.ippool_total.with_label_values(&[pool]).set(total);
        self.ippool_available.with_label_values(&[pool]).set(available);
    }

    pub fn ippool_remove(&self, pool: &str) {
        let _ = self.ippool_total.remove_label_values(&[pool]);
        let _ = self.ippool_available.remove_label_values(&[pool]);
    }

    pub fn loadbalancer_ready(&self, namespace: &str, name: &str, ready: bool) {
        self.loadbalancer_ready
            .with_label_values(&[namespace, name])
            .set(ready as i64)
    }

    pub fn loadbalancer_remove(&self, namespace: &str, name: &str) {
        let _ = self.loadbalancer_ready.remove_label_values(&[namespace, name]);
    }

    pub fn health_condition_changed(&self, healthy: bool) {
        self.health_condition_changes
            .with_label_values(&[if healthy { "true" } else { "false" }])
            .inc()
    }

    pub fn count_and_measure(&self) -> ReconcileMeasurer {
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
        }
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer {
    start: Instant,
    metric: HistogramVec,
}

impl Drop for ReconcileMeasurer {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric.with_label_values(&[]).observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn works_metrics_register() {
        let registry = Registry::default();
        let metrics = Metrics::default().register(&registry).unwrap();
        metrics.ippool("default", 253, 250);
        metrics.loadbalancer_ready("default", "lb1", true);
        metrics.health_condition_changed(false);

        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|f| f.get_name().to_string())
            .collect();
        assert!(names.contains(&"vlbd_controller_ippool_total".to_string()));
        assert!(names.contains(&"vlbd_controller_loadbalancer_ready".to_string()));
        assert_eq!(
            250,
            metrics.ippool_available.with_label_values(&["default"]).get()
        );

        metrics.ippool_remove("default");
        assert!(Metrics::default().register(&registry).is_err());
    }
}
