use crate::Error;
use kube::ResourceExt;
use prometheus::{histogram_opts, opts, HistogramVec, IntCounterVec, Registry};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounterVec,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "integration_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["kind"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "integration_operator_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["kind", "namespace", "instance", "error"],
        )
        .unwrap();
        let reconciliations = IntCounterVec::new(
            opts!(
                "integration_operator_reconciliations_total",
                "reconciliations"
            ),
            &["kind"],
        )
        .unwrap();
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure<T: kube::Resource<DynamicType = ()>>(&self, component: &T, e: &Error) {
        self.failures
            .with_label_values(&[
                T::kind(&()).as_ref(),
                component.namespace().unwrap_or_default().as_ref(),
                component.name_any().as_ref(),
                e.metric_label(),
            ])
            .inc()
    }

    pub fn count_and_measure<T: kube::Resource<DynamicType = ()>>(&self) -> ReconcileMeasurer<T> {
        self.reconciliations
            .with_label_values(&[T::kind(&()).as_ref()])
            .inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            _resource_type: std::marker::PhantomData,
        }
    }
}

/// Observes the duration of a reconciliation in the histogram when dropped
pub struct ReconcileMeasurer<T: kube::Resource<DynamicType = ()>> {
    start: Instant,
    metric: HistogramVec,
    _resource_type: std::marker::PhantomData<T>,
}

impl<T: kube::Resource<DynamicType = ()>> Drop for ReconcileMeasurer<T> {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[T::kind(&()).as_ref()])
            .observe(duration);
    }
}
