use prometheus::core::{Collector, Desc};
use prometheus::proto::MetricFamily;

/// A collector's metrics registered as one unit, so that a registry can add
/// or remove the whole collector by its combined descriptor set.
pub struct MetricSet {
    metrics: Vec<Box<dyn Collector>>,
}

impl MetricSet {
    #[must_use]
    pub fn new(metrics: Vec<Box<dyn Collector>>) -> Self {
        Self { metrics }
    }
}

impl Collector for MetricSet {
    fn desc(&self) -> Vec<&Desc> {
        self.metrics.iter().flat_map(|m| m.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        self.metrics.iter().flat_map(|m| m.collect()).collect()
    }
}

/// Box a metric handle for [`crate::collectors::Collector::metrics`].
pub fn boxed<C>(metric: &C) -> Box<dyn Collector>
where
    C: Collector + Clone + 'static,
{
    Box::new(metric.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Gauge, IntGaugeVec, Opts, Registry};

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_metric_set_registers_and_unregisters_as_one() {
        let up = Gauge::new("test_up", "up").unwrap();
        let members = IntGaugeVec::new(Opts::new("test_members", "members"), &["name"]).unwrap();
        let registry = Registry::new();

        registry
            .register(Box::new(MetricSet::new(vec![boxed(&up), boxed(&members)])))
            .unwrap();

        // Same descriptors registered again collide.
        assert!(
            registry
                .register(Box::new(MetricSet::new(vec![boxed(&up), boxed(&members)])))
                .is_err()
        );

        // A subset is not the same collector.
        assert!(registry.unregister(Box::new(MetricSet::new(vec![boxed(&up)]))).is_err());

        assert!(
            registry
                .unregister(Box::new(MetricSet::new(vec![boxed(&up), boxed(&members)])))
                .is_ok()
        );
        assert!(
            registry
                .unregister(Box::new(MetricSet::new(vec![boxed(&up), boxed(&members)])))
                .is_err()
        );
    }

    #[test]
    #[allow(clippy::unwrap_used)]
    fn test_metric_set_collects_all_members() {
        let up = Gauge::new("test_up", "up").unwrap();
        up.set(1.0);
        let other = Gauge::new("test_other", "other").unwrap();
        let set = MetricSet::new(vec![boxed(&up), boxed(&other)]);

        assert_eq!(set.desc().len(), 2);
        assert_eq!(set.collect().len(), 2);
    }
}
