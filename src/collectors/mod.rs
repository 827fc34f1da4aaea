use crate::collectors::metric_set::MetricSet;
use anyhow::Result;
use futures::future::BoxFuture;
use prometheus::Registry;
use prometheus::core::Desc;

#[macro_use]
mod register_macro;

pub trait Collector {
    fn name(&self) -> &'static str;

    /// Handles to every metric this collector can emit. Clones share state with
    /// the collector, so registering them exposes what `collect` sets.
    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>>;

    /// Stable descriptor set; two collectors with the same set are the same
    /// collector as far as a registry is concerned.
    fn descriptors(&self) -> Vec<Desc> {
        self.metrics()
            .iter()
            .flat_map(|m| m.desc().into_iter().cloned().collect::<Vec<_>>())
            .collect()
    }

    /// Register metrics with the prometheus registry.
    ///
    /// # Errors
    ///
    /// Returns an error if any descriptor is already registered.
    fn register_metrics(&self, registry: &Registry) -> Result<()> {
        registry.register(Box::new(MetricSet::new(self.metrics())))?;
        Ok(())
    }

    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>>;
}

pub mod context;
pub mod metric_set;
pub mod util;

register_collectors! {
    general => GeneralCollector,
    diagnostic_data => DiagnosticDataCollector,
    replset_status => ReplicaSetStatusCollector,
    sharding => ShardingCollector,
    dbstats => DbStatsCollector,
    top => TopCollector,
    index_stats => IndexStatsCollector,
    coll_stats => CollStatsCollector,
    exporter => ExporterCollector,
}

/// Collectors that are part of every registry and have no on/off flag.
pub const ALWAYS_ON: &[&str] = &["general"];

pub mod config;
pub mod registry;
