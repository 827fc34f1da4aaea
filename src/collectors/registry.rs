//! Per-scrape registry: which collectors run against this server, and the
//! `prometheus::Registry` their metrics are exposed through.

use crate::collectors::context::{Binding, ScrapeContext};
use crate::collectors::exporter::ScraperCollector;
use crate::collectors::metric_set::MetricSet;
use crate::collectors::{
    CollStatsCollector, Collector, CollectorType, DbStatsCollector, DiagnosticDataCollector,
    ExporterCollector, GeneralCollector, IndexStatsCollector, ReplicaSetStatusCollector,
    ShardingCollector, TopCollector, config::CollectorConfig,
};
use crate::exporter::connection::{Connection, is_unsupported};
use crate::exporter::labels::LabelsGetter;
use crate::exporter::topology::{Role, Topology};
use anyhow::{Context, Result, anyhow};
use futures::stream::{FuturesUnordered, StreamExt};
use prometheus::{Registry, TextEncoder};
use std::sync::Arc;
use tracing::{debug, error, info_span, instrument, warn};
use tracing_futures::Instrument as _;

/// Collectors that apply to `topology` under `config`, in registration order.
///
/// `general` is not listed: it is part of every registry. Pure; the same
/// inputs always give the same answer.
#[must_use]
pub fn select(topology: &Topology, config: &CollectorConfig) -> Vec<&'static str> {
    let role = topology.role;
    if !role.is_known() {
        return Vec::new();
    }

    let candidates: [(&'static str, bool); 7] = [
        ("diagnostic_data", true),
        (
            "replset_status",
            config.enable_replicaset_status()
                && role != Role::ShardRouter
                && topology.supports_replication_status,
        ),
        (
            "sharding",
            matches!(role, Role::ShardRouter | Role::ConfigServer),
        ),
        ("dbstats", true),
        ("top", role != Role::ShardRouter),
        (
            "index_stats",
            config.has_targets(&config.index_stats_collections),
        ),
        (
            "coll_stats",
            config.has_targets(&config.coll_stats_collections),
        ),
    ];

    candidates
        .into_iter()
        .filter(|(name, applies)| *applies && config.is_enabled(name))
        .map(|(name, _)| name)
        .collect()
}

pub struct CollectorRegistry {
    registry: Registry,
    collectors: Vec<CollectorType>,
    scraper: Option<Arc<ScraperCollector>>,
}

impl Default for CollectorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CollectorRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            registry: Registry::new(),
            collectors: Vec::new(),
            scraper: None,
        }
    }

    /// Build the registry for one scrape.
    ///
    /// Without a connection only `general` is registered and it reports the
    /// server as down.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be constructed or its
    /// descriptors collide with one already registered.
    #[instrument(skip_all, level = "debug", err, fields(role = %topology.role, connected = connection.is_some()))]
    pub fn build(
        connection: Option<&Connection>,
        topology: &Topology,
        labels: &dyn LabelsGetter,
        config: &CollectorConfig,
        ctx: &ScrapeContext,
    ) -> Result<Self> {
        let base = labels.base_labels();
        let mut registry = Self::new();

        registry.register(CollectorType::GeneralCollector(GeneralCollector::new(
            connection.cloned(),
            ctx.clone(),
            &base,
        )?))?;

        let Some(conn) = connection else {
            return Ok(registry);
        };
        let binding = Binding::new(conn.clone(), ctx.clone(), base);

        for name in select(topology, config) {
            let collector = match name {
                "diagnostic_data" => CollectorType::DiagnosticDataCollector(
                    DiagnosticDataCollector::new(binding.clone(), config.compatible_mode)?,
                ),
                "replset_status" => CollectorType::ReplicaSetStatusCollector(
                    ReplicaSetStatusCollector::new(binding.clone(), config.compatible_mode)?,
                ),
                "sharding" => {
                    CollectorType::ShardingCollector(ShardingCollector::new(binding.clone())?)
                }
                "dbstats" => {
                    CollectorType::DbStatsCollector(DbStatsCollector::new(binding.clone())?)
                }
                "top" => CollectorType::TopCollector(TopCollector::new(binding.clone())?),
                "index_stats" => CollectorType::IndexStatsCollector(IndexStatsCollector::new(
                    binding.clone(),
                    config.index_stats_collections.clone(),
                    config.discovering_mode,
                )?),
                "coll_stats" => CollectorType::CollStatsCollector(CollStatsCollector::new(
                    binding.clone(),
                    config.coll_stats_collections.clone(),
                    config.discovering_mode,
                )?),
                other => return Err(anyhow!("no constructor for collector {other}")),
            };
            registry.register(collector)?;
        }

        debug!(collectors = ?registry.names(), "built collector registry");
        Ok(registry)
    }

    /// Add the process-wide self-monitoring collector.
    ///
    /// # Errors
    ///
    /// Returns an error if its descriptors collide with one already registered.
    pub fn with_exporter_metrics(mut self, exporter: &ExporterCollector) -> Result<Self> {
        self.register(CollectorType::ExporterCollector(exporter.clone()))?;
        Ok(self)
    }

    /// Register a collector.
    ///
    /// # Errors
    ///
    /// Returns an error if a descriptor of `collector` is already registered.
    pub fn register(&mut self, collector: CollectorType) -> Result<()> {
        let name = collector.name();

        if let Err(e) = collector.register_metrics(&self.registry) {
            error!(collector = name, error = %e, "metric descriptor collision");
            return Err(e.context(format!("cannot register collector {name}")));
        }

        if self.scraper.is_none() {
            self.scraper = collector.get_scraper();
        }
        self.collectors.push(collector);
        Ok(())
    }

    /// Remove the collector whose descriptor set matches `collector`.
    /// Returns whether it was registered.
    pub fn unregister<C: Collector>(&mut self, collector: &C) -> bool {
        if self
            .registry
            .unregister(Box::new(MetricSet::new(collector.metrics())))
            .is_err()
        {
            return false;
        }

        let name = collector.name();
        if let Some(pos) = self.collectors.iter().position(|c| c.name() == name) {
            self.collectors.remove(pos);
        }
        true
    }

    /// Whether a collector with this name is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.collectors.iter().any(|c| c.name() == name)
    }

    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.collectors.iter().map(Collector::name).collect()
    }

    #[must_use]
    pub fn collectors(&self) -> &[CollectorType] {
        &self.collectors
    }

    /// Run every collector concurrently, then render the registry in the
    /// Prometheus text format.
    ///
    /// Collector failures are logged and counted, never returned: a partial
    /// scrape is still a scrape.
    ///
    /// # Errors
    ///
    /// Returns an error only if the gathered metrics cannot be encoded.
    pub async fn collect_all(&self) -> Result<String> {
        let mut tasks = FuturesUnordered::new();

        for collector in &self.collectors {
            let name = collector.name();
            let span = info_span!("collector.collect", collector = name, otel.kind = "internal");
            let timer = self.scraper.as_ref().map(|s| s.start_scrape(name));

            tasks.push(
                async move {
                    let res = collector.collect().await;
                    (name, timer, res)
                }
                .instrument(span),
            );
        }

        while let Some((name, timer, res)) = tasks.next().await {
            match res {
                Ok(()) => {
                    if let Some(timer) = timer {
                        timer.success();
                    }
                }
                Err(e) if is_unsupported(&e) => {
                    debug!(collector = name, error = %e, "not supported on this server");
                    if let Some(timer) = timer {
                        timer.success();
                    }
                }
                Err(e) => {
                    warn!(collector = name, error = %e, "collector failed");
                    if let Some(timer) = timer {
                        timer.error();
                    }
                }
            }
        }

        if let Some(scraper) = &self.scraper {
            scraper.increment_scrapes();
        }
        let families = self.registry.gather();
        if let Some(scraper) = &self.scraper {
            // Reported by the next scrape.
            scraper.update_metrics_count(families.iter().map(|f| f.get_metric().len()).sum());
        }

        TextEncoder::new()
            .encode_to_string(&families)
            .context("cannot encode metrics")
    }
}
