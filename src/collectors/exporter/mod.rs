mod process;
mod scraper;

pub use process::ProcessCollector;
pub use scraper::{ScrapeTimer, ScraperCollector};

use crate::collectors::Collector;
use anyhow::Result;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use tracing::{info_span, instrument};
use tracing_futures::Instrument as _;

/// Exporter self-monitoring.
///
/// Built once per process; every scrape registers clones of the same metric
/// handles into its fresh registry so counters survive across scrapes.
#[derive(Clone)]
pub struct ExporterCollector {
    subs: Vec<Arc<dyn Collector + Send + Sync>>,
    scraper: Arc<ScraperCollector>,
}

impl ExporterCollector {
    pub const ENABLED_BY_DEFAULT: bool = false;

    #[must_use]
    pub fn new() -> Self {
        let scraper = Arc::new(ScraperCollector::new());
        Self {
            subs: vec![
                Arc::new(ProcessCollector::new()),
                Arc::clone(&scraper) as Arc<dyn Collector + Send + Sync>,
            ],
            scraper,
        }
    }

    #[must_use]
    pub const fn get_scraper(&self) -> &Arc<ScraperCollector> {
        &self.scraper
    }
}

impl Default for ExporterCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl Collector for ExporterCollector {
    fn name(&self) -> &'static str {
        "exporter"
    }

    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        self.subs.iter().flat_map(|sub| sub.metrics()).collect()
    }

    #[instrument(skip(self), level = "info", err, fields(collector = "exporter", otel.kind = "internal"))]
    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut tasks = FuturesUnordered::new();

            for sub in &self.subs {
                let span = info_span!("collector.collect", sub_collector = %sub.name(), otel.kind = "internal");
                tasks.push(sub.collect().instrument(span));
            }

            while let Some(res) = tasks.next().await {
                res?;
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::Registry;

    #[test]
    fn test_exporter_collector_new() {
        let collector = ExporterCollector::new();
        assert_eq!(collector.subs.len(), 2);
        assert_eq!(collector.name(), "exporter");
    }

    #[test]
    fn test_exporter_metrics_can_join_successive_registries() -> Result<()> {
        let collector = ExporterCollector::new();

        for _ in 0..2 {
            let registry = Registry::new();
            collector.register_metrics(&registry)?;
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_exporter_collect() -> Result<()> {
        let collector = ExporterCollector::new();
        let registry = Registry::new();
        collector.register_metrics(&registry)?;
        collector.collect().await?;

        assert!(
            registry
                .gather()
                .iter()
                .any(|m| m.name() == "mongodb_exporter_process_resident_memory_bytes")
        );
        Ok(())
    }
}
