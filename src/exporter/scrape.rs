//! Scrape orchestrator: acquire a connection, build the registry for the
//! server behind it, collect, render, release.

use crate::collectors::ExporterCollector;
use crate::collectors::config::CollectorConfig;
use crate::collectors::context::ScrapeContext;
use crate::collectors::registry::CollectorRegistry;
use crate::exporter::labels::StaticLabels;
use crate::exporter::options::{ExporterOptions, Pooling};
use crate::exporter::pool::{ConnectionPool, Session};
use crate::exporter::topology::Topology;
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

pub struct ScrapeOrchestrator {
    pool: Arc<ConnectionPool>,
    collectors: CollectorConfig,
    /// Process-wide self-monitoring, present when the `exporter` collector is enabled.
    exporter: Option<ExporterCollector>,
    socket_timeout: Duration,
}

impl ScrapeOrchestrator {
    #[must_use]
    pub fn new(pool: Arc<ConnectionPool>, options: &ExporterOptions) -> Self {
        let exporter = options
            .collectors
            .is_enabled("exporter")
            .then(ExporterCollector::new);

        Self {
            pool,
            collectors: options.collectors.clone(),
            exporter,
            socket_timeout: options.connect.socket_timeout,
        }
    }

    #[must_use]
    pub fn pooling(&self) -> Pooling {
        self.pool.pooling()
    }

    #[must_use]
    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Serve one scrape and return the text exposition.
    ///
    /// A connection that cannot be acquired is not an error: the scrape goes
    /// ahead without one and reports `mongodb_up 0`. The lease is released on
    /// every path that returns; a dropped scrape drops the lease with it.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be built or rendered.
    #[instrument(skip(self), level = "info", err, fields(pooling = %self.pool.pooling(), otel.kind = "internal"))]
    pub async fn scrape(&self) -> Result<String> {
        let ctx = ScrapeContext::new(self.socket_timeout);

        let lease = match self.pool.acquire(&ctx).await {
            Ok(lease) => Some(lease),
            Err(e) => {
                warn!(error = %e, "cannot acquire MongoDB connection; reporting it as down");
                None
            }
        };

        let rendered = self
            .render(lease.as_ref().map(|l| l.session()), &ctx)
            .await;

        if let Some(lease) = lease {
            lease.release().await;
        }

        rendered
    }

    async fn render(&self, session: Option<&Session>, ctx: &ScrapeContext) -> Result<String> {
        let registry = match session {
            Some(session) => {
                let labels = session.labels();
                CollectorRegistry::build(
                    Some(session.connection()),
                    session.topology(),
                    labels.as_ref(),
                    &self.collectors,
                    ctx,
                )?
            }
            None => CollectorRegistry::build(
                None,
                &Topology::unknown(),
                &StaticLabels::default(),
                &self.collectors,
                ctx,
            )?,
        };

        let registry = match &self.exporter {
            Some(exporter) => registry.with_exporter_metrics(exporter)?,
            None => registry,
        };

        registry.collect_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exporter::options::ConnectOptions;

    fn options() -> ExporterOptions {
        ExporterOptions::new(
            ConnectOptions::new("mongodb://127.0.0.1:1/admin")
                .with_connect_timeout(Duration::from_millis(200))
                .with_socket_timeout(Duration::from_millis(500)),
        )
        .with_collectors(CollectorConfig::new().with_collect_all(true))
    }

    #[tokio::test]
    async fn test_unreachable_server_scrapes_as_down() -> Result<()> {
        let options = options();
        let pool = Arc::new(
            ConnectionPool::start(options.connect.clone(), Pooling::PerRequest, options.liveness_interval).await,
        );
        let orchestrator = ScrapeOrchestrator::new(Arc::clone(&pool), &options);

        let body = orchestrator.scrape().await?;

        assert!(body.contains("mongodb_up 0"));
        assert!(body.contains("mongodb_exporter_scrapes_total 1"));
        assert_eq!(pool.open_leases(), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_exporter_metrics_follow_config() -> Result<()> {
        let options = options().with_collectors(CollectorConfig::new());
        let pool = Arc::new(
            ConnectionPool::start(options.connect.clone(), Pooling::PerRequest, options.liveness_interval).await,
        );
        let orchestrator = ScrapeOrchestrator::new(pool, &options);

        let body = orchestrator.scrape().await?;
        assert!(body.contains("mongodb_up 0"));
        assert!(!body.contains("mongodb_exporter_"));
        Ok(())
    }
}
