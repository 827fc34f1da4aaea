//! Reachability and server version. Always part of the registry, with or without
//! a connection, so a failed connect is still reported as `mongodb_up 0`.

use crate::collectors::Collector;
use crate::collectors::context::ScrapeContext;
use crate::collectors::metric_set::boxed;
use crate::collectors::util::{self, gauge, gauge_vec};
use crate::exporter::connection::Connection;
use anyhow::Result;
use futures::future::BoxFuture;
use mongodb::bson::doc;
use prometheus::{Gauge, GaugeVec};
use std::collections::HashMap;
use tracing::{debug, instrument, warn};

#[derive(Clone)]
pub struct GeneralCollector {
    connection: Option<Connection>,
    context: ScrapeContext,
    up: Gauge,
    version_info: GaugeVec,
    /// No variable labels; the single child exists only once `buildInfo` answered.
    version_num: GaugeVec,
}

impl GeneralCollector {
    pub const ENABLED_BY_DEFAULT: bool = true;

    /// # Errors
    ///
    /// Returns an error if a base label is not a valid label name.
    pub fn new(
        connection: Option<Connection>,
        context: ScrapeContext,
        labels: &HashMap<String, String>,
    ) -> Result<Self> {
        Ok(Self {
            connection,
            context,
            up: gauge("mongodb_up", "Whether MongoDB is up.", labels)?,
            version_info: gauge_vec(
                "mongodb_version_info",
                "MongoDB server version information.",
                &["version", "edition", "git_version"],
                labels,
            )?,
            version_num: gauge_vec(
                "mongodb_version_num",
                "MongoDB server version as a number (major*10000 + minor*100 + patch).",
                &[],
                labels,
            )?,
        })
    }

    async fn collect_build_info(&self, conn: &Connection) -> Result<()> {
        let info = conn
            .admin_command(&self.context, "buildInfo", doc! { "buildInfo": 1 })
            .await?;

        let raw = info.get_str("version").unwrap_or_default();
        let (version, num) = util::normalize_version(raw);
        let edition = if info
            .get_array("modules")
            .is_ok_and(|m| m.iter().any(|v| v.as_str() == Some("enterprise")))
        {
            "enterprise"
        } else {
            "community"
        };
        let git_version = info.get_str("gitVersion").unwrap_or_default();

        self.version_info
            .with_label_values(&[version.as_str(), edition, git_version])
            .set(1.0);
        #[allow(clippy::cast_precision_loss)]
        let num = num as f64;
        self.version_num.with_label_values::<&str>(&[]).set(num);

        debug!(%version, edition, "collected build info");
        Ok(())
    }
}

impl Collector for GeneralCollector {
    fn name(&self) -> &'static str {
        "general"
    }

    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        vec![
            boxed(&self.up),
            boxed(&self.version_info),
            boxed(&self.version_num),
        ]
    }

    #[instrument(skip(self), level = "info", err, fields(collector = "general", otel.kind = "internal"))]
    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(conn) = &self.connection else {
                self.up.set(0.0);
                return Ok(());
            };

            if let Err(e) = conn.ping(&self.context).await {
                warn!(target = %conn.target(), error = %e, "MongoDB is not answering");
                self.up.set(0.0);
                return Ok(());
            }
            self.up.set(1.0);

            // Version is informational; a refused buildInfo does not make the server down.
            if let Err(e) = self.collect_build_info(conn).await {
                debug!(error = %e, "cannot read buildInfo");
            }

            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Registry, TextEncoder};
    use std::time::Duration;

    #[tokio::test]
    async fn test_without_connection_reports_down() -> Result<()> {
        let collector = GeneralCollector::new(
            None,
            ScrapeContext::new(Duration::from_secs(1)),
            &HashMap::new(),
        )?;
        let registry = Registry::new();
        collector.register_metrics(&registry)?;
        collector.collect().await?;

        let body = TextEncoder::new().encode_to_string(&registry.gather())?;
        assert!(body.contains("# HELP mongodb_up Whether MongoDB is up."));
        assert!(body.contains("# TYPE mongodb_up gauge"));
        assert!(body.contains("mongodb_up 0"));
        assert!(!body.contains("mongodb_version_info"));
        assert!(!body.contains("mongodb_version_num"));
        Ok(())
    }

    #[test]
    fn test_base_labels_are_const_labels() -> Result<()> {
        let mut labels = HashMap::new();
        labels.insert("cl_role".to_string(), "mongos".to_string());
        let collector =
            GeneralCollector::new(None, ScrapeContext::new(Duration::from_secs(1)), &labels)?;

        let descs = collector.descriptors();
        assert_eq!(descs.len(), 3);
        assert!(
            descs
                .iter()
                .all(|d| d.const_label_pairs.iter().any(|l| l.value() == "mongos"))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_version_num_rendered_once_set() -> Result<()> {
        let collector = GeneralCollector::new(
            None,
            ScrapeContext::new(Duration::from_secs(1)),
            &HashMap::new(),
        )?;
        let registry = Registry::new();
        collector.register_metrics(&registry)?;

        collector.version_num.with_label_values::<&str>(&[]).set(70_002.0);

        let body = TextEncoder::new().encode_to_string(&registry.gather())?;
        assert!(body.contains("mongodb_version_num 70002"));
        Ok(())
    }
}
