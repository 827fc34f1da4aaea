use crate::collectors::Collector;
use crate::collectors::context::Binding;
use crate::collectors::metric_set::boxed;
use crate::collectors::util::{Namespace, gauge_vec, number_at, resolve_namespaces};
use anyhow::Result;
use futures::future::BoxFuture;
use mongodb::bson::{Document, doc};
use prometheus::GaugeVec;
use tracing::{debug, instrument, warn};

/// `$indexStats` access counters for the configured collections.
#[derive(Clone)]
pub struct IndexStatsCollector {
    binding: Binding,
    collections: Vec<String>,
    discovering: bool,
    accesses: GaugeVec,
}

impl IndexStatsCollector {
    pub const ENABLED_BY_DEFAULT: bool = false;

    /// # Errors
    ///
    /// Returns an error if a base label collides with an index label.
    pub fn new(binding: Binding, collections: Vec<String>, discovering: bool) -> Result<Self> {
        Ok(Self {
            accesses: gauge_vec(
                "mongodb_indexstats_accesses_ops",
                "Number of operations that used the index since the server started or the index was created.",
                &["database", "collection", "key_name"],
                binding.labels(),
            )?,
            binding,
            collections,
            discovering,
        })
    }

    fn observe(&self, ns: &Namespace, indexes: &[Document]) {
        for index in indexes {
            let (Ok(name), Some(ops)) = (index.get_str("name"), number_at(index, "accesses.ops")) else {
                continue;
            };
            self.accesses
                .with_label_values(&[ns.database.as_str(), ns.collection.as_str(), name])
                .set(ops);
        }
    }
}

impl Collector for IndexStatsCollector {
    fn name(&self) -> &'static str {
        "index_stats"
    }

    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        vec![boxed(&self.accesses)]
    }

    #[instrument(skip(self), level = "info", err, fields(collector = "index_stats", otel.kind = "internal"))]
    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let conn = self.binding.connection();
            let ctx = self.binding.context();
            let namespaces = resolve_namespaces(conn, ctx, &self.collections, self.discovering).await?;

            for ns in &namespaces {
                match conn
                    .aggregate(ctx, &ns.database, &ns.collection, vec![doc! { "$indexStats": {} }])
                    .await
                {
                    Ok(indexes) => self.observe(ns, &indexes),
                    Err(e) => warn!(namespace = %ns, error = %e, "$indexStats failed"),
                }
            }

            debug!(namespaces = namespaces.len(), "collected index stats");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::context::ScrapeContext;
    use crate::exporter::connection::Connection;
    use crate::exporter::options::ConnectOptions;
    use std::collections::HashMap;
    use std::time::Duration;

    #[tokio::test]
    async fn test_observe_indexes() -> Result<()> {
        let conn = Connection::lazy(&ConnectOptions::new("mongodb://127.0.0.1:1")).await?;
        let collector = IndexStatsCollector::new(
            Binding::new(conn, ScrapeContext::new(Duration::from_millis(100)), HashMap::new()),
            vec!["app.orders".to_string()],
            false,
        )?;

        let ns = Namespace::parse("app.orders").ok_or_else(|| anyhow::anyhow!("namespace"))?;
        collector.observe(
            &ns,
            &[
                doc! { "name": "_id_", "accesses": { "ops": 42_i64 } },
                doc! { "name": "broken" },
            ],
        );

        let ops = collector
            .accesses
            .with_label_values(&["app", "orders", "_id_"])
            .get();
        assert!((ops - 42.0).abs() < f64::EPSILON);
        Ok(())
    }
}
