use crate::collectors::Collector;
use crate::collectors::context::Binding;
use crate::collectors::metric_set::boxed;
use crate::collectors::util::{gauge_vec, number_at};
use anyhow::Result;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use mongodb::bson::{Document, doc};
use prometheus::GaugeVec;
use tracing::{debug, instrument, warn};

/// (`dbStats` field, metric name, help)
const FIELDS: &[(&str, &str, &str)] = &[
    ("collections", "mongodb_dbstats_collections", "Number of collections in the database."),
    ("views", "mongodb_dbstats_views", "Number of views in the database."),
    ("objects", "mongodb_dbstats_objects", "Number of documents in the database."),
    ("avgObjSize", "mongodb_dbstats_avg_obj_size_bytes", "Average document size in bytes."),
    ("dataSize", "mongodb_dbstats_data_size_bytes", "Uncompressed size of all documents in bytes."),
    ("storageSize", "mongodb_dbstats_storage_size_bytes", "Space allocated for documents in bytes."),
    ("indexes", "mongodb_dbstats_indexes", "Number of indexes in the database."),
    ("indexSize", "mongodb_dbstats_index_size_bytes", "Space allocated for indexes in bytes."),
];

/// `dbStats` for every database on the server.
#[derive(Clone)]
pub struct DbStatsCollector {
    binding: Binding,
    fields: Vec<GaugeVec>,
}

impl DbStatsCollector {
    pub const ENABLED_BY_DEFAULT: bool = false;

    /// # Errors
    ///
    /// Returns an error if a base label collides with the `database` label.
    pub fn new(binding: Binding) -> Result<Self> {
        let fields = FIELDS
            .iter()
            .map(|(_, name, help)| gauge_vec(name, help, &["database"], binding.labels()))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { binding, fields })
    }

    fn observe(&self, database: &str, stats: &Document) {
        for ((field, _, _), metric) in FIELDS.iter().zip(&self.fields) {
            if let Some(value) = number_at(stats, field) {
                metric.with_label_values(&[database]).set(value);
            }
        }
    }
}

impl Collector for DbStatsCollector {
    fn name(&self) -> &'static str {
        "dbstats"
    }

    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        self.fields.iter().map(boxed).collect()
    }

    #[instrument(skip(self), level = "info", err, fields(collector = "dbstats", otel.kind = "internal"))]
    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let conn = self.binding.connection();
            let ctx = self.binding.context();

            let databases = ctx
                .run("listDatabases", conn.client().list_database_names())
                .await?;

            let mut tasks = FuturesUnordered::new();
            for database in &databases {
                tasks.push(async move {
                    let stats = conn
                        .command(ctx, database, "dbStats", doc! { "dbStats": 1, "scale": 1 })
                        .await;
                    (database, stats)
                });
            }

            while let Some((database, stats)) = tasks.next().await {
                match stats {
                    Ok(stats) => self.observe(database, &stats),
                    Err(e) => warn!(database = %database, error = %e, "dbStats failed"),
                }
            }

            debug!(databases = databases.len(), "collected dbStats");
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
    async fn test_observe_sets_per_database() -> Result<()> {
        let conn = Connection::lazy(&ConnectOptions::new("mongodb://127.0.0.1:1")).await?;
        let collector = DbStatsCollector::new(Binding::new(
            conn,
            ScrapeContext::new(Duration::from_millis(100)),
            HashMap::new(),
        ))?;

        collector.observe("app", &doc! { "collections": 3, "dataSize": 2048.0, "ok": 1.0 });

        assert!((collector.fields[0].with_label_values(&["app"]).get() - 3.0).abs() < f64::EPSILON);
        assert!((collector.fields[4].with_label_values(&["app"]).get() - 2048.0).abs() < f64::EPSILON);
        Ok(())
    }
}
