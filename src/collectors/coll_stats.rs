use crate::collectors::Collector;
use crate::collectors::context::Binding;
use crate::collectors::metric_set::boxed;
use crate::collectors::util::{Namespace, gauge_vec, number_at, resolve_namespaces};
use anyhow::Result;
use futures::future::BoxFuture;
use mongodb::bson::{Document, doc};
use prometheus::GaugeVec;
use tracing::{debug, instrument, warn};

/// Storage figures for one collection, summed over shards when the
/// collection is sharded (`$collStats` returns one document per shard).
#[derive(Debug, Default, PartialEq)]
struct StorageStats {
    size: f64,
    count: f64,
    storage_size: f64,
    total_index_size: f64,
    nindexes: f64,
}

impl StorageStats {
    fn merge(replies: &[Document]) -> Self {
        replies
            .iter()
            .fold(Self::default(), |mut acc, reply| {
                let field = |name: &str| number_at(reply, &format!("storageStats.{name}")).unwrap_or(0.0);
                acc.size += field("size");
                acc.count += field("count");
                acc.storage_size += field("storageSize");
                acc.total_index_size += field("totalIndexSize");
                acc.nindexes = acc.nindexes.max(field("nindexes"));
                acc
            })
    }

    fn avg_obj_size(&self) -> f64 {
        if self.count > 0.0 {
            self.size / self.count
        } else {
            0.0
        }
    }
}

/// `$collStats` storage statistics for the configured collections.
#[derive(Clone)]
pub struct CollStatsCollector {
    binding: Binding,
    collections: Vec<String>,
    discovering: bool,
    size: GaugeVec,
    count: GaugeVec,
    avg_obj_size: GaugeVec,
    storage_size: GaugeVec,
    total_index_size: GaugeVec,
    nindexes: GaugeVec,
}

impl CollStatsCollector {
    pub const ENABLED_BY_DEFAULT: bool = false;

    /// # Errors
    ///
    /// Returns an error if a base label collides with a namespace label.
    pub fn new(binding: Binding, collections: Vec<String>, discovering: bool) -> Result<Self> {
        let labels = binding.labels();
        let ns = &["database", "collection"];

        Ok(Self {
            size: gauge_vec("mongodb_collstats_size_bytes", "Uncompressed size of the documents in the collection.", ns, labels)?,
            count: gauge_vec("mongodb_collstats_count", "Number of documents in the collection.", ns, labels)?,
            avg_obj_size: gauge_vec("mongodb_collstats_avg_obj_size_bytes", "Average document size in the collection.", ns, labels)?,
            storage_size: gauge_vec("mongodb_collstats_storage_size_bytes", "Storage allocated to the collection.", ns, labels)?,
            total_index_size: gauge_vec("mongodb_collstats_total_index_size_bytes", "Storage allocated to all indexes of the collection.", ns, labels)?,
            nindexes: gauge_vec("mongodb_collstats_indexes", "Number of indexes on the collection.", ns, labels)?,
            binding,
            collections,
            discovering,
        })
    }

    fn observe(&self, ns: &Namespace, stats: &StorageStats) {
        let labels = [ns.database.as_str(), ns.collection.as_str()];
        self.size.with_label_values(&labels).set(stats.size);
        self.count.with_label_values(&labels).set(stats.count);
        self.avg_obj_size
            .with_label_values(&labels)
            .set(stats.avg_obj_size());
        self.storage_size
            .with_label_values(&labels)
            .set(stats.storage_size);
        self.total_index_size
            .with_label_values(&labels)
            .set(stats.total_index_size);
        self.nindexes.with_label_values(&labels).set(stats.nindexes);
    }
}

impl Collector for CollStatsCollector {
    fn name(&self) -> &'static str {
        "coll_stats"
    }

    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        vec![
            boxed(&self.size),
            boxed(&self.count),
            boxed(&self.avg_obj_size),
            boxed(&self.storage_size),
            boxed(&self.total_index_size),
            boxed(&self.nindexes),
        ]
    }

    #[instrument(skip(self), level = "info", err, fields(collector = "coll_stats", otel.kind = "internal"))]
    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let conn = self.binding.connection();
            let ctx = self.binding.context();
            let namespaces = resolve_namespaces(conn, ctx, &self.collections, self.discovering).await?;

            for ns in &namespaces {
                let pipeline = vec![doc! { "$collStats": { "storageStats": {} } }];
                match conn.aggregate(ctx, &ns.database, &ns.collection, pipeline).await {
                    Ok(replies) if !replies.is_empty() => {
                        self.observe(ns, &StorageStats::merge(&replies));
                    }
                    Ok(_) => debug!(namespace = %ns, "collection does not exist"),
                    Err(e) => warn!(namespace = %ns, error = %e, "$collStats failed"),
                }
            }

            debug!(namespaces = namespaces.len(), "collected collection stats");
            Ok(())
        })
    }
}
