//! Cluster metadata from the `config` database. Only meaningful on a `mongos`
//! or a config server.

use crate::collectors::Collector;
use crate::collectors::context::Binding;
use crate::collectors::metric_set::boxed;
use crate::collectors::util::{as_f64, gauge, gauge_vec};
use anyhow::Result;
use futures::future::BoxFuture;
use mongodb::bson::{Document, doc};
use prometheus::{Gauge, GaugeVec};
use tracing::{debug, instrument};

const CONFIG_DB: &str = "config";

#[derive(Clone)]
pub struct ShardingCollector {
    binding: Binding,
    shards_total: Gauge,
    shard_draining: GaugeVec,
    chunks: GaugeVec,
    balancer_enabled: Gauge,
    databases_total: Gauge,
}

impl ShardingCollector {
    pub const ENABLED_BY_DEFAULT: bool = true;

    /// # Errors
    ///
    /// Returns an error if a base label collides with the `shard` label.
    pub fn new(binding: Binding) -> Result<Self> {
        let labels = binding.labels();

        Ok(Self {
            shards_total: gauge(
                "mongodb_sharding_shards_total",
                "Number of shards registered in the cluster.",
                labels,
            )?,
            shard_draining: gauge_vec(
                "mongodb_sharding_shard_draining",
                "Whether the shard is being drained for removal.",
                &["shard"],
                labels,
            )?,
            chunks: gauge_vec(
                "mongodb_sharding_chunks",
                "Number of chunks owned by each shard.",
                &["shard"],
                labels,
            )?,
            balancer_enabled: gauge(
                "mongodb_sharding_balancer_enabled",
                "Whether the balancer is enabled.",
                labels,
            )?,
            databases_total: gauge(
                "mongodb_sharding_databases_total",
                "Number of databases known to the cluster.",
                labels,
            )?,
            binding,
        })
    }

    async fn collect_shards(&self) -> Result<()> {
        let shards = self
            .binding
            .connection()
            .find_all(self.binding.context(), CONFIG_DB, "shards", doc! {})
            .await?;

        #[allow(clippy::cast_precision_loss)]
        let total = shards.len() as f64;
        self.shards_total.set(total);

        for shard in &shards {
            let Ok(id) = shard.get_str("_id") else {
                continue;
            };
            let draining = shard.get_bool("draining").unwrap_or(false);
            self.shard_draining
                .with_label_values(&[id])
                .set(if draining { 1.0 } else { 0.0 });
        }
        Ok(())
    }

    async fn collect_chunks(&self) -> Result<()> {
        let per_shard = self
            .binding
            .connection()
            .aggregate(
                self.binding.context(),
                CONFIG_DB,
                "chunks",
                vec![doc! { "$group": { "_id": "$shard", "count": { "$sum": 1 } } }],
            )
            .await?;

        for row in &per_shard {
            if let (Ok(shard), Some(count)) = (row.get_str("_id"), row.get("count").and_then(as_f64)) {
                self.chunks.with_label_values(&[shard]).set(count);
            }
        }
        Ok(())
    }

    async fn collect_balancer(&self) -> Result<()> {
        let settings = self
            .binding
            .connection()
            .find_all(
                self.binding.context(),
                CONFIG_DB,
                "settings",
                doc! { "_id": "balancer" },
            )
            .await?;

        let enabled = balancer_enabled(settings.first());
        self.balancer_enabled.set(if enabled { 1.0 } else { 0.0 });
        Ok(())
    }

    async fn collect_databases(&self) -> Result<()> {
        let count = self
            .binding
            .context()
            .run(
                "countDocuments",
                self.binding
                    .connection()
                    .client()
                    .database(CONFIG_DB)
                    .collection::<Document>("databases")
                    .count_documents(doc! {}),
            )
            .await?;

        #[allow(clippy::cast_precision_loss)]
        let count = count as f64;
        self.databases_total.set(count);
        Ok(())
    }
}

/// The balancer runs unless its settings document says it was stopped. A
/// missing document means the default, which is enabled.
fn balancer_enabled(settings: Option<&Document>) -> bool {
    settings.is_none_or(|s| {
        !s.get_bool("stopped").unwrap_or(false) && s.get_str("mode").map_or(true, |m| m != "off")
    })
}

impl Collector for ShardingCollector {
    fn name(&self) -> &'static str {
        "sharding"
    }

    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        vec![
            boxed(&self.shards_total),
            boxed(&self.shard_draining),
            boxed(&self.chunks),
            boxed(&self.balancer_enabled),
            boxed(&self.databases_total),
        ]
    }

    #[instrument(skip(self), level = "info", err, fields(collector = "sharding", otel.kind = "internal"))]
    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let (shards, chunks, balancer, databases) = tokio::join!(
                self.collect_shards(),
                self.collect_chunks(),
                self.collect_balancer(),
                self.collect_databases(),
            );

            shards?;
            chunks?;
            balancer?;
            databases?;

            debug!("collected sharding metadata");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_balancer_enabled() {
        assert!(balancer_enabled(None));
        assert!(balancer_enabled(Some(&doc! { "_id": "balancer", "mode": "full" })));
        assert!(!balancer_enabled(Some(&doc! { "_id": "balancer", "stopped": true })));
        assert!(!balancer_enabled(Some(&doc! { "_id": "balancer", "mode": "off" })));
    }
}
