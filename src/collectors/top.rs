use crate::collectors::Collector;
use crate::collectors::context::Binding;
use crate::collectors::metric_set::boxed;
use crate::collectors::util::{Namespace, gauge_vec, number_at};
use anyhow::{Result, anyhow};
use futures::future::BoxFuture;
use mongodb::bson::{Document, doc};
use prometheus::GaugeVec;
use tracing::{debug, instrument};

/// Operation groups reported by `top` for every namespace.
const OPERATIONS: &[(&str, &str)] = &[
    ("total", "total"),
    ("readLock", "read_lock"),
    ("writeLock", "write_lock"),
    ("queries", "queries"),
    ("getmore", "getmore"),
    ("insert", "insert"),
    ("update", "update"),
    ("remove", "remove"),
    ("commands", "commands"),
];

/// Per-namespace lock and operation usage from the `top` admin command.
/// Not available through a `mongos`.
#[derive(Clone)]
pub struct TopCollector {
    binding: Binding,
    time: GaugeVec,
    count: GaugeVec,
}

impl TopCollector {
    pub const ENABLED_BY_DEFAULT: bool = false;

    /// # Errors
    ///
    /// Returns an error if a base label collides with a namespace label.
    pub fn new(binding: Binding) -> Result<Self> {
        let labels = &["database", "collection", "type"];

        Ok(Self {
            time: gauge_vec(
                "mongodb_top_time_microseconds",
                "Time spent on each operation type per collection, in microseconds since startup.",
                labels,
                binding.labels(),
            )?,
            count: gauge_vec(
                "mongodb_top_count",
                "Number of operations of each type per collection since startup.",
                labels,
                binding.labels(),
            )?,
            binding,
        })
    }

    fn observe(&self, totals: &Document) -> usize {
        let mut namespaces = 0;

        for (ns, usage) in totals {
            let (Some(ns), Some(usage)) = (Namespace::parse(ns), usage.as_document()) else {
                // "note" and other non-namespace keys
                continue;
            };
            namespaces += 1;

            for (field, op) in OPERATIONS {
                let labels = [ns.database.as_str(), ns.collection.as_str(), *op];
                if let Some(time) = number_at(usage, &format!("{field}.time")) {
                    self.time.with_label_values(&labels).set(time);
                }
                if let Some(count) = number_at(usage, &format!("{field}.count")) {
                    self.count.with_label_values(&labels).set(count);
                }
            }
        }

        namespaces
    }
}

impl Collector for TopCollector {
    fn name(&self) -> &'static str {
        "top"
    }

    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        vec![boxed(&self.time), boxed(&self.count)]
    }

    #[instrument(skip(self), level = "info", err, fields(collector = "top", otel.kind = "internal"))]
    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let reply = self
                .binding
                .connection()
                .admin_command(self.binding.context(), "top", doc! { "top": 1 })
                .await?;

            let totals = reply
                .get_document("totals")
                .map_err(|e| anyhow!("unexpected top reply: {e}"))?;

            let namespaces = self.observe(totals);
            debug!(namespaces, "collected top");
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
    async fn test_observe_skips_note() -> Result<()> {
        let conn = Connection::lazy(&ConnectOptions::new("mongodb://127.0.0.1:1")).await?;
        let collector = TopCollector::new(Binding::new(
            conn,
            ScrapeContext::new(Duration::from_millis(100)),
            HashMap::new(),
        ))?;

        let totals = doc! {
            "note": "all times in microseconds",
            "app.orders": {
                "total": { "time": 1500_i64, "count": 12_i64 },
                "insert": { "time": 300_i64, "count": 4_i64 },
            },
        };

        assert_eq!(collector.observe(&totals), 1);
        assert!(
            (collector
                .count
                .with_label_values(&["app", "orders", "insert"])
                .get()
                - 4.0)
                .abs()
                < f64::EPSILON
        );
        Ok(())
    }
}
