//! Pre-`mongodb_ss_*` metric names kept for dashboards built on them.

use crate::collectors::metric_set::boxed;
use crate::collectors::util::{document_at, gauge, gauge_vec, number_at};
use anyhow::Result;
use mongodb::bson::Document;
use prometheus::{Gauge, GaugeVec};
use std::collections::HashMap;

#[derive(Clone)]
pub(super) struct LegacyMetrics {
    uptime: Gauge,
    connections: GaugeVec,
    op_counters: GaugeVec,
    memory: GaugeVec,
}

impl LegacyMetrics {
    pub(super) fn new(labels: &HashMap<String, String>) -> Result<Self> {
        Ok(Self {
            uptime: gauge(
                "mongodb_instance_uptime_seconds",
                "The value of the uptime field in serverStatus.",
                labels,
            )?,
            connections: gauge_vec(
                "mongodb_connections",
                "The connections sub document data regarding the status of connections.",
                &["state"],
                labels,
            )?,
            op_counters: gauge_vec(
                "mongodb_op_counters_total",
                "The opcounters data since the mongod instance last started.",
                &["type"],
                labels,
            )?,
            memory: gauge_vec(
                "mongodb_memory",
                "The mem data regarding the architecture and current use of memory, in megabytes.",
                &["type"],
                labels,
            )?,
        })
    }

    pub(super) fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        vec![
            boxed(&self.uptime),
            boxed(&self.connections),
            boxed(&self.op_counters),
            boxed(&self.memory),
        ]
    }

    pub(super) fn observe(&self, status: &Document) {
        if let Some(uptime) = number_at(status, "uptime") {
            self.uptime.set(uptime);
        }

        set_fields(&self.connections, status, "connections", &["current", "available"]);
        set_fields(
            &self.op_counters,
            status,
            "opcounters",
            &["insert", "query", "update", "delete", "getmore", "command"],
        );
        set_fields(&self.memory, status, "mem", &["resident", "virtual"]);
    }
}

fn set_fields(metric: &GaugeVec, status: &Document, path: &str, fields: &[&str]) {
    let Some(sub) = document_at(status, path) else {
        return;
    };
    for field in fields {
        if let Some(value) = number_at(sub, field) {
            metric.with_label_values(&[*field]).set(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_legacy_memory_stays_in_megabytes() -> Result<()> {
        let legacy = LegacyMetrics::new(&HashMap::new())?;
        legacy.observe(&doc! {
            "uptime": 10,
            "mem": { "resident": 100, "virtual": 1500 },
        });

        assert!((legacy.memory.with_label_values(&["resident"]).get() - 100.0).abs() < f64::EPSILON);
        assert!((legacy.uptime.get() - 10.0).abs() < f64::EPSILON);
        Ok(())
    }
}
