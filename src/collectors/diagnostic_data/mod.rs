//! `serverStatus` metrics.

mod legacy;

use crate::collectors::Collector;
use crate::collectors::context::Binding;
use crate::collectors::metric_set::boxed;
use crate::collectors::util::{document_at, gauge, gauge_vec, number_at};
use anyhow::Result;
use futures::future::BoxFuture;
use legacy::LegacyMetrics;
use mongodb::bson::{Document, doc};
use prometheus::{Gauge, GaugeVec};
use tracing::{debug, instrument};

const MEBIBYTE: f64 = 1024.0 * 1024.0;

/// One `serverStatus` sub-document flattened into a labelled gauge.
struct Section {
    metric: &'static str,
    help: &'static str,
    label: &'static str,
    path: &'static str,
    /// (field in the sub-document, label value)
    fields: &'static [(&'static str, &'static str)],
    scale: f64,
}

const OPCOUNTER_FIELDS: &[(&str, &str)] = &[
    ("insert", "insert"),
    ("query", "query"),
    ("update", "update"),
    ("delete", "delete"),
    ("getmore", "getmore"),
    ("command", "command"),
];

const SECTIONS: &[Section] = &[
    Section {
        metric: "mongodb_ss_connections",
        help: "serverStatus connections by state.",
        label: "conn_type",
        path: "connections",
        fields: &[
            ("current", "current"),
            ("available", "available"),
            ("totalCreated", "total_created"),
            ("active", "active"),
        ],
        scale: 1.0,
    },
    Section {
        metric: "mongodb_ss_opcounters",
        help: "serverStatus operation counters since startup.",
        label: "legacy_op_type",
        path: "opcounters",
        fields: OPCOUNTER_FIELDS,
        scale: 1.0,
    },
    Section {
        metric: "mongodb_ss_opcounters_repl",
        help: "serverStatus replicated operation counters since startup.",
        label: "legacy_op_type",
        path: "opcountersRepl",
        fields: OPCOUNTER_FIELDS,
        scale: 1.0,
    },
    Section {
        metric: "mongodb_ss_mem_bytes",
        help: "serverStatus memory usage in bytes.",
        label: "mem_type",
        path: "mem",
        fields: &[("resident", "resident"), ("virtual", "virtual")],
        scale: MEBIBYTE,
    },
    Section {
        metric: "mongodb_ss_network",
        help: "serverStatus network traffic since startup.",
        label: "network_type",
        path: "network",
        fields: &[
            ("bytesIn", "bytes_in"),
            ("bytesOut", "bytes_out"),
            ("numRequests", "requests"),
        ],
        scale: 1.0,
    },
    Section {
        metric: "mongodb_ss_asserts",
        help: "serverStatus assertions raised since startup.",
        label: "assert_type",
        path: "asserts",
        fields: &[
            ("regular", "regular"),
            ("warning", "warning"),
            ("msg", "msg"),
            ("user", "user"),
            ("tripwire", "tripwire"),
            ("rollovers", "rollovers"),
        ],
        scale: 1.0,
    },
    Section {
        metric: "mongodb_ss_global_lock_current_queue",
        help: "serverStatus operations queued waiting for the global lock.",
        label: "count_type",
        path: "globalLock.currentQueue",
        fields: &[
            ("total", "total"),
            ("readers", "readers"),
            ("writers", "writers"),
        ],
        scale: 1.0,
    },
    Section {
        metric: "mongodb_ss_global_lock_active_clients",
        help: "serverStatus active client connections performing operations.",
        label: "count_type",
        path: "globalLock.activeClients",
        fields: &[
            ("total", "total"),
            ("readers", "readers"),
            ("writers", "writers"),
        ],
        scale: 1.0,
    },
    Section {
        metric: "mongodb_ss_metrics_document",
        help: "serverStatus document operations since startup.",
        label: "doc_op_type",
        path: "metrics.document",
        fields: &[
            ("deleted", "deleted"),
            ("inserted", "inserted"),
            ("returned", "returned"),
            ("updated", "updated"),
        ],
        scale: 1.0,
    },
    Section {
        metric: "mongodb_ss_wt_cache_bytes",
        help: "serverStatus WiredTiger cache usage in bytes.",
        label: "cache_type",
        path: "wiredTiger.cache",
        fields: &[
            ("bytes currently in the cache", "current"),
            ("maximum bytes configured", "max"),
            ("tracked dirty bytes in the cache", "dirty"),
        ],
        scale: 1.0,
    },
];

#[derive(Clone)]
pub struct DiagnosticDataCollector {
    binding: Binding,
    uptime: Gauge,
    sections: Vec<GaugeVec>,
    legacy: Option<LegacyMetrics>,
}

impl DiagnosticDataCollector {
    pub const ENABLED_BY_DEFAULT: bool = true;

    /// # Errors
    ///
    /// Returns an error if a base label collides with a section label.
    pub fn new(binding: Binding, compatible_mode: bool) -> Result<Self> {
        let labels = binding.labels();

        let uptime = gauge(
            "mongodb_ss_uptime_seconds",
            "serverStatus uptime of the mongod or mongos process in seconds.",
            labels,
        )?;
        let sections = SECTIONS
            .iter()
            .map(|s| gauge_vec(s.metric, s.help, &[s.label], labels))
            .collect::<Result<Vec<_>>>()?;
        let legacy = if compatible_mode {
            Some(LegacyMetrics::new(labels)?)
        } else {
            None
        };

        Ok(Self {
            binding,
            uptime,
            sections,
            legacy,
        })
    }

    /// Set every gauge the reply has a value for; absent sections (for example
    /// `wiredTiger` on a `mongos`) are skipped.
    fn observe(&self, status: &Document) -> usize {
        let mut observed = 0;

        if let Some(uptime) = number_at(status, "uptime") {
            self.uptime.set(uptime);
            observed += 1;
        }

        for (section, metric) in SECTIONS.iter().zip(&self.sections) {
            let Some(sub) = document_at(status, section.path) else {
                continue;
            };
            for (field, label) in section.fields {
                if let Some(value) = number_at(sub, field) {
                    metric.with_label_values(&[*label]).set(value * section.scale);
                    observed += 1;
                }
            }
        }

        if let Some(legacy) = &self.legacy {
            legacy.observe(status);
        }

        observed
    }
}

impl Collector for DiagnosticDataCollector {
    fn name(&self) -> &'static str {
        "diagnostic_data"
    }

    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        let mut metrics = vec![boxed(&self.uptime)];
        metrics.extend(self.sections.iter().map(boxed));
        if let Some(legacy) = &self.legacy {
            metrics.extend(legacy.metrics());
        }
        metrics
    }

    #[instrument(skip(self), level = "info", err, fields(collector = "diagnostic_data", otel.kind = "internal"))]
    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let status = self
                .binding
                .connection()
                .admin_command(
                    self.binding.context(),
                    "serverStatus",
                    doc! { "serverStatus": 1 },
                )
                .await?;

            let observed = self.observe(&status);
            debug!(observed, "collected serverStatus");
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

    async fn binding() -> Result<Binding> {
        let conn = Connection::lazy(&ConnectOptions::new("mongodb://127.0.0.1:1")).await?;
        Ok(Binding::new(
            conn,
            ScrapeContext::new(Duration::from_millis(100)),
            HashMap::new(),
        ))
    }

    fn server_status() -> Document {
        doc! {
            "uptime": 3600.0,
            "connections": { "current": 12, "available": 838_848, "totalCreated": 40_i64 },
            "opcounters": { "insert": 5_i64, "query": 7_i64, "update": 1_i64, "delete": 0_i64, "getmore": 2_i64, "command": 99_i64 },
            "mem": { "bits": 64, "resident": 100, "virtual": 1500 },
            "wiredTiger": { "cache": { "bytes currently in the cache": 4096.0 } },
        }
    }

    #[tokio::test]
    async fn test_observe_flattens_sections() -> Result<()> {
        let collector = DiagnosticDataCollector::new(binding().await?, false)?;
        let observed = collector.observe(&server_status());

        assert_eq!(observed, 1 + 3 + 6 + 2 + 1);
        assert!((collector.uptime.get() - 3600.0).abs() < f64::EPSILON);
        let mem = &collector.sections[3];
        assert!((mem.with_label_values(&["resident"]).get() - 100.0 * MEBIBYTE).abs() < 1.0);
        Ok(())
    }

    #[tokio::test]
    async fn test_compatible_mode_adds_legacy_metrics() -> Result<()> {
        let plain = DiagnosticDataCollector::new(binding().await?, false)?;
        let compatible = DiagnosticDataCollector::new(binding().await?, true)?;

        assert!(compatible.metrics().len() > plain.metrics().len());

        let names: Vec<String> = compatible
            .descriptors()
            .into_iter()
            .map(|d| d.fq_name)
            .collect();
        assert!(names.iter().any(|n| n == "mongodb_instance_uptime_seconds"));
        assert!(names.iter().any(|n| n == "mongodb_op_counters_total"));
        Ok(())
    }

    #[tokio::test]
    async fn test_compatible_mode_renders_legacy_values() -> Result<()> {
        let collector = DiagnosticDataCollector::new(binding().await?, true)?;
        let registry = prometheus::Registry::new();
        collector.register_metrics(&registry)?;
        collector.observe(&server_status());

        let body = prometheus::TextEncoder::new().encode_to_string(&registry.gather())?;
        assert!(body.contains("mongodb_instance_uptime_seconds 3600"));
        assert!(body.contains("mongodb_op_counters_total{type=\"insert\"} 5"));
        assert!(body.contains("mongodb_memory{type=\"resident\"} 100"));
        Ok(())
    }
}
