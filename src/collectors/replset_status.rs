//! `replSetGetStatus` metrics: this member's state and a row per set member.

use crate::collectors::Collector;
use crate::collectors::context::Binding;
use crate::collectors::metric_set::boxed;
use crate::collectors::util::{gauge, gauge_vec};
use anyhow::Result;
use futures::future::BoxFuture;
use mongodb::bson::{self, DateTime, Document, doc};
use prometheus::{Gauge, GaugeVec};
use serde::Deserialize;
use tracing::{debug, instrument};

const PRIMARY: i32 = 1;
const SECONDARY: i32 = 2;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReplSetStatus {
    set: String,
    my_state: i32,
    term: Option<i64>,
    #[serde(default)]
    members: Vec<Member>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Member {
    name: String,
    #[serde(default)]
    health: f64,
    state: i32,
    state_str: String,
    uptime: Option<i64>,
    optime_date: Option<DateTime>,
    ping_ms: Option<i64>,
    #[serde(rename = "self", default)]
    is_self: bool,
}

impl ReplSetStatus {
    fn primary_optime(&self) -> Option<DateTime> {
        self.members
            .iter()
            .find(|m| m.state == PRIMARY)
            .and_then(|m| m.optime_date)
    }

    /// Seconds each secondary is behind the primary. Empty without a primary.
    #[allow(clippy::cast_precision_loss)]
    fn replication_lag(&self) -> Vec<(&Member, f64)> {
        let Some(primary) = self.primary_optime() else {
            return Vec::new();
        };

        self.members
            .iter()
            .filter(|m| m.state == SECONDARY)
            .filter_map(|m| {
                m.optime_date.map(|optime| {
                    let lag_ms = primary.timestamp_millis() - optime.timestamp_millis();
                    (m, lag_ms.max(0) as f64 / 1000.0)
                })
            })
            .collect()
    }
}

#[derive(Clone)]
struct LegacyMetrics {
    my_state: GaugeVec,
    member_replication_lag: GaugeVec,
}

#[derive(Clone)]
pub struct ReplicaSetStatusCollector {
    binding: Binding,
    my_state: Gauge,
    term: Gauge,
    member_health: GaugeVec,
    member_state: GaugeVec,
    member_uptime: GaugeVec,
    member_optime: GaugeVec,
    member_ping: GaugeVec,
    member_self: GaugeVec,
    member_lag: GaugeVec,
    legacy: Option<LegacyMetrics>,
}

impl ReplicaSetStatusCollector {
    pub const ENABLED_BY_DEFAULT: bool = false;

    /// # Errors
    ///
    /// Returns an error if a base label collides with a member label.
    pub fn new(binding: Binding, compatible_mode: bool) -> Result<Self> {
        let labels = binding.labels();
        let member = &["member_idx", "member_state"];

        let legacy = if compatible_mode {
            Some(LegacyMetrics {
                my_state: gauge_vec(
                    "mongodb_mongod_replset_my_state",
                    "An integer between 0 and 10 that represents the replica state of the current member.",
                    &["set"],
                    labels,
                )?,
                member_replication_lag: gauge_vec(
                    "mongodb_mongod_replset_member_replication_lag",
                    "The replication lag that this member has with the primary.",
                    &["name", "set", "state"],
                    labels,
                )?,
            })
        } else {
            None
        };

        Ok(Self {
            my_state: gauge(
                "mongodb_rs_my_state",
                "Replica set state of the member the exporter is connected to.",
                labels,
            )?,
            term: gauge(
                "mongodb_rs_term",
                "Current election term of the replica set.",
                labels,
            )?,
            member_health: gauge_vec(
                "mongodb_rs_members_health",
                "Whether the member is up (1) or down (0).",
                member,
                labels,
            )?,
            member_state: gauge_vec(
                "mongodb_rs_members_state",
                "Replica set state of the member.",
                member,
                labels,
            )?,
            member_uptime: gauge_vec(
                "mongodb_rs_members_uptime_seconds",
                "Seconds the member has been online.",
                member,
                labels,
            )?,
            member_optime: gauge_vec(
                "mongodb_rs_members_optime_date_seconds",
                "Last applied operation time of the member as unix seconds.",
                member,
                labels,
            )?,
            member_ping: gauge_vec(
                "mongodb_rs_members_ping_ms",
                "Round-trip time from this member to the remote member in milliseconds.",
                member,
                labels,
            )?,
            member_self: gauge_vec(
                "mongodb_rs_members_self",
                "1 for the member the exporter is connected to.",
                member,
                labels,
            )?,
            member_lag: gauge_vec(
                "mongodb_rs_members_replication_lag_seconds",
                "Seconds a secondary is behind the primary.",
                member,
                labels,
            )?,
            legacy,
            binding,
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn observe(&self, status: &ReplSetStatus) {
        self.my_state.set(f64::from(status.my_state));
        if let Some(term) = status.term {
            self.term.set(term as f64);
        }

        for m in &status.members {
            let labels = [m.name.as_str(), m.state_str.as_str()];
            self.member_health.with_label_values(&labels).set(m.health);
            self.member_state
                .with_label_values(&labels)
                .set(f64::from(m.state));
            self.member_self
                .with_label_values(&labels)
                .set(if m.is_self { 1.0 } else { 0.0 });
            if let Some(uptime) = m.uptime {
                self.member_uptime
                    .with_label_values(&labels)
                    .set(uptime as f64);
            }
            if let Some(optime) = m.optime_date {
                self.member_optime
                    .with_label_values(&labels)
                    .set(optime.timestamp_millis() as f64 / 1000.0);
            }
            if let Some(ping) = m.ping_ms {
                self.member_ping.with_label_values(&labels).set(ping as f64);
            }
        }

        let state = status.my_state.to_string();
        for (m, lag) in status.replication_lag() {
            self.member_lag
                .with_label_values(&[m.name.as_str(), m.state_str.as_str()])
                .set(lag);
            if let Some(legacy) = &self.legacy {
                legacy
                    .member_replication_lag
                    .with_label_values(&[m.name.as_str(), status.set.as_str(), state.as_str()])
                    .set(lag);
            }
        }

        if let Some(legacy) = &self.legacy {
            legacy
                .my_state
                .with_label_values(&[status.set.as_str()])
                .set(f64::from(status.my_state));
        }
    }
}

impl Collector for ReplicaSetStatusCollector {
    fn name(&self) -> &'static str {
        "replset_status"
    }

    fn metrics(&self) -> Vec<Box<dyn prometheus::core::Collector>> {
        let mut metrics = vec![
            boxed(&self.my_state),
            boxed(&self.term),
            boxed(&self.member_health),
            boxed(&self.member_state),
            boxed(&self.member_uptime),
            boxed(&self.member_optime),
            boxed(&self.member_ping),
            boxed(&self.member_self),
            boxed(&self.member_lag),
        ];
        if let Some(legacy) = &self.legacy {
            metrics.push(boxed(&legacy.my_state));
            metrics.push(boxed(&legacy.member_replication_lag));
        }
        metrics
    }

    #[instrument(skip(self), level = "info", err, fields(collector = "replset_status", otel.kind = "internal"))]
    fn collect<'a>(&'a self) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let reply: Document = self
                .binding
                .connection()
                .admin_command(
                    self.binding.context(),
                    "replSetGetStatus",
                    doc! { "replSetGetStatus": 1 },
                )
                .await?;

            let status: ReplSetStatus = bson::from_document(reply)?;
            debug!(set = %status.set, members = status.members.len(), "collected replica set status");
            self.observe(&status);
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
    use prometheus::{Registry, TextEncoder};
    use std::collections::HashMap;
    use std::time::Duration;

    async fn collector(compatible_mode: bool) -> Result<ReplicaSetStatusCollector> {
        let conn = Connection::lazy(&ConnectOptions::new("mongodb://127.0.0.1:1")).await?;
        ReplicaSetStatusCollector::new(
            Binding::new(conn, ScrapeContext::new(Duration::from_millis(100)), HashMap::new()),
            compatible_mode,
        )
    }

    fn status() -> Result<ReplSetStatus> {
        let primary = DateTime::from_millis(1_700_000_010_000);
        let behind = DateTime::from_millis(1_700_000_004_500);

        Ok(bson::from_document(doc! {
            "set": "rs0",
            "myState": 1,
            "term": 3_i64,
            "ok": 1.0,
            "members": [
                { "_id": 0, "name": "a:27017", "health": 1.0, "state": 1, "stateStr": "PRIMARY",
                  "uptime": 100, "optimeDate": primary, "self": true },
                { "_id": 1, "name": "b:27017", "health": 1.0, "state": 2, "stateStr": "SECONDARY",
                  "uptime": 90, "optimeDate": behind, "pingMs": 2_i64 },
                { "_id": 2, "name": "c:27017", "health": 1.0, "state": 7, "stateStr": "ARBITER",
                  "uptime": 90, "pingMs": 1_i64 },
            ],
        })?)
    }

    #[test]
    fn test_status_deserializes() -> Result<()> {
        let status = status()?;
        assert_eq!(status.set, "rs0");
        assert_eq!(status.members.len(), 3);
        assert!(status.members[0].is_self);
        assert!(status.members[2].optime_date.is_none());
        Ok(())
    }

    #[test]
    fn test_replication_lag_against_primary() -> Result<()> {
        let status = status()?;
        let lag = status.replication_lag();

        assert_eq!(lag.len(), 1);
        assert_eq!(lag[0].0.name, "b:27017");
        assert!((lag[0].1 - 5.5).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn test_no_primary_means_no_lag() -> Result<()> {
        let mut status = status()?;
        status.members.retain(|m| m.state != PRIMARY);
        assert!(status.replication_lag().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_compatible_mode_renders_legacy_names() -> Result<()> {
        let collector = collector(true).await?;
        let registry = Registry::new();
        collector.register_metrics(&registry)?;
        collector.observe(&status()?);

        let body = TextEncoder::new().encode_to_string(&registry.gather())?;
        assert!(body.contains("mongodb_rs_my_state 1"));
        assert!(body.contains("mongodb_mongod_replset_my_state{set=\"rs0\"} 1"));
        assert!(body.contains(
            "mongodb_mongod_replset_member_replication_lag{name=\"b:27017\",set=\"rs0\",state=\"1\"} 5.5"
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_legacy_names_absent_by_default() -> Result<()> {
        let collector = collector(false).await?;
        let registry = Registry::new();
        collector.register_metrics(&registry)?;
        collector.observe(&status()?);

        let body = TextEncoder::new().encode_to_string(&registry.gather())?;
        assert!(body.contains("mongodb_rs_my_state 1"));
        assert!(!body.contains("mongodb_mongod_replset"));
        Ok(())
    }
}
