//! Topology resolver: classifies the server behind a connection.

use crate::collectors::context::ScrapeContext;
use crate::exporter::connection::{Connection, is_unsupported};
use anyhow::{Context, Result};
use mongodb::bson::{Bson, Document, doc};
use std::fmt;
use tracing::{debug, instrument, warn};

/// Role a server plays in a deployment.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Role {
    Standalone,
    ReplicaMember,
    ShardRouter,
    ConfigServer,
    /// Classification failed; treated as "nothing role-specific is safe".
    Unknown,
}

impl Role {
    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Standalone => "standalone",
            Self::ReplicaMember => "replica-member",
            Self::ShardRouter => "shard-router",
            Self::ConfigServer => "config-server",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Topology descriptor derived from a live connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Topology {
    pub role: Role,
    pub supports_replication_status: bool,
    /// Replica set id or sharded cluster id, empty when not applicable.
    pub cluster_identity: String,
    pub replica_set_name: Option<String>,
    /// `sharding.clusterRole` from the startup options (`shardsvr`/`configsvr`).
    pub cluster_role: Option<String>,
    /// `myState` reported by `replSetGetStatus`.
    pub member_state: Option<i32>,
}

impl Topology {
    #[must_use]
    pub const fn unknown() -> Self {
        Self::with_role(Role::Unknown)
    }

    #[must_use]
    pub const fn with_role(role: Role) -> Self {
        Self {
            role,
            supports_replication_status: false,
            cluster_identity: String::new(),
            replica_set_name: None,
            cluster_role: None,
            member_state: None,
        }
    }

    #[must_use]
    pub fn supporting_replication_status(mut self, supported: bool) -> Self {
        self.supports_replication_status = supported;
        self
    }
}

/// Fields of a `hello`/`isMaster` reply that matter for classification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Handshake {
    pub msg: Option<String>,
    pub set_name: Option<String>,
    pub config_server: bool,
}

impl Handshake {
    #[must_use]
    pub fn from_reply(reply: &Document) -> Self {
        Self {
            msg: reply.get_str("msg").ok().map(ToString::to_string),
            set_name: reply.get_str("setName").ok().map(ToString::to_string),
            config_server: reply.contains_key("configsvr"),
        }
    }
}

/// Pure classification from the handshake and the startup cluster role.
#[must_use]
pub fn classify(handshake: &Handshake, cluster_role: Option<&str>) -> Role {
    if handshake.msg.as_deref() == Some("isdbgrid") {
        Role::ShardRouter
    } else if handshake.config_server || cluster_role == Some("configsvr") {
        Role::ConfigServer
    } else if handshake.set_name.is_some() {
        Role::ReplicaMember
    } else {
        Role::Standalone
    }
}

/// Resolve the topology of the server behind `conn`.
///
/// Only the handshake is mandatory. Every other probe degrades to "not
/// available" so a partially privileged user still gets a usable descriptor.
///
/// # Errors
///
/// Returns an error if the handshake round trip fails.
#[instrument(skip(conn, ctx), level = "info", err, fields(target = %conn.target()))]
pub async fn resolve(conn: &Connection, ctx: &ScrapeContext) -> Result<Topology> {
    let handshake = handshake(conn, ctx).await?;

    let cluster_role = if handshake.msg.as_deref() == Some("isdbgrid") {
        None
    } else {
        startup_cluster_role(conn, ctx).await
    };

    let role = classify(&handshake, cluster_role.as_deref());
    let mut topology = Topology::with_role(role);
    topology.replica_set_name.clone_from(&handshake.set_name);
    topology.cluster_role = cluster_role;

    match conn
        .admin_command(ctx, "replSetGetStatus", doc! { "replSetGetStatus": 1 })
        .await
    {
        Ok(status) => {
            topology.supports_replication_status = true;
            topology.member_state = number(&status, "myState");
        }
        Err(e) if is_unsupported(&e) => {
            debug!(%role, error = %e, "replSetGetStatus not supported on this topology");
        }
        Err(e) => {
            warn!(%role, error = %e, "cannot probe replSetGetStatus; treating as unsupported");
        }
    }

    topology.cluster_identity = cluster_identity(conn, ctx, role).await;

    debug!(
        %role,
        supports_replication_status = topology.supports_replication_status,
        replica_set = ?topology.replica_set_name,
        "resolved topology"
    );

    Ok(topology)
}

async fn handshake(conn: &Connection, ctx: &ScrapeContext) -> Result<Handshake> {
    let reply = match conn.admin_command(ctx, "hello", doc! { "hello": 1 }).await {
        Ok(reply) => reply,
        // Servers older than 4.4.2 only know the legacy spelling.
        Err(e) if is_unsupported(&e) => conn
            .admin_command(ctx, "isMaster", doc! { "isMaster": 1 })
            .await
            .context("isMaster handshake failed")?,
        Err(e) => return Err(e.context("hello handshake failed")),
    };

    Ok(Handshake::from_reply(&reply))
}

async fn startup_cluster_role(conn: &Connection, ctx: &ScrapeContext) -> Option<String> {
    match conn
        .admin_command(ctx, "getCmdLineOpts", doc! { "getCmdLineOpts": 1 })
        .await
    {
        Ok(reply) => reply
            .get_document("parsed")
            .and_then(|p| p.get_document("sharding"))
            .and_then(|s| s.get_str("clusterRole"))
            .ok()
            .map(ToString::to_string),
        Err(e) => {
            debug!(error = %e, "getCmdLineOpts unavailable; cluster role unknown");
            None
        }
    }
}

async fn cluster_identity(conn: &Connection, ctx: &ScrapeContext, role: Role) -> String {
    let res = match role {
        Role::ReplicaMember | Role::ConfigServer => conn
            .admin_command(ctx, "replSetGetConfig", doc! { "replSetGetConfig": 1 })
            .await
            .map(|reply| {
                reply
                    .get_document("config")
                    .and_then(|c| c.get_document("settings"))
                    .and_then(|s| s.get_object_id("replicaSetId"))
                    .map(|id| id.to_hex())
                    .unwrap_or_default()
            }),
        Role::ShardRouter => conn
            .command(ctx, "config", "find", doc! { "find": "version", "limit": 1 })
            .await
            .map(|reply| {
                reply
                    .get_document("cursor")
                    .and_then(|c| c.get_array("firstBatch"))
                    .ok()
                    .and_then(|batch| batch.first())
                    .and_then(Bson::as_document)
                    .and_then(|v| v.get_object_id("clusterId").ok())
                    .map(|id| id.to_hex())
                    .unwrap_or_default()
            }),
        Role::Standalone | Role::Unknown => Ok(String::new()),
    };

    res.unwrap_or_else(|e| {
        debug!(%role, error = %e, "cannot read cluster identity");
        String::new()
    })
}

fn number(doc: &Document, key: &str) -> Option<i32> {
    match doc.get(key)? {
        Bson::Int32(v) => Some(*v),
        Bson::Int64(v) => i32::try_from(*v).ok(),
        #[allow(clippy::cast_possible_truncation)]
        Bson::Double(v) if v.is_finite() => Some(*v as i32),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_router() {
        let hs = Handshake::from_reply(&doc! { "isWritablePrimary": true, "msg": "isdbgrid" });
        assert_eq!(classify(&hs, None), Role::ShardRouter);
    }

    #[test]
    fn test_classify_replica_member() {
        let hs = Handshake::from_reply(&doc! { "setName": "rs0", "isWritablePrimary": true });
        assert_eq!(classify(&hs, None), Role::ReplicaMember);
        assert_eq!(classify(&hs, Some("shardsvr")), Role::ReplicaMember);
    }

    #[test]
    fn test_classify_config_server() {
        let hs = Handshake::from_reply(&doc! { "setName": "cfg", "configsvr": 2 });
        assert_eq!(classify(&hs, None), Role::ConfigServer);

        let hs = Handshake::from_reply(&doc! { "setName": "cfg" });
        assert_eq!(classify(&hs, Some("configsvr")), Role::ConfigServer);
    }

    #[test]
    fn test_classify_standalone() {
        let hs = Handshake::from_reply(&doc! { "isWritablePrimary": true });
        assert_eq!(classify(&hs, None), Role::Standalone);
    }

    #[test]
    fn test_unknown_topology_fails_closed() {
        let topology = Topology::unknown();
        assert!(!topology.role.is_known());
        assert!(!topology.supports_replication_status);
    }

    #[test]
    fn test_number_accepts_all_numeric_types() {
        let doc = doc! { "a": 1_i32, "b": 2_i64, "c": 3.0_f64, "d": "x" };
        assert_eq!(number(&doc, "a"), Some(1));
        assert_eq!(number(&doc, "b"), Some(2));
        assert_eq!(number(&doc, "c"), Some(3));
        assert_eq!(number(&doc, "d"), None);
        assert_eq!(number(&doc, "missing"), None);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::ShardRouter.to_string(), "shard-router");
    }
}
