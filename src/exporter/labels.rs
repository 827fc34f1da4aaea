//! Base labels attached to every connection-bound metric.

use crate::collectors::context::ScrapeContext;
use crate::exporter::connection::Connection;
use crate::exporter::topology::{self, Role, Topology};
use anyhow::Result;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::RwLock;
use tracing::{debug, instrument, warn};

pub const CLUSTER_ID: &str = "cl_id";
pub const CLUSTER_ROLE: &str = "cl_role";
pub const REPLICA_SET_NAME: &str = "rs_nm";
pub const REPLICA_SET_STATE: &str = "rs_state";

pub trait LabelsGetter: Send + Sync {
    /// Cached labels; never blocks and never touches the network.
    fn base_labels(&self) -> HashMap<String, String>;

    /// Populate the cache from the server. Safe to call repeatedly.
    ///
    /// # Errors
    ///
    /// Returns an error if the server cannot be queried; the previous cache is kept.
    fn load_labels<'a>(&'a self, ctx: &'a ScrapeContext) -> BoxFuture<'a, Result<()>>;
}

/// Fixed label set, used when there is no connection to derive labels from.
#[derive(Clone, Debug, Default)]
pub struct StaticLabels {
    labels: HashMap<String, String>,
}

impl StaticLabels {
    #[must_use]
    pub const fn new(labels: HashMap<String, String>) -> Self {
        Self { labels }
    }
}

impl LabelsGetter for StaticLabels {
    fn base_labels(&self) -> HashMap<String, String> {
        self.labels.clone()
    }

    fn load_labels<'a>(&'a self, _ctx: &'a ScrapeContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

/// Labels derived from the topology of the server behind a connection.
#[derive(Debug)]
pub struct TopologyLabels {
    conn: Connection,
    cache: RwLock<HashMap<String, String>>,
}

impl TopologyLabels {
    #[must_use]
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Seed the cache from an already resolved topology, saving a round trip.
    #[must_use]
    pub fn from_topology(conn: Connection, topology: &Topology) -> Self {
        let labels = Self::new(conn);
        labels.store(labels_for(topology));
        labels
    }

    fn store(&self, labels: HashMap<String, String>) {
        let mut cache = match self.cache.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("label cache write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        *cache = labels;
    }
}

impl LabelsGetter for TopologyLabels {
    fn base_labels(&self) -> HashMap<String, String> {
        match self.cache.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    #[instrument(skip(self, ctx), level = "debug", err, fields(target = %self.conn.target()))]
    fn load_labels<'a>(&'a self, ctx: &'a ScrapeContext) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let topology = topology::resolve(&self.conn, ctx).await?;
            let labels = labels_for(&topology);
            debug!(?labels, "loaded base labels");
            self.store(labels);
            Ok(())
        })
    }
}

/// Map a topology descriptor to the base label set, skipping empty values.
#[must_use]
pub fn labels_for(topology: &Topology) -> HashMap<String, String> {
    let mut labels = HashMap::new();

    if !topology.cluster_identity.is_empty() {
        labels.insert(CLUSTER_ID.to_string(), topology.cluster_identity.clone());
    }

    let cluster_role = match topology.role {
        Role::ShardRouter => Some("mongos".to_string()),
        _ => topology.cluster_role.clone(),
    };
    if let Some(role) = cluster_role.filter(|r| !r.is_empty()) {
        labels.insert(CLUSTER_ROLE.to_string(), role);
    }

    if let Some(name) = topology.replica_set_name.as_ref().filter(|n| !n.is_empty()) {
        labels.insert(REPLICA_SET_NAME.to_string(), name.clone());
    }

    if let Some(state) = topology.member_state {
        labels.insert(REPLICA_SET_STATE.to_string(), state.to_string());
    }

    labels
}
