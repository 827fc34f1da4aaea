use std::collections::HashSet;

/// Which collectors a scrape may run, before topology gating is applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CollectorConfig {
    pub enabled_collectors: HashSet<String>,
    pub collect_all: bool,
    /// Also emit the metric names used by the legacy exporter.
    pub compatible_mode: bool,
    /// Expand `db` entries (or an empty list) in namespace lists to every collection.
    pub discovering_mode: bool,
    pub index_stats_collections: Vec<String>,
    pub coll_stats_collections: Vec<String>,
}

impl CollectorConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_enabled(mut self, collectors: &[String]) -> Self {
        self.enabled_collectors = collectors.iter().cloned().collect();
        self
    }

    #[must_use]
    pub fn with_collect_all(mut self, collect_all: bool) -> Self {
        self.collect_all = collect_all;
        self
    }

    #[must_use]
    pub fn with_compatible_mode(mut self, compatible_mode: bool) -> Self {
        self.compatible_mode = compatible_mode;
        self
    }

    #[must_use]
    pub fn with_discovering_mode(mut self, discovering_mode: bool) -> Self {
        self.discovering_mode = discovering_mode;
        self
    }

    #[must_use]
    pub fn with_index_stats_collections(mut self, namespaces: Vec<String>) -> Self {
        self.index_stats_collections = namespaces;
        self
    }

    #[must_use]
    pub fn with_coll_stats_collections(mut self, namespaces: Vec<String>) -> Self {
        self.coll_stats_collections = namespaces;
        self
    }

    #[must_use]
    pub fn is_enabled(&self, name: &str) -> bool {
        self.collect_all || self.enabled_collectors.contains(name)
    }

    /// Replica set status is asked for explicitly or through `collect_all`.
    #[must_use]
    pub fn enable_replicaset_status(&self) -> bool {
        self.is_enabled("replset_status")
    }

    /// Namespace-driven collectors only run when they have something to look at.
    #[must_use]
    pub fn has_targets(&self, namespaces: &[String]) -> bool {
        self.discovering_mode || !namespaces.is_empty()
    }
}
