//! Shared utilities for collectors:
//! - Version normalization for `buildInfo` replies.
//! - Numeric reads from loosely typed BSON replies.
//! - Metric constructors carrying the base labels as const labels.
//! - Namespace targets for the per-collection collectors.

use crate::collectors::context::ScrapeContext;
use crate::exporter::connection::Connection;
use anyhow::Result;
use mongodb::bson::{Bson, Document, doc};
use once_cell::sync::OnceCell;
use prometheus::{Gauge, GaugeVec, Opts};
use regex::Regex;
use std::collections::HashMap;

/// Databases that never hold user collections.
pub const SYSTEM_DATABASES: &[&str] = &["admin", "config", "local"];

/// Parse and normalize a `MongoDB` version string.
/// Returns a tuple of (`normalized_string`, `version_number`).
/// e.g. "7.0.14" -> ("7.0.14", 70014)
///      "4.4.29-rc1" -> ("4.4.29", 40429)
///
/// # Panics
///
/// Panics if the regex cannot be compiled (should never happen).
#[must_use]
pub fn normalize_version(version_string: &str) -> (String, i64) {
    static RE: OnceCell<Regex> = OnceCell::new();
    let re = RE.get_or_init(|| {
        #[allow(clippy::expect_used)]
        Regex::new(r"^(\d+)(?:\.(\d+))?(?:\.(\d+))?").expect("Invalid regex")
    });

    let Some(caps) = re.captures(version_string.trim()) else {
        return ("0.0.0".to_string(), 0);
    };

    let part = |i: usize| {
        caps.get(i)
            .map_or(0, |m| m.as_str().parse::<i64>().unwrap_or(0))
    };
    let (major, minor, patch) = (part(1), part(2), part(3));

    (
        format!("{major}.{minor}.{patch}"),
        major * 10000 + minor * 100 + patch,
    )
}

/// Any BSON number (or boolean) as `f64`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Double(v) => Some(*v),
        Bson::Int32(v) => Some(f64::from(*v)),
        Bson::Int64(v) => Some(*v as f64),
        Bson::Boolean(v) => Some(if *v { 1.0 } else { 0.0 }),
        _ => None,
    }
}

/// Follow a dotted path through nested documents.
#[must_use]
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut parts = path.split('.');
    let mut current = doc.get(parts.next()?)?;
    for part in parts {
        current = current.as_document()?.get(part)?;
    }
    Some(current)
}

/// Numeric value at a dotted path.
#[must_use]
pub fn number_at(doc: &Document, path: &str) -> Option<f64> {
    lookup(doc, path).and_then(as_f64)
}

/// Nested document at a dotted path.
#[must_use]
pub fn document_at<'a>(doc: &'a Document, path: &str) -> Option<&'a Document> {
    lookup(doc, path).and_then(Bson::as_document)
}

fn opts(name: &str, help: &str, labels: &HashMap<String, String>) -> Opts {
    Opts::new(name, help).const_labels(labels.clone())
}

/// A gauge carrying the base labels.
///
/// # Errors
///
/// Returns an error if the name or a label name is not a valid metric identifier.
pub fn gauge(name: &str, help: &str, labels: &HashMap<String, String>) -> Result<Gauge> {
    Ok(Gauge::with_opts(opts(name, help, labels))?)
}

/// A gauge vector carrying the base labels plus `variable` label names.
///
/// # Errors
///
/// Returns an error if the name or a label name is not a valid metric identifier,
/// or if a variable label shadows a base label.
pub fn gauge_vec(
    name: &str,
    help: &str,
    variable: &[&str],
    labels: &HashMap<String, String>,
) -> Result<GaugeVec> {
    Ok(GaugeVec::new(opts(name, help, labels), variable)?)
}

/// A `database.collection` pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    /// Split on the first dot; collection names may themselves contain dots.
    #[must_use]
    pub fn parse(namespace: &str) -> Option<Self> {
        let (database, collection) = namespace.trim().split_once('.')?;
        if database.is_empty() || collection.is_empty() {
            return None;
        }

        Some(Self {
            database: database.to_string(),
            collection: collection.to_string(),
        })
    }
}

impl std::fmt::Display for Namespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.database, self.collection)
    }
}

/// The namespaces a per-collection collector should query.
///
/// Configured entries of the form `db.coll` are used as given. A bare `db`
/// entry, or discovering mode with an empty list, expands to the collections
/// found on the server.
///
/// # Errors
///
/// Returns an error if the server cannot list databases or collections.
pub async fn resolve_namespaces(
    conn: &Connection,
    ctx: &ScrapeContext,
    configured: &[String],
    discovering: bool,
) -> Result<Vec<Namespace>> {
    let mut namespaces = Vec::new();
    let mut expand = Vec::new();

    for entry in configured {
        match Namespace::parse(entry) {
            Some(ns) => namespaces.push(ns),
            None if discovering && !entry.trim().is_empty() => {
                expand.push(entry.trim().trim_end_matches('.').to_string());
            }
            None => {}
        }
    }

    if discovering && configured.is_empty() {
        expand = ctx
            .run("listDatabases", conn.client().list_database_names())
            .await?
            .into_iter()
            .filter(|db| !SYSTEM_DATABASES.contains(&db.as_str()))
            .collect();
    }

    for database in expand {
        let collections = ctx
            .run(
                "listCollections",
                conn.client()
                    .database(&database)
                    .list_collection_names()
                    .filter(doc! { "type": "collection" }),
            )
            .await?;

        for collection in collections {
            if collection.starts_with("system.") {
                continue;
            }
            let ns = Namespace {
                database: database.clone(),
                collection,
            };
            if !namespaces.contains(&ns) {
                namespaces.push(ns);
            }
        }
    }

    Ok(namespaces)
}
