use crate::{
    cli::{actions::Action, commands::collectors::optional_collectors},
    collectors::{ALWAYS_ON, config::CollectorConfig, enabled_by_default},
    exporter::options::{ConnectOptions, ExporterOptions, Pooling, validate_telemetry_path},
};
use anyhow::{Result, anyhow};
use clap::ArgMatches;
use std::time::Duration;
use tracing::info;

/// # Errors
///
/// Returns an error if required arguments are missing or invalid
pub fn handler(matches: &ArgMatches) -> Result<Action> {
    let port = matches
        .get_one::<u16>("port")
        .copied()
        .ok_or_else(|| anyhow!("Port is required. Please provide it using the --port flag."))?;

    let listen = matches.get_one::<String>("listen").cloned();

    let uri = matches.get_one::<String>("mongodb.uri").cloned().ok_or_else(|| {
        anyhow!("MongoDB URI is required. Please provide it using --mongodb.uri or MONGODB_URI.")
    })?;

    let connect = ConnectOptions::new(uri)
        .with_direct_connect(
            matches
                .get_one::<bool>("mongodb.direct-connect")
                .copied()
                .unwrap_or(true),
        )
        .with_connect_timeout(millis(matches, "mongodb.connect-timeout-ms")?)
        .with_socket_timeout(millis(matches, "mongodb.socket-timeout-ms")?);

    let pooling = if matches.get_flag("mongodb.global-conn-pool") {
        Pooling::Shared
    } else {
        Pooling::PerRequest
    };

    let liveness_interval = matches
        .get_one::<u64>("mongodb.liveness-interval-secs")
        .copied()
        .map(Duration::from_secs)
        .ok_or_else(|| anyhow!("--mongodb.liveness-interval-secs is required"))?;

    let telemetry_path = matches
        .get_one::<String>("web.telemetry-path")
        .cloned()
        .ok_or_else(|| anyhow!("--web.telemetry-path is required"))?;
    validate_telemetry_path(&telemetry_path)?;

    let collectors = collector_config(matches);
    info!(
        enabled = ?get_enabled_collectors(matches),
        collect_all = collectors.collect_all,
        "collectors configured"
    );

    let options = ExporterOptions::new(connect)
        .with_pooling(pooling)
        .with_liveness_interval(liveness_interval)
        .with_telemetry_path(telemetry_path)
        .with_collectors(collectors);

    Ok(Action::Run {
        port,
        listen,
        options,
    })
}

fn millis(matches: &ArgMatches, id: &str) -> Result<Duration> {
    matches
        .get_one::<u64>(id)
        .copied()
        .map(Duration::from_millis)
        .ok_or_else(|| anyhow!("--{id} is required"))
}

fn namespaces(matches: &ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|vals| {
            vals.map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[must_use]
pub fn collector_config(matches: &ArgMatches) -> CollectorConfig {
    CollectorConfig::new()
        .with_enabled(&get_enabled_collectors(matches))
        .with_collect_all(matches.get_flag("collect-all"))
        .with_compatible_mode(matches.get_flag("compatible-mode"))
        .with_discovering_mode(matches.get_flag("discovering-mode"))
        .with_index_stats_collections(namespaces(matches, "mongodb.indexstats-colls"))
        .with_coll_stats_collections(namespaces(matches, "mongodb.collstats-colls"))
}

/// Always-on collectors plus every optional one whose flags resolve to enabled.
#[must_use]
pub fn get_enabled_collectors(matches: &ArgMatches) -> Vec<String> {
    let optional = optional_collectors().filter(|name| {
        if matches.get_flag(&format!("no-collector.{name}")) {
            return false;
        }
        if matches.get_flag(&format!("collector.{name}")) {
            return true;
        }
        enabled_by_default(name)
    });

    ALWAYS_ON
        .iter()
        .copied()
        .chain(optional)
        .map(ToString::to_string)
        .collect()
}
