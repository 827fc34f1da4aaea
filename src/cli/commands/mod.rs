pub mod collectors;

use crate::built_info;
use crate::exporter::options::{
    DEFAULT_CONNECT_TIMEOUT, DEFAULT_LIVENESS_INTERVAL, DEFAULT_PORT, DEFAULT_SOCKET_TIMEOUT,
    DEFAULT_TELEMETRY_PATH,
};
use clap::{
    Arg, ArgAction, ColorChoice, Command,
    builder::styling::{AnsiColor, Effects, Styles},
};

fn long_version() -> &'static str {
    let version = built_info::GIT_COMMIT_HASH_SHORT.map_or_else(
        || env!("CARGO_PKG_VERSION").to_string(),
        |hash| format!("{} - {hash}", env!("CARGO_PKG_VERSION")),
    );
    leak(version)
}

fn leak(value: String) -> &'static str {
    Box::leak(value.into_boxed_str())
}

#[must_use]
pub fn new() -> Command {
    let styles = Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Green.on_default() | Effects::BOLD)
        .literal(AnsiColor::Blue.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Green.on_default());

    let cmd = Command::new(env!("CARGO_PKG_NAME"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .version(env!("CARGO_PKG_VERSION"))
        .long_version(long_version())
        .color(ColorChoice::Auto)
        .styles(styles)
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .help("Port to listen on")
                .env("MONGODB_EXPORTER_PORT")
                .default_value(leak(DEFAULT_PORT.to_string()))
                .value_parser(clap::value_parser!(u16)),
        )
        .arg(
            Arg::new("listen")
                .short('l')
                .long("listen")
                .help("Address to listen on; tries [::] then 0.0.0.0 when unset")
                .env("MONGODB_EXPORTER_LISTEN"),
        )
        .arg(
            Arg::new("mongodb.uri")
                .long("mongodb.uri")
                .help("MongoDB connection URI")
                .env("MONGODB_URI")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("mongodb.direct-connect")
                .long("mongodb.direct-connect")
                .help("Connect to the given host only, without discovering the rest of the deployment")
                .env("MONGODB_DIRECT_CONNECT")
                .num_args(0..=1)
                .default_value("true")
                .default_missing_value("true")
                .value_parser(clap::value_parser!(bool)),
        )
        .arg(
            Arg::new("mongodb.connect-timeout-ms")
                .long("mongodb.connect-timeout-ms")
                .help("Connection timeout in milliseconds")
                .env("MONGODB_CONNECT_TIMEOUT_MS")
                .default_value(leak(DEFAULT_CONNECT_TIMEOUT.as_millis().to_string()))
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("mongodb.socket-timeout-ms")
                .long("mongodb.socket-timeout-ms")
                .help("Upper bound for each command sent during a scrape, in milliseconds")
                .env("MONGODB_SOCKET_TIMEOUT_MS")
                .default_value(leak(DEFAULT_SOCKET_TIMEOUT.as_millis().to_string()))
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("mongodb.global-conn-pool")
                .long("mongodb.global-conn-pool")
                .help("Keep one connection for the whole process instead of one per scrape")
                .env("MONGODB_GLOBAL_CONN_POOL")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("mongodb.liveness-interval-secs")
                .long("mongodb.liveness-interval-secs")
                .help("Seconds between liveness probes of the shared connection")
                .env("MONGODB_LIVENESS_INTERVAL_SECS")
                .default_value(leak(DEFAULT_LIVENESS_INTERVAL.as_secs().to_string()))
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new("web.telemetry-path")
                .long("web.telemetry-path")
                .help("Path under which metrics are exposed")
                .env("MONGODB_EXPORTER_TELEMETRY_PATH")
                .default_value(DEFAULT_TELEMETRY_PATH),
        )
        .arg(
            Arg::new("collect-all")
                .long("collect-all")
                .help("Enable every collector the server supports")
                .env("MONGODB_EXPORTER_COLLECT_ALL")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("compatible-mode")
                .long("compatible-mode")
                .help("Also expose metrics under their legacy names")
                .env("MONGODB_EXPORTER_COMPATIBLE_MODE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("discovering-mode")
                .long("discovering-mode")
                .help("Expand database entries in collection lists to every collection")
                .env("MONGODB_EXPORTER_DISCOVERING_MODE")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("mongodb.indexstats-colls")
                .long("mongodb.indexstats-colls")
                .help("Comma separated db.collection list for index stats")
                .env("MONGODB_INDEXSTATS_COLLS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("mongodb.collstats-colls")
                .long("mongodb.collstats-colls")
                .help("Comma separated db.collection list for collection stats")
                .env("MONGODB_COLLSTATS_COLLS")
                .value_delimiter(','),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase verbosity, -vv for info, -vvvv for trace")
                .action(ArgAction::Count),
        );

    collectors::add_collectors_args(cmd)
}
