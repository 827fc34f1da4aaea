use mongodb_exporter::collectors::config::CollectorConfig;
use mongodb_exporter::exporter::options::{ConnectOptions, ExporterOptions};
use std::env;
use std::net::TcpListener;
use std::time::Duration;
use tokio::time::sleep;

/// A port nothing listens on, so every connection attempt is refused quickly.
pub const UNREACHABLE_URI: &str = "mongodb://127.0.0.1:1/admin";

fn uri_from_env(var: &str) -> Option<String> {
    env::var(var).ok().filter(|uri| !uri.is_empty())
}

/// Standalone (or any) server under test, `None` when live tests should skip.
#[allow(dead_code)]
pub fn test_uri() -> Option<String> {
    uri_from_env("MONGODB_EXPORTER_TEST_URI")
}

/// Replica set member under test.
#[allow(dead_code)]
pub fn test_rs_uri() -> Option<String> {
    uri_from_env("MONGODB_EXPORTER_TEST_RS_URI")
}

/// Query router under test.
#[allow(dead_code)]
pub fn test_mongos_uri() -> Option<String> {
    uri_from_env("MONGODB_EXPORTER_TEST_MONGOS_URI")
}

/// Options with short timeouts so unreachable servers fail fast.
#[allow(dead_code)]
pub fn options(uri: &str) -> ExporterOptions {
    ExporterOptions::new(
        ConnectOptions::new(uri)
            .with_connect_timeout(Duration::from_millis(500))
            .with_socket_timeout(Duration::from_secs(2)),
    )
    .with_liveness_interval(Duration::from_millis(200))
    .with_collectors(CollectorConfig::new().with_enabled(&["general".to_string()]))
}

/// Get an available port for testing
#[allow(dead_code)]
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to ephemeral port")
        .local_addr()
        .expect("Failed to get local address")
        .port()
}

/// Build test URL for HTTP requests
#[allow(dead_code)]
pub fn get_test_url(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

/// Wait for server to be ready
#[allow(dead_code)]
pub async fn wait_for_server(port: u16, max_attempts: u32) -> bool {
    for _ in 0..max_attempts {
        if tokio::net::TcpStream::connect(format!("127.0.0.1:{port}"))
            .await
            .is_ok()
        {
            return true;
        }
        sleep(Duration::from_millis(100)).await;
    }
    false
}

/// Value of the first sample of `name` in a text exposition, labels ignored.
#[allow(dead_code)]
pub fn sample(body: &str, name: &str) -> Option<f64> {
    body.lines()
        .filter(|line| !line.starts_with('#'))
        .find_map(|line| {
            let (series, value) = line.rsplit_once(' ')?;
            let metric = series.split('{').next()?;
            (metric == name).then(|| value.trim().parse().ok())?
        })
}
