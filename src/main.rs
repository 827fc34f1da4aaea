use anyhow::Result;
use mongodb_exporter::cli::{actions::run, start};

#[tokio::main]
async fn main() -> Result<()> {
    let (action, telemetry) = start()?;

    let result = run::handle(action).await;

    telemetry.shutdown();

    result
}
