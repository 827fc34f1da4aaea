pub mod actions;
pub mod commands;
pub mod dispatch;
pub mod telemetry;

use crate::cli::{actions::Action, telemetry::TelemetryGuard};
use anyhow::Result;

/// Parse the command line, install logging/tracing and build the action to run.
///
/// # Errors
///
/// Returns an error if telemetry cannot be initialized or the arguments are invalid.
pub fn start() -> Result<(Action, TelemetryGuard)> {
    let matches = commands::new().get_matches();

    let verbosity = matches.get_count("verbose");
    let telemetry = telemetry::init(verbosity)?;

    let action = dispatch::handler(&matches)?;

    Ok((action, telemetry))
}
