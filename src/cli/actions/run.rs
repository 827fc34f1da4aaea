use crate::cli::actions::Action;
use crate::exporter::new;
use anyhow::Result;

/// Handle the run action
///
/// # Errors
///
/// Returns an error if the exporter fails to start
pub async fn handle(action: Action) -> Result<()> {
    match action {
        Action::Run {
            port,
            listen,
            options,
        } => {
            new(port, listen, options).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::config::CollectorConfig;
    use crate::exporter::options::{ConnectOptions, ExporterOptions};

    #[tokio::test]
    async fn test_handle_rejects_bad_listen_address() {
        let action = Action::Run {
            port: 0,
            listen: Some("not an address".to_string()),
            options: ExporterOptions::new(ConnectOptions::new("mongodb://127.0.0.1:1/admin")),
        };

        assert!(
            handle(action).await.is_err(),
            "Should fail when the listen address cannot be bound"
        );
    }

    #[tokio::test]
    async fn test_handle_rejects_bad_telemetry_path() {
        let action = Action::Run {
            port: 0,
            listen: Some("127.0.0.1".to_string()),
            options: ExporterOptions::new(ConnectOptions::new("mongodb://127.0.0.1:1/admin"))
                .with_telemetry_path("metrics"),
        };

        assert!(handle(action).await.is_err());
    }

    #[test]
    fn test_action_creation() {
        let action = Action::Run {
            port: 9216,
            listen: Some("127.0.0.1".to_string()),
            options: ExporterOptions::new(ConnectOptions::new("mongodb://localhost"))
                .with_collectors(
                    CollectorConfig::new()
                        .with_enabled(&["general".to_string(), "exporter".to_string()]),
                ),
        };

        match action {
            Action::Run {
                port,
                listen,
                options,
            } => {
                assert_eq!(port, 9216);
                assert_eq!(listen, Some("127.0.0.1".to_string()));
                assert_eq!(options.collectors.enabled_collectors.len(), 2);
                assert!(options.collectors.is_enabled("exporter"));
            }
        }
    }
}
