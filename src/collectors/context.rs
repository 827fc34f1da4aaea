use crate::exporter::connection::Connection;
use anyhow::{Result, anyhow};
use std::collections::HashMap;
use std::time::Duration;

/// Per-scrape execution context.
///
/// Cancellation follows the request: when axum drops the handler future every
/// query future below it is dropped too. The context adds the upper bound on a
/// single round trip so one slow command cannot hold a scrape forever.
#[derive(Clone, Debug)]
pub struct ScrapeContext {
    timeout: Duration,
}

impl ScrapeContext {
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run one driver operation under the scrape deadline.
    ///
    /// Driver errors are kept intact inside the returned `anyhow::Error` so callers
    /// can still classify them.
    ///
    /// # Errors
    ///
    /// Returns the driver error, or a timeout error when the deadline elapses first.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: IntoFuture<Output = mongodb::error::Result<T>>,
    {
        match tokio::time::timeout(self.timeout, fut.into_future()).await {
            Ok(res) => res.map_err(anyhow::Error::from),
            Err(_) => Err(anyhow!(
                "{operation} timed out after {}ms",
                self.timeout.as_millis()
            )),
        }
    }
}

/// What a connection-bound collector is tied to for the lifetime of one registry.
#[derive(Clone, Debug)]
pub struct Binding {
    connection: Connection,
    context: ScrapeContext,
    labels: HashMap<String, String>,
}

impl Binding {
    #[must_use]
    pub const fn new(
        connection: Connection,
        context: ScrapeContext,
        labels: HashMap<String, String>,
    ) -> Self {
        Self {
            connection,
            context,
            labels,
        }
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub const fn context(&self) -> &ScrapeContext {
        &self.context
    }

    #[must_use]
    pub const fn labels(&self) -> &HashMap<String, String> {
        &self.labels
    }
}
