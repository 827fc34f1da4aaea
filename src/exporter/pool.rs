//! Connection lifetime strategies behind one `acquire`/`release` contract.
//!
//! - Shared: one connection per process, installed by a supervisor task and
//!   read concurrently by every scrape. Request handlers cannot replace it.
//! - Per-request: every scrape connects, resolves topology and labels, and
//!   closes the connection when it releases the lease.

use crate::collectors::context::ScrapeContext;
use crate::exporter::connection::{self, Connection};
use crate::exporter::labels::{LabelsGetter, TopologyLabels};
use crate::exporter::options::{ConnectOptions, Pooling};
use crate::exporter::topology::{self, Topology};
use anyhow::{Result, anyhow};
use arc_swap::ArcSwapOption;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// Connection plus what was learned about the server behind it.
pub struct Session {
    connection: Connection,
    topology: Topology,
    labels: Arc<dyn LabelsGetter>,
}

impl Session {
    /// Resolve topology and seed labels for a fresh connection.
    ///
    /// A failed classification degrades to [`Topology::unknown`] so that
    /// role-gated collectors stay out of the registry.
    pub async fn establish(connection: Connection, ctx: &ScrapeContext) -> Self {
        let topology = match topology::resolve(&connection, ctx).await {
            Ok(topology) => topology,
            Err(e) => {
                warn!(target = %connection.target(), error = %e, "cannot resolve topology; excluding role-specific collectors");
                Topology::unknown()
            }
        };
        let labels = Arc::new(TopologyLabels::from_topology(connection.clone(), &topology));

        Self {
            connection,
            topology,
            labels,
        }
    }

    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    #[must_use]
    pub const fn topology(&self) -> &Topology {
        &self.topology
    }

    #[must_use]
    pub fn labels(&self) -> Arc<dyn LabelsGetter> {
        Arc::clone(&self.labels)
    }
}

/// Counts connections owned by in-flight scrapes.
struct LeaseGuard(Arc<AtomicUsize>);

impl LeaseGuard {
    fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Scoped access to a session for one scrape.
///
/// Dropping an ephemeral lease without calling [`Lease::release`] (for example
/// when the client disconnects mid-scrape) drops its client, and the driver
/// closes the pool in the background.
pub struct Lease {
    session: Arc<Session>,
    ephemeral: Option<LeaseGuard>,
}

impl Lease {
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// End the scrape's use of the connection. Ephemeral connections are closed.
    pub async fn release(self) {
        let Self { session, ephemeral } = self;
        if let Some(guard) = ephemeral {
            session.connection().clone().close().await;
            drop(guard);
        }
    }
}

/// What the supervisor does after pinging the installed session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Repair {
    Keep,
    /// Alive but classification failed when it was established.
    Reresolve,
    Reconnect,
}

const fn repair_for(alive: bool, topology: &Topology) -> Repair {
    if !alive {
        Repair::Reconnect
    } else if topology.role.is_known() {
        Repair::Keep
    } else {
        Repair::Reresolve
    }
}

/// Process-scoped shared connection.
pub struct SharedConnection {
    options: ConnectOptions,
    slot: ArcSwapOption<Session>,
    writer: Mutex<()>,
}

impl SharedConnection {
    fn new(options: ConnectOptions) -> Self {
        Self {
            options,
            slot: ArcSwapOption::empty(),
            writer: Mutex::new(()),
        }
    }

    fn current(&self) -> Option<Arc<Session>> {
        self.slot.load_full()
    }

    /// Connect and install a new session, closing the one it replaces.
    #[instrument(skip(self), level = "info", err)]
    async fn reconnect(&self) -> Result<()> {
        let _writer = self.writer.lock().await;

        let conn = connection::connect(&self.options).await?;
        let ctx = ScrapeContext::new(self.options.socket_timeout);
        let session = Arc::new(Session::establish(conn, &ctx).await);

        info!(
            target = %session.connection().target(),
            role = %session.topology().role,
            "shared connection established"
        );

        if let Some(previous) = self.slot.swap(Some(session)) {
            // In-flight scrapes keep their own `Arc<Session>`; the driver
            // fails their remaining operations once the client is shut down.
            previous.connection().clone().close().await;
        }

        Ok(())
    }

    /// Ping the installed session; reconnect when it is missing or dead and
    /// re-resolve its topology while that is still unknown.
    async fn check(&self) {
        let ctx = ScrapeContext::new(self.options.socket_timeout);

        let Some(session) = self.current() else {
            if let Err(e) = self.reconnect().await {
                warn!(error = %e, "shared connection not established; will retry");
            }
            return;
        };

        let ping = session.connection().ping(&ctx).await;
        if let Err(e) = &ping {
            warn!(error = %e, "shared connection failed liveness probe; reconnecting");
        }

        match repair_for(ping.is_ok(), session.topology()) {
            Repair::Keep => {
                if let Err(e) = session.labels.load_labels(&ctx).await {
                    debug!(error = %e, "cannot refresh base labels; keeping cached ones");
                }
            }
            Repair::Reresolve => self.reresolve(&session).await,
            Repair::Reconnect => {
                if let Err(e) = self.reconnect().await {
                    warn!(error = %e, "reconnect failed; will retry");
                }
            }
        }
    }

    /// Resolve the topology again on the same connection and install the
    /// result when it is known.
    async fn reresolve(&self, stale: &Arc<Session>) {
        let _writer = self.writer.lock().await;
        if !self.current().is_some_and(|current| Arc::ptr_eq(&current, stale)) {
            return;
        }

        let ctx = ScrapeContext::new(self.options.socket_timeout);
        let session = Session::establish(stale.connection().clone(), &ctx).await;
        if session.topology().role.is_known() {
            info!(role = %session.topology().role, "shared connection topology resolved");
            self.slot.store(Some(Arc::new(session)));
        }
    }

    /// Keep the shared session alive until the task is aborted.
    async fn supervise(self: Arc<Self>, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick fires immediately and `start` has just tried to connect.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            self.check().await;
        }
    }

    async fn close(&self) {
        let _writer = self.writer.lock().await;
        if let Some(session) = self.slot.swap(None) {
            session.connection().clone().close().await;
        }
    }
}

enum Strategy {
    Shared(Arc<SharedConnection>),
    PerRequest(ConnectOptions),
}

/// The strategy object the scrape orchestrator acquires connections from.
pub struct ConnectionPool {
    strategy: Strategy,
    open_leases: Arc<AtomicUsize>,
    supervisor: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Build the pool for `pooling`.
    ///
    /// In shared mode this makes the first connection attempt before returning
    /// and spawns the supervisor that retries and probes every `liveness_interval`.
    /// A failed first attempt is logged, not returned.
    pub async fn start(options: ConnectOptions, pooling: Pooling, liveness_interval: Duration) -> Self {
        let strategy = match pooling {
            Pooling::PerRequest => Strategy::PerRequest(options),
            Pooling::Shared => {
                let shared = Arc::new(SharedConnection::new(options));
                if let Err(e) = shared.reconnect().await {
                    warn!(error = %e, "initial shared connection failed; will retry");
                }
                Strategy::Shared(shared)
            }
        };

        let pool = Self {
            strategy,
            open_leases: Arc::new(AtomicUsize::new(0)),
            supervisor: std::sync::Mutex::new(None),
        };

        if let Strategy::Shared(shared) = &pool.strategy {
            let task = tokio::spawn(Arc::clone(shared).supervise(liveness_interval));
            pool.set_supervisor(task);
        }

        pool
    }

    fn set_supervisor(&self, task: tokio::task::JoinHandle<()>) {
        let mut supervisor = match self.supervisor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *supervisor = Some(task);
    }

    #[must_use]
    pub const fn pooling(&self) -> Pooling {
        match self.strategy {
            Strategy::Shared(_) => Pooling::Shared,
            Strategy::PerRequest(_) => Pooling::PerRequest,
        }
    }

    /// Acquire a session for one scrape.
    ///
    /// # Errors
    ///
    /// Returns an error if no shared session is installed yet, or if the
    /// per-request connection cannot be established.
    pub async fn acquire(&self, ctx: &ScrapeContext) -> Result<Lease> {
        match &self.strategy {
            Strategy::Shared(shared) => shared
                .current()
                .map(|session| Lease {
                    session,
                    ephemeral: None,
                })
                .ok_or_else(|| anyhow!("shared connection is not established")),
            Strategy::PerRequest(options) => {
                let guard = LeaseGuard::new(&self.open_leases);
                let conn = connection::connect(options).await?;
                let session = Session::establish(conn, ctx).await;
                Ok(Lease {
                    session: Arc::new(session),
                    ephemeral: Some(guard),
                })
            }
        }
    }

    /// Connections currently owned by in-flight scrapes.
    #[must_use]
    pub fn open_leases(&self) -> usize {
        self.open_leases.load(Ordering::SeqCst)
    }

    /// Whether a process-wide shared connection is installed.
    #[must_use]
    pub fn has_shared_connection(&self) -> bool {
        match &self.strategy {
            Strategy::Shared(shared) => shared.current().is_some(),
            Strategy::PerRequest(_) => false,
        }
    }

    /// Stop the supervisor and close the shared connection, if any.
    pub async fn close(&self) {
        let task = match self.supervisor.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(task) = task {
            task.abort();
        }

        if let Strategy::Shared(shared) = &self.strategy {
            shared.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable() -> ConnectOptions {
        ConnectOptions::new("mongodb://127.0.0.1:1/admin")
            .with_connect_timeout(Duration::from_millis(200))
            .with_socket_timeout(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_per_request_failure_leaves_no_lease() {
        let pool = ConnectionPool::start(unreachable(), Pooling::PerRequest, Duration::from_secs(60)).await;
        let ctx = ScrapeContext::new(Duration::from_millis(500));

        assert!(pool.acquire(&ctx).await.is_err());
        assert_eq!(pool.open_leases(), 0);
        assert!(!pool.has_shared_connection());
        assert_eq!(pool.pooling(), Pooling::PerRequest);
    }

    #[tokio::test]
    async fn test_shared_unreachable_starts_without_connection() {
        let pool = ConnectionPool::start(unreachable(), Pooling::Shared, Duration::from_secs(60)).await;
        let ctx = ScrapeContext::new(Duration::from_millis(500));

        assert!(!pool.has_shared_connection());
        assert!(pool.acquire(&ctx).await.is_err());
        assert_eq!(pool.pooling(), Pooling::Shared);

        pool.close().await;
    }

    #[tokio::test]
    async fn test_ephemeral_lease_is_counted_until_released() -> Result<()> {
        let pool = ConnectionPool::start(unreachable(), Pooling::PerRequest, Duration::from_secs(60)).await;
        let conn = Connection::lazy(&unreachable()).await?;
        let lease = Lease {
            session: Arc::new(Session {
                connection: conn,
                topology: Topology::unknown(),
                labels: Arc::new(crate::exporter::labels::StaticLabels::default()),
            }),
            ephemeral: Some(LeaseGuard::new(&pool.open_leases)),
        };

        assert_eq!(pool.open_leases(), 1);
        lease.release().await;
        assert_eq!(pool.open_leases(), 0);
        Ok(())
    }

    fn unknown_session(conn: Connection) -> Arc<Session> {
        Arc::new(Session {
            connection: conn,
            topology: Topology::unknown(),
            labels: Arc::new(crate::exporter::labels::StaticLabels::default()),
        })
    }

    #[test]
    fn test_repair_decision() {
        let known = Topology::with_role(crate::exporter::topology::Role::Standalone);

        assert_eq!(repair_for(true, &known), Repair::Keep);
        assert_eq!(repair_for(true, &Topology::unknown()), Repair::Reresolve);
        assert_eq!(repair_for(false, &known), Repair::Reconnect);
        assert_eq!(repair_for(false, &Topology::unknown()), Repair::Reconnect);
    }

    #[tokio::test]
    async fn test_check_on_empty_slot_stays_empty() {
        let shared = SharedConnection::new(unreachable());

        shared.check().await;

        assert!(shared.current().is_none());
    }

    #[tokio::test]
    async fn test_failed_reconnect_keeps_installed_session() -> Result<()> {
        let shared = SharedConnection::new(unreachable());
        let stale = unknown_session(Connection::lazy(&unreachable()).await?);
        shared.slot.store(Some(Arc::clone(&stale)));

        shared.check().await;

        assert!(
            shared
                .current()
                .is_some_and(|current| Arc::ptr_eq(&current, &stale))
        );
        shared.close().await;
        assert!(shared.current().is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_reresolve_ignores_replaced_session() -> Result<()> {
        let shared = SharedConnection::new(unreachable());
        let stale = unknown_session(Connection::lazy(&unreachable()).await?);
        let installed = unknown_session(Connection::lazy(&unreachable()).await?);
        shared.slot.store(Some(Arc::clone(&installed)));

        shared.reresolve(&stale).await;

        assert!(
            shared
                .current()
                .is_some_and(|current| Arc::ptr_eq(&current, &installed))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_unresolvable_session_is_not_replaced() -> Result<()> {
        let shared = SharedConnection::new(unreachable());
        let stale = unknown_session(Connection::lazy(&unreachable()).await?);
        shared.slot.store(Some(Arc::clone(&stale)));

        shared.reresolve(&stale).await;

        assert!(
            shared
                .current()
                .is_some_and(|current| Arc::ptr_eq(&current, &stale))
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_supervisor_keeps_retrying() {
        let pool =
            ConnectionPool::start(unreachable(), Pooling::Shared, Duration::from_millis(50)).await;

        tokio::time::sleep(Duration::from_millis(300)).await;

        let running = match pool.supervisor.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|task| !task.is_finished()),
            Err(_) => false,
        };
        assert!(running);
        assert!(!pool.has_shared_connection());

        pool.close().await;
    }

    #[tokio::test]
    async fn test_close_clears_supervisor_and_slot() -> Result<()> {
        let pool =
            ConnectionPool::start(unreachable(), Pooling::Shared, Duration::from_secs(60)).await;
        if let Strategy::Shared(shared) = &pool.strategy {
            shared
                .slot
                .store(Some(unknown_session(Connection::lazy(&unreachable()).await?)));
        }
        assert!(pool.has_shared_connection());

        pool.close().await;

        let supervisor_gone = match pool.supervisor.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => false,
        };
        assert!(supervisor_gone);
        assert!(!pool.has_shared_connection());
        Ok(())
    }
}
