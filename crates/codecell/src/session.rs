//! Session registry
//!
//! The only shared mutable state in the crate: a map from opaque session
//! ids to live session contexts. The map lock is short-lived and never held
//! across awaits; each session carries its own async lock so long-running
//! operations on one session never stall another.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Notify;
// tokio's Instant respects the paused test clock, unlike std's
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::runner::InteractiveSessionHandle;
use crate::sandbox::Sandbox;
use crate::terminal::TerminalSession;
use crate::types::GeneratedFile;

/// Errors from session registry operations
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session '{0}' not found")]
    NotFound(SessionId),

    #[error("session '{0}' is not a {1} session")]
    WrongKind(SessionId, &'static str),

    #[error("session '{0}' already has a run in progress")]
    Busy(SessionId),

    #[error("invalid session id '{0}'")]
    InvalidId(String),
}

/// Opaque session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct SessionId(uuid::Uuid);

impl SessionId {
    fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        uuid::Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SessionError::InvalidId(s.to_string()))
    }
}

/// A batch execution context kept alive so its generated files stay
/// downloadable after the run finishes
#[derive(Debug)]
pub struct ExecutionContext {
    pub sandbox: Sandbox,
    pub generated: Vec<GeneratedFile>,
    pub created_at: Instant,
    pub last_activity: Instant,
}

/// A running interactive program
#[derive(Debug)]
pub struct InteractiveContext {
    pub sandbox: Sandbox,
    pub handle: InteractiveSessionHandle,
    pub created_at: Instant,
    pub last_activity: Instant,
}

/// One live session of any kind
#[derive(Debug)]
pub enum SessionEntry {
    Execution(ExecutionContext),
    Interactive(InteractiveContext),
    Terminal(TerminalSession),
}

impl SessionEntry {
    /// Tear the session down, releasing every resource it holds
    pub async fn teardown(&mut self) {
        match self {
            SessionEntry::Execution(ctx) => ctx.sandbox.cleanup().await,
            SessionEntry::Interactive(ctx) => {
                ctx.handle.terminate();
                ctx.sandbox.cleanup().await;
            }
            SessionEntry::Terminal(session) => session.close(),
        }
    }

    /// Whether the sweep should reap this session
    fn is_stale(&self, idle_timeout: Duration, lifetime: Duration) -> bool {
        match self {
            SessionEntry::Execution(ctx) => {
                ctx.last_activity.elapsed() >= idle_timeout
                    || ctx.created_at.elapsed() >= lifetime
            }
            SessionEntry::Interactive(ctx) => {
                ctx.last_activity.elapsed() >= idle_timeout
                    || ctx.created_at.elapsed() >= lifetime
            }
            SessionEntry::Terminal(session) => {
                session.shell_exited()
                    || session.is_idle(idle_timeout)
                    || session.is_expired(lifetime)
            }
        }
    }
}

type SharedEntry = Arc<tokio::sync::Mutex<SessionEntry>>;

/// Registry of live sessions
///
/// Cheap to clone via `Arc`; the sweeper task holds one reference and the
/// service another.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, SharedEntry>>,
    shutdown: Notify,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return its id
    pub fn insert(&self, entry: SessionEntry) -> SessionId {
        let id = SessionId::generate();
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(id, Arc::new(tokio::sync::Mutex::new(entry)));
        debug!(%id, total = sessions.len(), "session registered");
        id
    }

    /// Look up a session.
    ///
    /// Returns a handle whose lock serializes all work on that session:
    /// holding it across an execution is what guarantees at most one active
    /// run per session.
    pub fn get(&self, id: SessionId) -> Result<SharedEntry, SessionError> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions
            .get(&id)
            .cloned()
            .ok_or(SessionError::NotFound(id))
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove a session and tear it down
    #[instrument(skip(self))]
    pub async fn remove(&self, id: SessionId) -> Result<(), SessionError> {
        let entry = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.remove(&id).ok_or(SessionError::NotFound(id))?
        };
        entry.lock().await.teardown().await;
        info!(%id, "session removed");
        Ok(())
    }

    /// Reap every stale session. Sessions busy with an operation are left
    /// for the next sweep.
    pub async fn sweep_once(&self, idle_timeout: Duration, lifetime: Duration) -> usize {
        let candidates: Vec<(SessionId, SharedEntry)> = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.iter().map(|(id, e)| (*id, Arc::clone(e))).collect()
        };

        let mut reaped = 0;
        for (id, entry) in candidates {
            let Ok(mut guard) = entry.try_lock() else {
                continue;
            };
            if !guard.is_stale(idle_timeout, lifetime) {
                continue;
            }
            guard.teardown().await;
            drop(guard);
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.remove(&id);
            reaped += 1;
            info!(%id, "stale session reaped");
        }
        reaped
    }

    /// Run the periodic sweep until [`shutdown`](Self::shutdown) is called.
    ///
    /// On shutdown, every remaining session is torn down.
    pub async fn run_sweeper(
        self: Arc<Self>,
        interval: Duration,
        idle_timeout: Duration,
        lifetime: Duration,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so a fresh registry
        // isn't swept at startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let reaped = self.sweep_once(idle_timeout, lifetime).await;
                    if reaped > 0 {
                        debug!(reaped, "sweep finished");
                    }
                }
                _ = self.shutdown.notified() => break,
            }
        }

        self.teardown_all().await;
    }

    /// Stop the sweeper
    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }

    /// Tear down every session unconditionally
    pub async fn teardown_all(&self) {
        let drained: Vec<SharedEntry> = {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.drain().map(|(_, e)| e).collect()
        };
        if drained.is_empty() {
            return;
        }
        warn!(count = drained.len(), "tearing down remaining sessions");
        for entry in drained {
            entry.lock().await.teardown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution_entry() -> SessionEntry {
        // No container ever runs in these tests. The docker path must not
        // resolve: teardown's `docker rm` then fails at spawn, keeping it
        // free of real subprocess I/O that the paused-clock sweeper test
        // could not wait for.
        SessionEntry::Execution(ExecutionContext {
            sandbox: Sandbox::create("/nonexistent/docker").unwrap(),
            generated: Vec::new(),
            created_at: Instant::now(),
            last_activity: Instant::now(),
        })
    }

    #[tokio::test]
    async fn insert_get_remove() {
        let registry = SessionRegistry::new();
        let id = registry.insert(execution_entry());
        assert_eq!(registry.len(), 1);

        assert!(registry.get(id).is_ok());
        registry.remove(id).await.unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.get(id), Err(SessionError::NotFound(_))));
    }

    #[tokio::test]
    async fn remove_unknown_session() {
        let registry = SessionRegistry::new();
        let id = SessionId::generate();
        assert!(matches!(
            registry.remove(id).await,
            Err(SessionError::NotFound(_))
        ));
    }

    #[test]
    fn session_id_is_serializable() {
        // Ids cross the API boundary inside serialized responses
        fn assert_serialize<T: serde::Serialize>() {}
        assert_serialize::<SessionId>();
    }

    #[test]
    fn session_id_round_trip() {
        let id = SessionId::generate();
        let parsed: SessionId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn session_id_rejects_garbage() {
        assert!(matches!(
            "not-a-session".parse::<SessionId>(),
            Err(SessionError::InvalidId(_))
        ));
    }

    #[tokio::test]
    async fn sweep_reaps_idle_sessions() {
        let registry = SessionRegistry::new();
        registry.insert(execution_entry());

        // Idle timeout of zero: everything is immediately stale
        let reaped = registry
            .sweep_once(Duration::ZERO, Duration::from_secs(3600))
            .await;
        assert_eq!(reaped, 1);
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn sweep_skips_fresh_sessions() {
        let registry = SessionRegistry::new();
        registry.insert(execution_entry());

        let reaped = registry
            .sweep_once(Duration::from_secs(600), Duration::from_secs(3600))
            .await;
        assert_eq!(reaped, 0);
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn sweep_skips_busy_sessions() {
        let registry = SessionRegistry::new();
        let id = registry.insert(execution_entry());

        let entry = registry.get(id).unwrap();
        let _busy = entry.lock().await;

        let reaped = registry
            .sweep_once(Duration::ZERO, Duration::ZERO)
            .await;
        assert_eq!(reaped, 0);
        assert_eq!(registry.len(), 1);
    }

    /// Give background tasks room to run teardown I/O under the paused clock
    async fn settle() {
        for _ in 0..20 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_reaps_on_schedule() {
        let registry = Arc::new(SessionRegistry::new());
        registry.insert(execution_entry());

        let sweeper = tokio::spawn(Arc::clone(&registry).run_sweeper(
            Duration::from_secs(300),
            Duration::from_secs(600),
            Duration::from_secs(1800),
        ));

        // Before the idle timeout nothing is reaped
        tokio::time::advance(Duration::from_secs(400)).await;
        settle().await;
        assert_eq!(registry.len(), 1);

        // Past the idle timeout the next tick reaps it
        tokio::time::advance(Duration::from_secs(400)).await;
        settle().await;
        assert!(registry.is_empty());

        registry.shutdown();
        sweeper.await.unwrap();
    }

    #[tokio::test]
    async fn teardown_all_drains_registry() {
        let registry = SessionRegistry::new();
        registry.insert(execution_entry());
        registry.insert(execution_entry());

        registry.teardown_all().await;
        assert!(registry.is_empty());
    }
}
