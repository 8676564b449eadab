//! Session manager for coordinating multiple serial sessions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::info;

use serial_mcp_core::{Error, Result, ServerConfig, SessionId, SessionInfo};
use serial_mcp_port::PortDiscovery;

use crate::controller::{SessionController, SessionOptions};
use crate::reconnect::{Scheduler, TokioScheduler};

/// Configuration for session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionManagerConfig {
    /// Maximum number of concurrent sessions
    pub max_sessions: usize,

    /// Settings for sessions created without explicit options
    pub defaults: SessionOptions,
}

impl Default for SessionManagerConfig {
    fn default() -> Self {
        Self {
            max_sessions: 10,
            defaults: SessionOptions::default(),
        }
    }
}

impl From<&ServerConfig> for SessionManagerConfig {
    fn from(config: &ServerConfig) -> Self {
        Self {
            max_sessions: config.server.max_sessions,
            defaults: SessionOptions::from(config),
        }
    }
}

/// Registry of independent sessions.
///
/// Every session owns its own port, decoder, log and reconnect timer; the
/// manager only shares the port discovery between them.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, SessionController>>,
    discovery: Arc<dyn PortDiscovery>,
    scheduler: Arc<dyn Scheduler>,
    config: SessionManagerConfig,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.session_count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a new session manager.
    pub fn new(discovery: Arc<dyn PortDiscovery>, config: SessionManagerConfig) -> Self {
        Self::with_scheduler(discovery, Arc::new(TokioScheduler), config)
    }

    /// Create a session manager whose sessions use `scheduler` for reconnects.
    pub fn with_scheduler(
        discovery: Arc<dyn PortDiscovery>,
        scheduler: Arc<dyn Scheduler>,
        config: SessionManagerConfig,
    ) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            discovery,
            scheduler,
            config,
        }
    }

    /// Port discovery shared by all sessions.
    pub fn discovery(&self) -> &Arc<dyn PortDiscovery> {
        &self.discovery
    }

    /// Settings applied to sessions created without explicit options.
    pub fn defaults(&self) -> &SessionOptions {
        &self.config.defaults
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<SessionId, SessionController>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<SessionId, SessionController>> {
        self.sessions.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Create a new disconnected session.
    pub fn create_session(&self, options: Option<SessionOptions>) -> Result<SessionController> {
        let mut sessions = self.write();
        if sessions.len() >= self.config.max_sessions {
            return Err(Error::SessionLimitReached(self.config.max_sessions));
        }

        let session = SessionController::with_scheduler(
            Arc::clone(&self.discovery),
            Arc::clone(&self.scheduler),
            options.unwrap_or_else(|| self.config.defaults.clone()),
        );
        sessions.insert(session.id(), session.clone());
        info!("Created session {}", session.id());
        Ok(session)
    }

    /// Get a session by ID.
    pub fn get_session(&self, session_id: &SessionId) -> Result<SessionController> {
        self.read()
            .get(session_id)
            .cloned()
            .ok_or(Error::SessionNotFound(*session_id))
    }

    /// List all sessions.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        self.read().values().map(SessionController::info).collect()
    }

    /// Disconnect a session and remove it.
    pub async fn close_session(&self, session_id: &SessionId) -> Result<()> {
        let session = self
            .write()
            .remove(session_id)
            .ok_or(Error::SessionNotFound(*session_id))?;
        session.disconnect().await?;
        info!("Closed session {}", session_id);
        Ok(())
    }

    /// Close all sessions.
    pub async fn close_all(&self) -> Result<()> {
        let sessions: Vec<SessionController> = self.write().drain().map(|(_, s)| s).collect();
        for session in sessions {
            let _ = session.disconnect().await;
        }
        Ok(())
    }

    /// Get the number of sessions.
    pub fn session_count(&self) -> usize {
        self.read().len()
    }
}
