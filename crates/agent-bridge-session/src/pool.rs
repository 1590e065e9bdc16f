//! Shared transport sessions keyed by conversation.
//!
//! Concurrent exchanges on one conversation share a single session. A session
//! lives as long as at least one `SessionLease` for it exists and is closed
//! when the last lease is dropped.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use agent_bridge_core::{Connector, ConversationId, Session, SessionParams, TransportError};
use tokio::sync::Mutex as AsyncMutex;
use tracing::debug;

struct PoolEntry {
    generation: u64,
    session: Arc<dyn Session>,
    exchange_lock: Arc<AsyncMutex<()>>,
    leases: usize,
}

#[derive(Default)]
struct PoolState {
    entries: HashMap<ConversationId, PoolEntry>,
    next_generation: u64,
}

fn lock_state(state: &Mutex<PoolState>) -> MutexGuard<'_, PoolState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Pool of open sessions.
pub struct SessionPool {
    connector: Arc<dyn Connector>,
    state: Arc<Mutex<PoolState>>,
}

impl SessionPool {
    #[must_use]
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            state: Arc::new(Mutex::new(PoolState::default())),
        }
    }

    /// Lease the session for a conversation, opening one if none is live.
    ///
    /// # Errors
    /// Returns error if a new session cannot be opened.
    pub fn acquire(&self, params: &SessionParams) -> Result<SessionLease, TransportError> {
        let mut state = lock_state(&self.state);

        if let Some(entry) = state.entries.get_mut(&params.conversation_id) {
            if !entry.session.is_closed() {
                entry.leases += 1;
                debug!(
                    conversation_id = %params.conversation_id,
                    leases = entry.leases,
                    "Reusing session"
                );
                return Ok(SessionLease {
                    conversation_id: params.conversation_id.clone(),
                    generation: entry.generation,
                    session: Arc::clone(&entry.session),
                    exchange_lock: Arc::clone(&entry.exchange_lock),
                    state: Arc::clone(&self.state),
                });
            }
        }

        let session = self.connector.open(params)?;
        let generation = state.next_generation;
        state.next_generation += 1;

        let entry = PoolEntry {
            generation,
            session: Arc::clone(&session),
            exchange_lock: Arc::new(AsyncMutex::new(())),
            leases: 1,
        };
        let exchange_lock = Arc::clone(&entry.exchange_lock);

        if let Some(stale) = state.entries.insert(params.conversation_id.clone(), entry) {
            debug!(conversation_id = %params.conversation_id, "Replaced closed session");
            stale.session.close();
        }
        debug!(conversation_id = %params.conversation_id, "Opened session");

        Ok(SessionLease {
            conversation_id: params.conversation_id.clone(),
            generation,
            session,
            exchange_lock,
            state: Arc::clone(&self.state),
        })
    }

    /// Number of pooled sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        lock_state(&self.state).entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Shared use of one pooled session.
pub struct SessionLease {
    conversation_id: ConversationId,
    generation: u64,
    session: Arc<dyn Session>,
    exchange_lock: Arc<AsyncMutex<()>>,
    state: Arc<Mutex<PoolState>>,
}

impl SessionLease {
    #[must_use]
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    #[must_use]
    pub const fn conversation_id(&self) -> &ConversationId {
        &self.conversation_id
    }

    /// Wait for exclusive use of the session for one exchange.
    pub async fn lock_exchange(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.exchange_lock.lock().await
    }
}

impl Drop for SessionLease {
    fn drop(&mut self) {
        let mut state = lock_state(&self.state);
        let idle = match state.entries.get_mut(&self.conversation_id) {
            Some(entry) if entry.generation == self.generation => {
                entry.leases -= 1;
                entry.leases == 0
            }
            _ => false,
        };
        if !idle {
            return;
        }
        if let Some(entry) = state.entries.remove(&self.conversation_id) {
            drop(state);
            entry.session.close();
            debug!(conversation_id = %self.conversation_id, "Closed idle session");
        }
    }
}

#[cfg(test)]
mod tests {
    use agent_bridge_core::testing::FakeConnector;
    use secrecy::SecretString;

    use super::*;

    fn params(id: &str) -> SessionParams {
        SessionParams::new(
            "ws://localhost:3000",
            ConversationId::new(id),
            Arc::new(SecretString::from("token".to_string())),
        )
    }

    fn pool() -> (Arc<FakeConnector>, SessionPool) {
        let connector = Arc::new(FakeConnector::with_events(vec![]));
        let pool = SessionPool::new(Arc::clone(&connector) as Arc<dyn Connector>);
        (connector, pool)
    }

    #[test]
    fn test_same_conversation_shares_session() {
        let (connector, pool) = pool();
        let first = pool.acquire(&params("c1")).unwrap();
        let second = pool.acquire(&params("c1")).unwrap();

        assert_eq!(connector.open_count(), 1);
        assert!(Arc::ptr_eq(first.session(), second.session()));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_conversations_are_isolated() {
        let (connector, pool) = pool();
        let _a = pool.acquire(&params("a")).unwrap();
        let _b = pool.acquire(&params("b")).unwrap();

        assert_eq!(connector.open_count(), 2);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_last_lease_closes_session() {
        let (connector, pool) = pool();
        let first = pool.acquire(&params("c1")).unwrap();
        let second = pool.acquire(&params("c1")).unwrap();
        let session = connector.sessions().remove(0);

        drop(first);
        assert!(!session.is_closed());
        assert_eq!(pool.len(), 1);

        drop(second);
        assert!(session.is_closed());
        assert!(pool.is_empty());
    }

    #[test]
    fn test_closed_session_is_replaced() {
        let (connector, pool) = pool();
        let stale = pool.acquire(&params("c1")).unwrap();
        stale.session().close();

        let fresh = pool.acquire(&params("c1")).unwrap();
        assert_eq!(connector.open_count(), 2);
        assert!(!fresh.session().is_closed());

        drop(stale);
        assert_eq!(pool.len(), 1);
        assert!(!fresh.session().is_closed());

        drop(fresh);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_open_failure_leaves_pool_empty() {
        let connector = Arc::new(FakeConnector::failing(TransportError::InvalidUrl(
            "bad".to_string(),
        )));
        let pool = SessionPool::new(connector);

        assert!(matches!(
            pool.acquire(&params("c1")),
            Err(TransportError::InvalidUrl(_))
        ));
        assert!(pool.is_empty());
    }
}
