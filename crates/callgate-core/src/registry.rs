//! Session registry
//!
//! Concurrent `CallId -> Session` store and the single source of truth for
//! whether a call is still live. A session is present exactly while its
//! transport is open: [`SessionRegistry::terminate`] removes the entry and
//! closes the transport as one logical step.
//!
//! Removal by session handle is identity-checked, so a late terminal event for
//! an older session never evicts a newer session registered under the same id.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::join_all;
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::{GatewayError, Result};
use crate::session::Session;
use crate::types::CallId;

/// Shared registry of in-flight calls; clones share the same map
#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<CallId, Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, failing if its id is already live
    pub fn insert(&self, session: Arc<Session>) -> Result<()> {
        match self.sessions.entry(session.id().clone()) {
            Entry::Occupied(entry) => Err(GatewayError::duplicate_call(entry.key().as_str())),
            Entry::Vacant(entry) => {
                debug!("Registered session {}", session.id());
                entry.insert(session);
                Ok(())
            }
        }
    }

    pub fn get(&self, call_id: &CallId) -> Option<Arc<Session>> {
        self.sessions.get(call_id).map(|s| Arc::clone(s.value()))
    }

    pub fn contains(&self, call_id: &CallId) -> bool {
        self.sessions.contains_key(call_id)
    }

    /// Remove and close the session for `call_id`; true if it was present
    pub async fn remove(&self, call_id: &CallId) -> bool {
        self.terminate(call_id, "removed").await
    }

    /// Remove the session for `call_id` and close it.
    ///
    /// Returns true for the caller that removed it. Absent ids are a no-op.
    pub async fn terminate(&self, call_id: &CallId, reason: &str) -> bool {
        let Some((_, session)) = self.sessions.remove(call_id) else {
            return false;
        };
        info!("Terminating call {} ({})", call_id, reason);
        session.close(reason).await;
        true
    }

    /// Remove and close `session` only if it is still the registered instance.
    ///
    /// The session is closed either way; the return value reports whether
    /// this call removed it from the map.
    pub async fn terminate_session(&self, session: &Arc<Session>, reason: &str) -> bool {
        let removed = self
            .sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, session))
            .is_some();
        if removed {
            info!("Terminating call {} ({})", session.id(), reason);
        }
        session.close(reason).await;
        removed
    }

    /// Visit a snapshot of every live session
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Session>)) {
        for session in self.sessions() {
            f(&session);
        }
    }

    /// Snapshot of the live sessions
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.iter().map(|e| Arc::clone(e.value())).collect()
    }

    pub fn ids(&self) -> Vec<CallId> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Terminate every live session concurrently, returning how many were closed
    pub async fn drain(&self, reason: &str) -> usize {
        let sessions = self.sessions();
        let closed = join_all(sessions.iter().map(|s| self.terminate_session(s, reason)))
            .await
            .into_iter()
            .filter(|removed| *removed)
            .count();
        if closed > 0 {
            info!("Drained {} sessions ({})", closed, reason);
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionSlot;
    use crate::session::SessionState;
    use crate::transport::TransportFactory;
    use crate::transport::loopback::{LoopbackOptions, LoopbackTransportFactory};
    use crate::types::CallDirection;
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    async fn session(factory: &LoopbackTransportFactory, id: &str) -> Arc<Session> {
        let transport = factory.create(&CallId::from(id)).await.unwrap();
        Arc::new(Session::new(
            CallId::from(id),
            CallDirection::Offer,
            transport,
            DecisionSlot::closed(),
            Duration::from_secs(45),
        ))
    }

    #[tokio::test]
    async fn test_insert_rejects_live_duplicate() {
        let factory = LoopbackTransportFactory::new(LoopbackOptions::default());
        let registry = SessionRegistry::new();

        assert_ok!(registry.insert(session(&factory, "dup").await));
        let err = assert_err!(registry.insert(session(&factory, "dup").await));
        assert!(matches!(err, GatewayError::DuplicateCall { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_terminate_closes_once() {
        let factory = LoopbackTransportFactory::new(LoopbackOptions::default());
        let registry = SessionRegistry::new();
        let s = session(&factory, "t1").await;
        registry.insert(Arc::clone(&s)).unwrap();

        assert!(registry.terminate(&CallId::from("t1"), "test").await);
        assert!(!registry.terminate(&CallId::from("t1"), "test").await);
        assert!(!registry.contains(&CallId::from("t1")));
        assert_eq!(s.state(), SessionState::Closed);
        assert_eq!(factory.transport(&CallId::from("t1")).unwrap().close_count(), 1);
    }

    #[tokio::test]
    async fn test_remove_closes_transport() {
        let factory = LoopbackTransportFactory::new(LoopbackOptions::default());
        let registry = SessionRegistry::new();
        let s = session(&factory, "r1").await;
        registry.insert(Arc::clone(&s)).unwrap();

        assert!(registry.remove(&CallId::from("r1")).await);
        assert!(!registry.remove(&CallId::from("r1")).await);

        let transport = factory.transport(&CallId::from("r1")).unwrap();
        assert!(transport.is_closed());
        assert_eq!(transport.close_count(), 1);
        assert_eq!(s.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_stale_handle_does_not_evict_newer_session() {
        let factory = LoopbackTransportFactory::new(LoopbackOptions::default());
        let registry = SessionRegistry::new();

        let old = session(&factory, "reuse").await;
        registry.insert(Arc::clone(&old)).unwrap();
        assert!(registry.terminate_session(&old, "first call ended").await);

        let newer = session(&factory, "reuse").await;
        registry.insert(Arc::clone(&newer)).unwrap();

        assert!(!registry.terminate_session(&old, "late event").await);
        let live = registry.get(&CallId::from("reuse")).unwrap();
        assert!(Arc::ptr_eq(&live, &newer));
        assert_eq!(newer.state(), SessionState::Negotiating);
    }

    #[tokio::test]
    async fn test_drain_closes_everything() {
        let factory = LoopbackTransportFactory::new(LoopbackOptions::default());
        let registry = SessionRegistry::new();
        for id in ["a", "b", "c"] {
            registry.insert(session(&factory, id).await).unwrap();
        }

        let mut seen = 0;
        registry.for_each(|_| seen += 1);
        assert_eq!(seen, 3);
        assert_eq!(registry.ids().len(), 3);

        assert_eq!(registry.drain("shutdown").await, 3);
        assert!(registry.is_empty());
        assert!(factory.transport(&CallId::from("b")).unwrap().is_closed());
    }
}
