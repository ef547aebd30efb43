//! Session table — the live sessions of a server.
//!
//! The [`SessionTable`] is shared between the accept loop and every
//! connection task. It hands out session IDs and records who holds them, so
//! an ID is never assigned twice while its session is alive.

use crate::SessionId;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

/// A live session as seen by the server.
#[derive(Debug, Clone)]
pub struct SessionEntry {
    /// Session ID assigned during the handshake.
    pub session_id: SessionId,
    /// Remote address of the connection.
    pub peer_addr: SocketAddr,
    /// When the connection was accepted.
    pub connected_at: DateTime<Utc>,
}

/// Thread-safe table of live sessions.
#[derive(Debug, Clone, Default)]
pub struct SessionTable {
    sessions: Arc<RwLock<HashMap<SessionId, SessionEntry>>>,
}

impl SessionTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate a random non-zero ID that no live session holds and record
    /// `peer_addr` under it.
    pub fn reserve(&self, peer_addr: SocketAddr) -> SessionId {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        let mut rng = rand::thread_rng();
        let session_id = loop {
            let candidate: SessionId = rng.gen();
            if candidate != 0 && !sessions.contains_key(&candidate) {
                break candidate;
            }
        };
        sessions.insert(
            session_id,
            SessionEntry {
                session_id,
                peer_addr,
                connected_at: Utc::now(),
            },
        );
        session_id
    }

    /// Forget a session once its connection has ended.
    pub fn remove(&self, session_id: SessionId) -> Option<SessionEntry> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        sessions.remove(&session_id)
    }

    /// Snapshot of one session.
    pub fn get(&self, session_id: SessionId) -> Option<SessionEntry> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.get(&session_id).cloned()
    }

    /// Snapshot of all live sessions, oldest first.
    pub fn all(&self) -> Vec<SessionEntry> {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        let mut entries: Vec<_> = sessions.values().cloned().collect();
        entries.sort_by_key(|e| e.connected_at);
        entries
    }

    /// Number of live sessions.
    pub fn count(&self) -> usize {
        let sessions = self.sessions.read().unwrap_or_else(|e| e.into_inner());
        sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_reserve_and_get() {
        let table = SessionTable::new();
        let id = table.reserve(addr(4000));
        assert_ne!(id, 0);

        let entry = table.get(id).unwrap();
        assert_eq!(entry.session_id, id);
        assert_eq!(entry.peer_addr, addr(4000));
        assert_eq!(table.count(), 1);
    }

    #[test]
    fn test_ids_are_unique() {
        let table = SessionTable::new();
        let mut ids: Vec<_> = (0..100).map(|i| table.reserve(addr(4000 + i))).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 100);
        assert_eq!(table.all().len(), 100);
    }

    #[test]
    fn test_remove() {
        let table = SessionTable::new();
        let id = table.reserve(addr(4000));
        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert!(table.get(id).is_none());
        assert_eq!(table.count(), 0);
    }

    #[test]
    fn test_clones_share_state() {
        let table = SessionTable::new();
        let shared = table.clone();
        let id = table.reserve(addr(4000));
        assert!(shared.get(id).is_some());
    }
}
