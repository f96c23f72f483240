//! Live session registry backing the admin API.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::observability::metrics;

#[derive(Debug)]
struct SessionEntry {
    peer: SocketAddr,
    tls: bool,
    opened_at_ms: u64,
    requests: AtomicU64,
    websocket: AtomicBool,
}

/// Point-in-time view of one session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: Uuid,
    pub peer: String,
    pub tls: bool,
    pub opened_at_ms: u64,
    pub requests: u64,
    pub websocket: bool,
}

#[derive(Debug, Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<DashMap<Uuid, Arc<SessionEntry>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a session; it is removed when the returned handle drops.
    pub fn register(&self, peer: SocketAddr, tls: bool) -> SessionHandle {
        let id = Uuid::new_v4();
        let opened_at_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or_default();
        let entry = Arc::new(SessionEntry {
            peer,
            tls,
            opened_at_ms,
            requests: AtomicU64::new(0),
            websocket: AtomicBool::new(false),
        });
        self.sessions.insert(id, Arc::clone(&entry));
        metrics::record_session_opened();
        SessionHandle {
            id,
            entry,
            sessions: Arc::clone(&self.sessions),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshot of every live session, oldest first.
    pub fn snapshot(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<SessionSnapshot> = self
            .sessions
            .iter()
            .map(|item| {
                let entry = item.value();
                SessionSnapshot {
                    id: *item.key(),
                    peer: entry.peer.to_string(),
                    tls: entry.tls,
                    opened_at_ms: entry.opened_at_ms,
                    requests: entry.requests.load(Ordering::Relaxed),
                    websocket: entry.websocket.load(Ordering::Relaxed),
                }
            })
            .collect();
        all.sort_by_key(|s| s.opened_at_ms);
        all
    }
}

/// Registration of one live session.
#[derive(Debug)]
pub struct SessionHandle {
    id: Uuid,
    entry: Arc<SessionEntry>,
    sessions: Arc<DashMap<Uuid, Arc<SessionEntry>>>,
}

impl SessionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.entry.peer
    }

    pub fn record_request(&self) {
        self.entry.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mark_websocket(&self) {
        self.entry.websocket.store(true, Ordering::Relaxed);
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
        metrics::record_session_closed();
    }
}
