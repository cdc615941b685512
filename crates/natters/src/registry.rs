use dashmap::DashMap;
use natter_common::UserId;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique connection identifier, used to tell sessions for the same
/// identity apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    /// Allocate a fresh identifier.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "c{}", self.0)
    }
}

/// Handle held in the registry, used to send frames to a connection.
#[derive(Clone, Debug)]
pub struct ConnHandle {
    /// Bounded outbound queue drained by the connection's own task.
    pub tx: mpsc::Sender<Vec<u8>>,
    /// Identity bound to this connection.
    pub user: UserId,
    /// Identifier of the connection (used for unbind guards).
    pub conn_id: ConnId,
    evict: Arc<Notify>,
}

impl ConnHandle {
    /// Create a handle for a fresh connection.
    ///
    /// `evict` is the signal the connection task waits on to learn it was
    /// replaced by a newer session.
    #[must_use]
    pub fn new(user: UserId, tx: mpsc::Sender<Vec<u8>>, conn_id: ConnId, evict: Arc<Notify>) -> Self {
        Self {
            tx,
            user,
            conn_id,
            evict,
        }
    }

    /// Tell the owning connection that it has been replaced.
    ///
    /// The signal is latched, so a task that is not waiting yet still sees it.
    pub fn evict(&self) {
        self.evict.notify_one();
    }
}

/// Concurrent identity → connection table. At most one session per identity.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: DashMap<UserId, ConnHandle>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `handle` to its identity, returning the session it replaced.
    ///
    /// The caller decides what to do with the previous session; the server
    /// evicts it.
    #[must_use]
    pub fn bind(&self, handle: ConnHandle) -> Option<ConnHandle> {
        self.sessions.insert(handle.user.clone(), handle)
    }

    /// Look up the session currently bound to `user`.
    #[must_use]
    pub fn lookup(&self, user: &UserId) -> Option<ConnHandle> {
        self.sessions.get(user).map(|entry| entry.value().clone())
    }

    /// Remove the session for `user` only if it is still `conn_id`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn unbind(&self, user: &UserId, conn_id: ConnId) -> bool {
        self.sessions
            .remove_if(user, |_k, v| v.conn_id == conn_id)
            .is_some()
    }

    /// Returns `true` if `user` has a bound session.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.sessions.contains_key(user)
    }

    /// Number of bound sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Returns `true` if no session is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
