//! Friend graph storage.
//!
//! [`FriendStore`] is the single interface the rest of the server is written
//! against. Two backends ship: [`MemoryFriendStore`], sharded per identity,
//! and [`SqliteFriendStore`], durable on disk.
//!
//! Edges are symmetric: accepting a request creates both directions, and
//! deleting a friend removes both. Remark and DND are directional attributes
//! of one side of an edge; setting them on a missing edge does nothing.

mod memory;
mod sqlite;

pub use memory::MemoryFriendStore;
pub use sqlite::SqliteFriendStore;

use natter_common::UserId;
use std::collections::HashMap;
use thiserror::Error;

/// Errors produced by a friend store backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// SQLite error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Generic I/O error (e.g. creating the database directory).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used by every backend.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Friendship edges, pending requests and per-edge attributes.
///
/// All methods are synchronous and internally synchronized; callers never
/// hold a lock across calls. Handling or deleting something that does not
/// exist is a successful no-op.
pub trait FriendStore: Send + Sync {
    /// Records a request from `from` to `to`, replacing any earlier message
    /// for the same pair.
    fn add_request(&self, from: &UserId, to: &UserId, message: &str) -> Result<()>;

    /// Snapshot of the requests pending for `to`, keyed by sender.
    fn get_requests(&self, to: &UserId) -> Result<HashMap<UserId, String>>;

    /// Resolves the pending request from `from` to `to`.
    ///
    /// With `accept`, both directional edges are created and the request is
    /// removed in one step; otherwise only the request is removed. Without a
    /// pending request nothing changes.
    fn handle_request(&self, from: &UserId, to: &UserId, accept: bool) -> Result<()>;

    /// Friends of `uid`, in no particular order.
    fn get_friends(&self, uid: &UserId) -> Result<Vec<UserId>>;

    /// Returns `true` if `uid` has `friend` on its side of an edge.
    fn is_friend(&self, uid: &UserId, friend: &UserId) -> Result<bool>;

    /// Sets `owner`'s remark for `friend`.
    fn set_remark(&self, owner: &UserId, friend: &UserId, remark: &str) -> Result<()>;

    /// `owner`'s remark for `friend`, or `""` when unset.
    fn get_remark(&self, owner: &UserId, friend: &UserId) -> Result<String>;

    /// Sets whether `owner` mutes notifications caused by `friend`.
    fn set_dnd(&self, owner: &UserId, friend: &UserId, dnd: bool) -> Result<()>;

    /// Whether `owner` mutes notifications caused by `friend`; `false` when unset.
    fn get_dnd(&self, owner: &UserId, friend: &UserId) -> Result<bool>;

    /// Removes both directions of the edge together with their attributes.
    fn delete_friend(&self, uid: &UserId, friend: &UserId) -> Result<()>;
}

/// Behavioural checks every backend must pass.
#[cfg(test)]
pub(crate) mod conformance {
    use super::*;

    fn uid(s: &str) -> UserId {
        UserId::from(s)
    }

    pub fn request_round_trip(store: &dyn FriendStore) {
        let (a, b) = (uid("alice"), uid("bob"));
        store.add_request(&a, &b, "hi").unwrap();

        let pending = store.get_requests(&b).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending.get("alice").map(String::as_str), Some("hi"));
        assert!(store.get_requests(&a).unwrap().is_empty());

        store.handle_request(&a, &b, false).unwrap();
        assert!(!store.get_requests(&b).unwrap().contains_key("alice"));
        assert!(store.get_friends(&a).unwrap().is_empty());
        assert!(store.get_friends(&b).unwrap().is_empty());
    }

    pub fn request_upsert_overwrites_message(store: &dyn FriendStore) {
        let (a, b) = (uid("alice"), uid("bob"));
        store.add_request(&a, &b, "first").unwrap();
        store.add_request(&a, &b, "second").unwrap();

        let pending = store.get_requests(&b).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending["alice"], "second");
    }

    pub fn accept_creates_symmetric_edge(store: &dyn FriendStore) {
        let (a, b) = (uid("alice"), uid("bob"));
        store.add_request(&a, &b, "hi").unwrap();
        store.handle_request(&a, &b, true).unwrap();

        assert_eq!(store.get_friends(&a).unwrap(), vec![b.clone()]);
        assert_eq!(store.get_friends(&b).unwrap(), vec![a.clone()]);
        assert!(store.is_friend(&a, &b).unwrap());
        assert!(store.is_friend(&b, &a).unwrap());
        assert!(store.get_requests(&b).unwrap().is_empty());
    }

    pub fn handle_without_request_is_noop(store: &dyn FriendStore) {
        let (a, b) = (uid("alice"), uid("bob"));
        store.handle_request(&a, &b, true).unwrap();

        assert!(store.get_friends(&a).unwrap().is_empty());
        assert!(store.get_friends(&b).unwrap().is_empty());

        // A request in the other direction does not satisfy this one.
        store.add_request(&b, &a, "hey").unwrap();
        store.handle_request(&a, &b, true).unwrap();
        assert!(store.get_friends(&a).unwrap().is_empty());
        assert_eq!(store.get_requests(&a).unwrap().len(), 1);
    }

    pub fn attributes_are_directional(store: &dyn FriendStore) {
        let (a, b) = (uid("alice"), uid("bob"));
        store.add_request(&a, &b, "").unwrap();
        store.handle_request(&a, &b, true).unwrap();

        assert_eq!(store.get_remark(&a, &b).unwrap(), "");
        assert!(!store.get_dnd(&a, &b).unwrap());

        store.set_remark(&a, &b, "bobby").unwrap();
        store.set_dnd(&a, &b, true).unwrap();

        assert_eq!(store.get_remark(&a, &b).unwrap(), "bobby");
        assert!(store.get_dnd(&a, &b).unwrap());
        assert_eq!(store.get_remark(&b, &a).unwrap(), "");
        assert!(!store.get_dnd(&b, &a).unwrap());
    }

    pub fn attributes_on_missing_edge_are_ignored(store: &dyn FriendStore) {
        let (a, b) = (uid("alice"), uid("bob"));
        store.set_remark(&a, &b, "stranger").unwrap();
        store.set_dnd(&a, &b, true).unwrap();

        assert_eq!(store.get_remark(&a, &b).unwrap(), "");
        assert!(!store.get_dnd(&a, &b).unwrap());
        assert!(!store.is_friend(&a, &b).unwrap());
    }

    pub fn delete_removes_both_sides_and_attributes(store: &dyn FriendStore) {
        let (a, b) = (uid("alice"), uid("bob"));
        store.add_request(&a, &b, "").unwrap();
        store.handle_request(&a, &b, true).unwrap();
        store.set_remark(&a, &b, "bobby").unwrap();
        store.set_dnd(&b, &a, true).unwrap();

        store.delete_friend(&b, &a).unwrap();
        assert!(store.get_friends(&a).unwrap().is_empty());
        assert!(store.get_friends(&b).unwrap().is_empty());

        // Re-adding starts from clean attributes.
        store.add_request(&a, &b, "").unwrap();
        store.handle_request(&a, &b, true).unwrap();
        assert_eq!(store.get_remark(&a, &b).unwrap(), "");
        assert!(!store.get_dnd(&b, &a).unwrap());

        // Deleting a missing edge is fine.
        store.delete_friend(&a, &uid("carol")).unwrap();
    }

    pub fn self_request_is_accepted(store: &dyn FriendStore) {
        let a = uid("alice");
        store.add_request(&a, &a, "me").unwrap();
        store.handle_request(&a, &a, true).unwrap();
        assert_eq!(store.get_friends(&a).unwrap(), vec![a.clone()]);
        store.delete_friend(&a, &a).unwrap();
        assert!(store.get_friends(&a).unwrap().is_empty());
    }

    pub fn run_all(make: impl Fn() -> Box<dyn FriendStore>) {
        request_round_trip(make().as_ref());
        request_upsert_overwrites_message(make().as_ref());
        accept_creates_symmetric_edge(make().as_ref());
        handle_without_request_is_noop(make().as_ref());
        attributes_are_directional(make().as_ref());
        attributes_on_missing_edge_are_ignored(make().as_ref());
        delete_removes_both_sides_and_attributes(make().as_ref());
        self_request_is_accepted(make().as_ref());
    }
}
