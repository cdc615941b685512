use super::{FriendStore, Result};
use natter_common::UserId;
use std::collections::hash_map::RandomState;
use std::collections::HashMap;
use std::hash::BuildHasher;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

const DEFAULT_SHARDS: usize = 16;

#[derive(Debug, Default, Clone)]
struct EdgeAttrs {
    remark: String,
    dnd: bool,
}

#[derive(Debug, Default)]
struct UserEntry {
    /// This user's side of each edge.
    friends: HashMap<UserId, EdgeAttrs>,
    /// Requests addressed to this user, keyed by sender.
    requests: HashMap<UserId, String>,
}

impl UserEntry {
    fn is_empty(&self) -> bool {
        self.friends.is_empty() && self.requests.is_empty()
    }
}

type Shard = HashMap<UserId, UserEntry>;

/// Drop `uid`'s entry once it holds no edges and no requests.
fn prune(shard: &mut Shard, uid: &UserId) {
    if shard.get(uid).is_some_and(UserEntry::is_empty) {
        shard.remove(uid);
    }
}

/// In-memory friend graph, sharded by user identity.
///
/// Every identity maps to one shard. Single-user operations take one shard
/// lock; operations that touch both ends of an edge take both shard locks in
/// index order, so an edge is always created and removed as a pair.
#[derive(Debug)]
pub struct MemoryFriendStore {
    shards: Vec<RwLock<Shard>>,
    hasher: RandomState,
}

/// Write guards over the shards of two identities `a` and `b`.
struct PairGuard<'a> {
    lo: RwLockWriteGuard<'a, Shard>,
    hi: Option<RwLockWriteGuard<'a, Shard>>,
    a_is_lo: bool,
}

impl PairGuard<'_> {
    fn a(&mut self) -> &mut Shard {
        match self.hi.as_mut() {
            Some(hi) if !self.a_is_lo => &mut **hi,
            _ => &mut *self.lo,
        }
    }

    fn b(&mut self) -> &mut Shard {
        match self.hi.as_mut() {
            Some(hi) if self.a_is_lo => &mut **hi,
            _ => &mut *self.lo,
        }
    }
}

impl MemoryFriendStore {
    /// Create an empty store with the default shard count.
    #[must_use]
    pub fn new() -> Self {
        Self::with_shards(DEFAULT_SHARDS)
    }

    /// Create an empty store with `n` shards (at least one).
    #[must_use]
    pub fn with_shards(n: usize) -> Self {
        Self {
            shards: (0..n.max(1)).map(|_| RwLock::new(Shard::new())).collect(),
            hasher: RandomState::new(),
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn shard_index(&self, uid: &UserId) -> usize {
        (self.hasher.hash_one(uid) as usize) % self.shards.len()
    }

    fn read(&self, uid: &UserId) -> RwLockReadGuard<'_, Shard> {
        self.shards[self.shard_index(uid)].read().unwrap_or_else(|poisoned| {
            tracing::warn!("friend store shard poisoned, using recovered data");
            poisoned.into_inner()
        })
    }

    fn write_index(&self, idx: usize) -> RwLockWriteGuard<'_, Shard> {
        self.shards[idx]
            .write()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, uid: &UserId) -> RwLockWriteGuard<'_, Shard> {
        self.write_index(self.shard_index(uid))
    }

    fn write_pair(&self, a: &UserId, b: &UserId) -> PairGuard<'_> {
        let ia = self.shard_index(a);
        let ib = self.shard_index(b);
        if ia == ib {
            return PairGuard {
                lo: self.write_index(ia),
                hi: None,
                a_is_lo: true,
            };
        }
        let (lo, hi) = (ia.min(ib), ia.max(ib));
        let lo_guard = self.write_index(lo);
        let hi_guard = self.write_index(hi);
        PairGuard {
            lo: lo_guard,
            hi: Some(hi_guard),
            a_is_lo: ia == lo,
        }
    }

    fn read_attrs<T>(
        &self,
        owner: &UserId,
        friend: &UserId,
        f: impl FnOnce(&EdgeAttrs) -> T,
    ) -> Option<T> {
        let shard = self.read(owner);
        shard
            .get(owner)
            .and_then(|entry| entry.friends.get(friend))
            .map(f)
    }

    fn update_attrs(&self, owner: &UserId, friend: &UserId, f: impl FnOnce(&mut EdgeAttrs)) {
        let mut shard = self.write(owner);
        if let Some(attrs) = shard
            .get_mut(owner)
            .and_then(|entry| entry.friends.get_mut(friend))
        {
            f(attrs);
        }
    }
}

impl Default for MemoryFriendStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FriendStore for MemoryFriendStore {
    fn add_request(&self, from: &UserId, to: &UserId, message: &str) -> Result<()> {
        let mut shard = self.write(to);
        shard
            .entry(to.clone())
            .or_default()
            .requests
            .insert(from.clone(), message.to_owned());
        Ok(())
    }

    fn get_requests(&self, to: &UserId) -> Result<HashMap<UserId, String>> {
        let shard = self.read(to);
        Ok(shard
            .get(to)
            .map(|entry| entry.requests.clone())
            .unwrap_or_default())
    }

    fn handle_request(&self, from: &UserId, to: &UserId, accept: bool) -> Result<()> {
        let mut pair = self.write_pair(from, to);
        let pending = pair
            .b()
            .get_mut(to)
            .and_then(|entry| entry.requests.remove(from))
            .is_some();
        if !pending {
            return Ok(());
        }
        if !accept {
            prune(pair.b(), to);
            return Ok(());
        }
        pair.a()
            .entry(from.clone())
            .or_default()
            .friends
            .entry(to.clone())
            .or_default();
        pair.b()
            .entry(to.clone())
            .or_default()
            .friends
            .entry(from.clone())
            .or_default();
        Ok(())
    }

    fn get_friends(&self, uid: &UserId) -> Result<Vec<UserId>> {
        let shard = self.read(uid);
        Ok(shard
            .get(uid)
            .map(|entry| entry.friends.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn is_friend(&self, uid: &UserId, friend: &UserId) -> Result<bool> {
        Ok(self.read_attrs(uid, friend, |_| ()).is_some())
    }

    fn set_remark(&self, owner: &UserId, friend: &UserId, remark: &str) -> Result<()> {
        self.update_attrs(owner, friend, |attrs| remark.clone_into(&mut attrs.remark));
        Ok(())
    }

    fn get_remark(&self, owner: &UserId, friend: &UserId) -> Result<String> {
        Ok(self
            .read_attrs(owner, friend, |attrs| attrs.remark.clone())
            .unwrap_or_default())
    }

    fn set_dnd(&self, owner: &UserId, friend: &UserId, dnd: bool) -> Result<()> {
        self.update_attrs(owner, friend, |attrs| attrs.dnd = dnd);
        Ok(())
    }

    fn get_dnd(&self, owner: &UserId, friend: &UserId) -> Result<bool> {
        Ok(self
            .read_attrs(owner, friend, |attrs| attrs.dnd)
            .unwrap_or(false))
    }

    fn delete_friend(&self, uid: &UserId, friend: &UserId) -> Result<()> {
        let mut pair = self.write_pair(uid, friend);
        if let Some(entry) = pair.a().get_mut(uid) {
            entry.friends.remove(friend);
        }
        if let Some(entry) = pair.b().get_mut(friend) {
            entry.friends.remove(uid);
        }
        prune(pair.a(), uid);
        prune(pair.b(), friend);
        Ok(())
    }
}
