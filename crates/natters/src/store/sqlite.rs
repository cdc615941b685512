use super::{FriendStore, Result};
use natter_common::UserId;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS friendships (
    user_id    TEXT    NOT NULL,
    friend_id  TEXT    NOT NULL,
    remark     TEXT    NOT NULL DEFAULT '',
    dnd        INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (user_id, friend_id)
);

CREATE TABLE IF NOT EXISTS friend_requests (
    from_user_id TEXT    NOT NULL,
    to_user_id   TEXT    NOT NULL,
    verify_msg   TEXT    NOT NULL DEFAULT '',
    created_at   INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
    PRIMARY KEY (from_user_id, to_user_id)
);

CREATE INDEX IF NOT EXISTS idx_friend_requests_to ON friend_requests (to_user_id);
";

/// Durable friend graph backed by a single SQLite connection.
///
/// Operations that touch both directions of an edge run in a transaction.
pub struct SqliteFriendStore {
    conn: Mutex<Connection>,
}

impl SqliteFriendStore {
    /// Open (or create) a database at `path` and apply the schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        tracing::info!(path = %path.display(), "opened friend database");
        Self::init(conn)
    }

    /// Open a private in-memory database.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl FriendStore for SqliteFriendStore {
    fn add_request(&self, from: &UserId, to: &UserId, message: &str) -> Result<()> {
        self.conn().execute(
            "INSERT INTO friend_requests (from_user_id, to_user_id, verify_msg)
             VALUES (?1, ?2, ?3)
             ON CONFLICT (from_user_id, to_user_id)
             DO UPDATE SET verify_msg = excluded.verify_msg,
                           created_at = strftime('%s', 'now')",
            params![from.as_str(), to.as_str(), message],
        )?;
        Ok(())
    }

    fn get_requests(&self, to: &UserId) -> Result<HashMap<UserId, String>> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT from_user_id, verify_msg FROM friend_requests WHERE to_user_id = ?1")?;
        let rows = stmt.query_map(params![to.as_str()], |row| {
            Ok((UserId::new(row.get::<_, String>(0)?), row.get::<_, String>(1)?))
        })?;

        let mut requests = HashMap::new();
        for row in rows {
            let (from, msg) = row?;
            requests.insert(from, msg);
        }
        Ok(requests)
    }

    fn handle_request(&self, from: &UserId, to: &UserId, accept: bool) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let removed = tx.execute(
            "DELETE FROM friend_requests WHERE from_user_id = ?1 AND to_user_id = ?2",
            params![from.as_str(), to.as_str()],
        )?;
        if removed > 0 && accept {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO friendships (user_id, friend_id) VALUES (?1, ?2)",
            )?;
            insert.execute(params![from.as_str(), to.as_str()])?;
            insert.execute(params![to.as_str(), from.as_str()])?;
            drop(insert);
        }
        tx.commit()?;
        Ok(())
    }

    fn get_friends(&self, uid: &UserId) -> Result<Vec<UserId>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT friend_id FROM friendships WHERE user_id = ?1")?;
        let rows = stmt.query_map(params![uid.as_str()], |row| {
            row.get::<_, String>(0).map(UserId::new)
        })?;

        let mut friends = Vec::new();
        for row in rows {
            friends.push(row?);
        }
        Ok(friends)
    }

    fn is_friend(&self, uid: &UserId, friend: &UserId) -> Result<bool> {
        let found = self
            .conn()
            .query_row(
                "SELECT 1 FROM friendships WHERE user_id = ?1 AND friend_id = ?2",
                params![uid.as_str(), friend.as_str()],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn set_remark(&self, owner: &UserId, friend: &UserId, remark: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE friendships SET remark = ?3 WHERE user_id = ?1 AND friend_id = ?2",
            params![owner.as_str(), friend.as_str(), remark],
        )?;
        Ok(())
    }

    fn get_remark(&self, owner: &UserId, friend: &UserId) -> Result<String> {
        let remark = self
            .conn()
            .query_row(
                "SELECT remark FROM friendships WHERE user_id = ?1 AND friend_id = ?2",
                params![owner.as_str(), friend.as_str()],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(remark.unwrap_or_default())
    }

    fn set_dnd(&self, owner: &UserId, friend: &UserId, dnd: bool) -> Result<()> {
        self.conn().execute(
            "UPDATE friendships SET dnd = ?3 WHERE user_id = ?1 AND friend_id = ?2",
            params![owner.as_str(), friend.as_str(), dnd],
        )?;
        Ok(())
    }

    fn get_dnd(&self, owner: &UserId, friend: &UserId) -> Result<bool> {
        let dnd = self
            .conn()
            .query_row(
                "SELECT dnd FROM friendships WHERE user_id = ?1 AND friend_id = ?2",
                params![owner.as_str(), friend.as_str()],
                |row| row.get::<_, bool>(0),
            )
            .optional()?;
        Ok(dnd.unwrap_or(false))
    }

    fn delete_friend(&self, uid: &UserId, friend: &UserId) -> Result<()> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM friendships
             WHERE (user_id = ?1 AND friend_id = ?2) OR (user_id = ?2 AND friend_id = ?1)",
            params![uid.as_str(), friend.as_str()],
        )?;
        tx.commit()?;
        Ok(())
    }
}
