//! Shared, multi-instance `StateStore` reference implementation, backed by
//! SQLite via `sqlx`. Grounded on the teacher's `storage` module family
//! (`examples/berrym-lair-chat/src/server/storage/mod.rs`'s
//! `StorageManager`/`DatabaseConfig` and the pack's `storage/sqlite/*`
//! files), generalized from a user/message/room persistence layer to this
//! core's list-and-presence-oriented schema.
//!
//! Two `SqliteStateStore`s pointed at the same `sqlite://` file observe the
//! same state, which is what lets a single process exercise the
//! cluster-disconnect scenario (spec §8 scenario 6) without a second
//! process.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::{GlobalSocketId, InstanceId, Message, RoomName, SocketId, Username};

use super::traits::{DirectList, RoomList, RoomRecord, StateStore, StoreError, StoreResult, UserRecord};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rooms (
    name TEXT PRIMARY KEY,
    owner TEXT,
    whitelist_only INTEGER NOT NULL DEFAULT 0,
    history_max INTEGER NOT NULL DEFAULT 100
);

CREATE TABLE IF NOT EXISTS room_list_members (
    room TEXT NOT NULL REFERENCES rooms(name) ON DELETE CASCADE,
    list_kind TEXT NOT NULL,
    username TEXT NOT NULL,
    PRIMARY KEY (room, list_kind, username)
);

CREATE TABLE IF NOT EXISTS room_history (
    room TEXT NOT NULL REFERENCES rooms(name) ON DELETE CASCADE,
    seq INTEGER NOT NULL,
    text_message TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    author TEXT NOT NULL,
    PRIMARY KEY (room, seq)
);

CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    direct_whitelist_only INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS user_direct_lists (
    username TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
    list_kind TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (username, list_kind, value)
);

CREATE TABLE IF NOT EXISTS user_presence (
    username TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
    instance_id TEXT NOT NULL,
    socket_id TEXT NOT NULL,
    PRIMARY KEY (username, instance_id, socket_id)
);

CREATE TABLE IF NOT EXISTS user_rooms_joined (
    username TEXT NOT NULL REFERENCES users(username) ON DELETE CASCADE,
    room TEXT NOT NULL,
    PRIMARY KEY (username, room)
);
"#;

pub struct SqliteStateStore {
    pool: SqlitePool,
}

fn room_list_kind(which: RoomList) -> &'static str {
    match which {
        RoomList::Userlist => "userlist",
        RoomList::Blacklist => "blacklist",
        RoomList::Adminlist => "adminlist",
        RoomList::Whitelist => "whitelist",
    }
}

fn direct_list_kind(which: DirectList) -> &'static str {
    match which {
        DirectList::Blacklist => "blacklist",
        DirectList::Whitelist => "whitelist",
    }
}

fn backend_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqliteStateStore {
    /// Connects to `database_url` (e.g. `sqlite://chatcore.db` or
    /// `sqlite::memory:`) and ensures the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = SqlitePool::connect(database_url).await?;
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn fetch_room(&self, name: &RoomName) -> StoreResult<RoomRecord> {
        let row = sqlx::query("SELECT owner, whitelist_only, history_max FROM rooms WHERE name = ?")
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?
            .ok_or(StoreError::RoomNotFound)?;

        let owner: Option<String> = row.try_get("owner").map_err(backend_err)?;
        let whitelist_only: i64 = row.try_get("whitelist_only").map_err(backend_err)?;
        let history_max: i64 = row.try_get("history_max").map_err(backend_err)?;

        let mut record = RoomRecord::new(
            name.clone(),
            owner.map(|o| Username::new(o).expect("persisted username is valid")),
            whitelist_only != 0,
            history_max as usize,
        );

        for which in [RoomList::Userlist, RoomList::Blacklist, RoomList::Adminlist, RoomList::Whitelist] {
            let members = sqlx::query(
                "SELECT username FROM room_list_members WHERE room = ? AND list_kind = ?",
            )
            .bind(name.as_str())
            .bind(room_list_kind(which))
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
            for m in members {
                let username: String = m.try_get("username").map_err(backend_err)?;
                record
                    .list_mut(which)
                    .insert(Username::new(username).expect("persisted username is valid"));
            }
        }

        let history = sqlx::query(
            "SELECT text_message, timestamp, author FROM room_history WHERE room = ? ORDER BY seq ASC",
        )
        .bind(name.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;

        record.history = history
            .into_iter()
            .map(|row| Message {
                text_message: row.try_get("text_message").unwrap_or_default(),
                timestamp: row.try_get("timestamp").unwrap_or_default(),
                author: row.try_get("author").unwrap_or_default(),
            })
            .collect::<VecDeque<_>>();

        Ok(record)
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get_room(&self, name: &RoomName) -> StoreResult<RoomRecord> {
        self.fetch_room(name).await
    }

    async fn add_room(&self, room: RoomRecord) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(backend_err)?;
        let exists: Option<(String,)> = sqlx::query_as("SELECT name FROM rooms WHERE name = ?")
            .bind(room.name.as_str())
            .fetch_optional(&mut *tx)
            .await
            .map_err(backend_err)?;
        if exists.is_some() {
            return Err(StoreError::RoomAlreadyExists);
        }
        sqlx::query("INSERT INTO rooms (name, owner, whitelist_only, history_max) VALUES (?, ?, ?, ?)")
            .bind(room.name.as_str())
            .bind(room.owner.as_ref().map(|o| o.as_str()))
            .bind(room.whitelist_only as i64)
            .bind(room.history_max as i64)
            .execute(&mut *tx)
            .await
            .map_err(backend_err)?;
        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn remove_room(&self, name: &RoomName) -> StoreResult<()> {
        let result = sqlx::query("DELETE FROM rooms WHERE name = ?")
            .bind(name.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RoomNotFound);
        }
        Ok(())
    }

    async fn list_rooms(&self) -> StoreResult<Vec<RoomName>> {
        let rows = sqlx::query("SELECT name FROM rooms")
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let name: String = r.try_get("name").unwrap_or_default();
                RoomName::new(name).expect("persisted room name is valid")
            })
            .collect())
    }

    async fn room_has_in_list(&self, room: &RoomName, which: RoomList, v: &Username) -> StoreResult<bool> {
        self.fetch_room(room).await.map(|r| r.list(which).contains(v))
    }

    async fn room_add_to_list(&self, room: &RoomName, which: RoomList, v: &Username) -> StoreResult<()> {
        self.fetch_room(room).await?;
        sqlx::query("INSERT OR IGNORE INTO room_list_members (room, list_kind, username) VALUES (?, ?, ?)")
            .bind(room.as_str())
            .bind(room_list_kind(which))
            .bind(v.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn room_remove_from_list(&self, room: &RoomName, which: RoomList, v: &Username) -> StoreResult<()> {
        self.fetch_room(room).await?;
        sqlx::query("DELETE FROM room_list_members WHERE room = ? AND list_kind = ? AND username = ?")
            .bind(room.as_str())
            .bind(room_list_kind(which))
            .bind(v.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn room_get_list(&self, room: &RoomName, which: RoomList) -> StoreResult<HashSet<Username>> {
        self.fetch_room(room).await.map(|r| r.list(which).clone())
    }

    async fn room_whitelist_only_get(&self, room: &RoomName) -> StoreResult<bool> {
        self.fetch_room(room).await.map(|r| r.whitelist_only)
    }

    async fn room_whitelist_only_set(&self, room: &RoomName, value: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE rooms SET whitelist_only = ? WHERE name = ?")
            .bind(value as i64)
            .bind(room.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RoomNotFound);
        }
        Ok(())
    }

    async fn room_owner_get(&self, room: &RoomName) -> StoreResult<Option<Username>> {
        self.fetch_room(room).await.map(|r| r.owner)
    }

    async fn room_owner_set(&self, room: &RoomName, owner: Option<Username>) -> StoreResult<()> {
        let result = sqlx::query("UPDATE rooms SET owner = ? WHERE name = ?")
            .bind(owner.as_ref().map(|o| o.as_str()))
            .bind(room.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::RoomNotFound);
        }
        Ok(())
    }

    async fn room_message_add(&self, room: &RoomName, message: Message) -> StoreResult<()> {
        let record = self.fetch_room(room).await?;
        let mut tx = self.pool.begin().await.map_err(backend_err)?;

        let next_seq: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), -1) + 1 FROM room_history WHERE room = ?")
            .bind(room.as_str())
            .fetch_one(&mut *tx)
            .await
            .map_err(backend_err)?;

        sqlx::query(
            "INSERT INTO room_history (room, seq, text_message, timestamp, author) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(room.as_str())
        .bind(next_seq)
        .bind(&message.text_message)
        .bind(message.timestamp)
        .bind(&message.author)
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;

        // FIFO eviction past history_max (I5).
        sqlx::query(
            "DELETE FROM room_history WHERE room = ? AND seq <= (SELECT MAX(seq) FROM room_history WHERE room = ?) - ?",
        )
        .bind(room.as_str())
        .bind(room.as_str())
        .bind(record.history_max as i64)
        .execute(&mut *tx)
        .await
        .map_err(backend_err)?;

        tx.commit().await.map_err(backend_err)?;
        Ok(())
    }

    async fn room_messages_get(&self, room: &RoomName) -> StoreResult<Vec<Message>> {
        self.fetch_room(room).await.map(|r| r.history.into_iter().collect())
    }

    async fn login_user(&self, name: &Username, socket: GlobalSocketId) -> StoreResult<UserRecord> {
        sqlx::query("INSERT OR IGNORE INTO users (username, direct_whitelist_only) VALUES (?, 0)")
            .bind(name.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        self.socket_add(name, socket).await?;
        self.get_online_user(name).await
    }

    async fn logout_user(&self, name: &Username) -> StoreResult<()> {
        sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(name.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn get_online_user(&self, name: &Username) -> StoreResult<UserRecord> {
        let row = sqlx::query("SELECT direct_whitelist_only FROM users WHERE username = ?")
            .bind(name.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?
            .ok_or(StoreError::UserNotFound)?;
        let whitelist_only: i64 = row.try_get("direct_whitelist_only").map_err(backend_err)?;

        let mut record = UserRecord::new(name.clone());
        record.direct_whitelist_only = whitelist_only != 0;
        record.presence = self.sockets_get_all(name).await?;
        record.rooms_joined = self.user_rooms_get_all(name).await?;
        record.direct_blacklist = self.direct_get_list(name, DirectList::Blacklist).await?;
        record.direct_whitelist = self.direct_get_list(name, DirectList::Whitelist).await?;
        Ok(record)
    }

    async fn online_users(&self) -> StoreResult<Vec<Username>> {
        let rows = sqlx::query(
            "SELECT DISTINCT username FROM user_presence",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let name: String = r.try_get("username").unwrap_or_default();
                Username::new(name).expect("persisted username is valid")
            })
            .collect())
    }

    async fn socket_add(&self, user: &Username, socket: GlobalSocketId) -> StoreResult<()> {
        sqlx::query(
            "INSERT OR IGNORE INTO user_presence (username, instance_id, socket_id) VALUES (?, ?, ?)",
        )
        .bind(user.as_str())
        .bind(socket.instance_id.as_str())
        .bind(socket.socket_id.to_string())
        .execute(&self.pool)
        .await
        .map_err(backend_err)?;
        Ok(())
    }

    async fn socket_remove(&self, user: &Username, socket: &GlobalSocketId) -> StoreResult<usize> {
        sqlx::query("DELETE FROM user_presence WHERE username = ? AND instance_id = ? AND socket_id = ?")
            .bind(user.as_str())
            .bind(socket.instance_id.as_str())
            .bind(socket.socket_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_presence WHERE username = ?")
            .bind(user.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(remaining as usize)
    }

    async fn sockets_get_all(&self, user: &Username) -> StoreResult<HashSet<GlobalSocketId>> {
        let rows = sqlx::query("SELECT instance_id, socket_id FROM user_presence WHERE username = ?")
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let instance_id: String = r.try_get("instance_id").unwrap_or_default();
                let socket_id: String = r.try_get("socket_id").unwrap_or_default();
                GlobalSocketId::new(
                    InstanceId::new(instance_id),
                    socket_id.parse::<SocketId>().unwrap_or_else(|_| SocketId::generate()),
                )
            })
            .collect())
    }

    async fn user_room_add(&self, user: &Username, room: &RoomName) -> StoreResult<()> {
        sqlx::query("INSERT OR IGNORE INTO user_rooms_joined (username, room) VALUES (?, ?)")
            .bind(user.as_str())
            .bind(room.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn user_room_remove(&self, user: &Username, room: &RoomName) -> StoreResult<()> {
        sqlx::query("DELETE FROM user_rooms_joined WHERE username = ? AND room = ?")
            .bind(user.as_str())
            .bind(room.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn user_rooms_get_all(&self, user: &Username) -> StoreResult<HashSet<RoomName>> {
        let rows = sqlx::query("SELECT room FROM user_rooms_joined WHERE username = ?")
            .bind(user.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let room: String = r.try_get("room").unwrap_or_default();
                RoomName::new(room).expect("persisted room name is valid")
            })
            .collect())
    }

    async fn direct_has_in_list(&self, user: &Username, which: DirectList, v: &Username) -> StoreResult<bool> {
        Ok(self.direct_get_list(user, which).await?.contains(v))
    }

    async fn direct_add_to_list(&self, user: &Username, which: DirectList, v: &Username) -> StoreResult<()> {
        sqlx::query("INSERT OR IGNORE INTO user_direct_lists (username, list_kind, value) VALUES (?, ?, ?)")
            .bind(user.as_str())
            .bind(direct_list_kind(which))
            .bind(v.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn direct_remove_from_list(&self, user: &Username, which: DirectList, v: &Username) -> StoreResult<()> {
        sqlx::query("DELETE FROM user_direct_lists WHERE username = ? AND list_kind = ? AND value = ?")
            .bind(user.as_str())
            .bind(direct_list_kind(which))
            .bind(v.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn direct_get_list(&self, user: &Username, which: DirectList) -> StoreResult<HashSet<Username>> {
        let rows = sqlx::query("SELECT value FROM user_direct_lists WHERE username = ? AND list_kind = ?")
            .bind(user.as_str())
            .bind(direct_list_kind(which))
            .fetch_all(&self.pool)
            .await
            .map_err(backend_err)?;
        Ok(rows
            .into_iter()
            .map(|r| {
                let value: String = r.try_get("value").unwrap_or_default();
                Username::new(value).expect("persisted username is valid")
            })
            .collect())
    }

    async fn direct_whitelist_only_get(&self, user: &Username) -> StoreResult<bool> {
        let row = sqlx::query("SELECT direct_whitelist_only FROM users WHERE username = ?")
            .bind(user.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend_err)?
            .ok_or(StoreError::UserNotFound)?;
        let value: i64 = row.try_get("direct_whitelist_only").map_err(backend_err)?;
        Ok(value != 0)
    }

    async fn direct_whitelist_only_set(&self, user: &Username, value: bool) -> StoreResult<()> {
        let result = sqlx::query("UPDATE users SET direct_whitelist_only = ? WHERE username = ?")
            .bind(value as i64)
            .bind(user.as_str())
            .execute(&self.pool)
            .await
            .map_err(backend_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::UserNotFound);
        }
        Ok(())
    }
}

</content>
