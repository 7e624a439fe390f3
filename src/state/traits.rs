//! The StateStore contract (spec §4.2) and the plain data it moves.
//!
//! Grounded on the teacher's `storage/traits.rs` focused-repository-trait
//! shape (`crates/lair-chat-server/src/storage/traits.rs`), collapsed here
//! into one trait since the core only ever needs one backing store at a
//! time, not a composition of several repositories.

use std::collections::{HashSet, VecDeque};

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{GlobalSocketId, Message, RoomName, Username};

/// Storage-layer failures, distinct from the domain [`crate::error::Error`]
/// the command surface speaks. Callers translate these into domain errors
/// (usually `serverError`, except where the spec names a specific tag).
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("room not found")]
    RoomNotFound,
    #[error("room already exists")]
    RoomAlreadyExists,
    #[error("user not found")]
    UserNotFound,
    #[error("backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// The four named lists a room carries (spec §4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomList {
    Userlist,
    Blacklist,
    Adminlist,
    Whitelist,
}

/// The two named lists a user carries for direct messaging (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DirectList {
    Blacklist,
    Whitelist,
}

/// A room's full persisted state.
#[derive(Debug, Clone)]
pub struct RoomRecord {
    pub name: RoomName,
    pub owner: Option<Username>,
    pub whitelist_only: bool,
    pub userlist: HashSet<Username>,
    pub blacklist: HashSet<Username>,
    pub adminlist: HashSet<Username>,
    pub whitelist: HashSet<Username>,
    pub history: VecDeque<Message>,
    pub history_max: usize,
}

impl RoomRecord {
    pub fn new(name: RoomName, owner: Option<Username>, whitelist_only: bool, history_max: usize) -> Self {
        Self {
            name,
            owner,
            whitelist_only,
            userlist: HashSet::new(),
            blacklist: HashSet::new(),
            adminlist: HashSet::new(),
            whitelist: HashSet::new(),
            history: VecDeque::new(),
            history_max,
        }
    }

    pub fn list(&self, which: RoomList) -> &HashSet<Username> {
        match which {
            RoomList::Userlist => &self.userlist,
            RoomList::Blacklist => &self.blacklist,
            RoomList::Adminlist => &self.adminlist,
            RoomList::Whitelist => &self.whitelist,
        }
    }

    pub fn list_mut(&mut self, which: RoomList) -> &mut HashSet<Username> {
        match which {
            RoomList::Userlist => &mut self.userlist,
            RoomList::Blacklist => &mut self.blacklist,
            RoomList::Adminlist => &mut self.adminlist,
            RoomList::Whitelist => &mut self.whitelist,
        }
    }

    /// `true` if `user` holds admin-superset rights: owner or adminlist (I2).
    pub fn is_admin(&self, user: &Username) -> bool {
        self.owner.as_ref() == Some(user) || self.adminlist.contains(user)
    }

    pub fn push_history(&mut self, message: Message) {
        self.history.push_back(message);
        while self.history.len() > self.history_max {
            self.history.pop_front();
        }
    }
}

/// A user's full persisted state, independent of any particular socket.
#[derive(Debug, Clone)]
pub struct UserRecord {
    pub username: Username,
    pub direct_whitelist_only: bool,
    pub direct_blacklist: HashSet<Username>,
    pub direct_whitelist: HashSet<Username>,
    pub presence: HashSet<GlobalSocketId>,
    pub rooms_joined: HashSet<RoomName>,
}

impl UserRecord {
    pub fn new(username: Username) -> Self {
        Self {
            username,
            direct_whitelist_only: false,
            direct_blacklist: HashSet::new(),
            direct_whitelist: HashSet::new(),
            presence: HashSet::new(),
            rooms_joined: HashSet::new(),
        }
    }

    pub fn direct_list(&self, which: DirectList) -> &HashSet<Username> {
        match which {
            DirectList::Blacklist => &self.direct_blacklist,
            DirectList::Whitelist => &self.direct_whitelist,
        }
    }

    pub fn direct_list_mut(&mut self, which: DirectList) -> &mut HashSet<Username> {
        match which {
            DirectList::Blacklist => &mut self.direct_blacklist,
            DirectList::Whitelist => &mut self.direct_whitelist,
        }
    }
}

/// Backing store for rooms, users, online registry, and socket registry.
///
/// Every method here is atomic at the granularity of the call, per spec
/// §4.2; composing several calls into an all-or-nothing operation is the
/// caller's (Room/User/DirectMessaging's) responsibility.
#[async_trait]
pub trait StateStore: Send + Sync {
    // -- Rooms --------------------------------------------------------
    async fn get_room(&self, name: &RoomName) -> StoreResult<RoomRecord>;
    async fn add_room(&self, room: RoomRecord) -> StoreResult<()>;
    async fn remove_room(&self, name: &RoomName) -> StoreResult<()>;
    async fn list_rooms(&self) -> StoreResult<Vec<RoomName>>;

    /// Per-item list membership test (spec: `hasInList`).
    async fn room_has_in_list(&self, room: &RoomName, which: RoomList, v: &Username) -> StoreResult<bool>;
    /// Atomic single-call add of one value to one list.
    async fn room_add_to_list(&self, room: &RoomName, which: RoomList, v: &Username) -> StoreResult<()>;
    /// Atomic single-call removal of one value from one list.
    async fn room_remove_from_list(&self, room: &RoomName, which: RoomList, v: &Username) -> StoreResult<()>;
    async fn room_get_list(&self, room: &RoomName, which: RoomList) -> StoreResult<HashSet<Username>>;

    async fn room_whitelist_only_get(&self, room: &RoomName) -> StoreResult<bool>;
    async fn room_whitelist_only_set(&self, room: &RoomName, value: bool) -> StoreResult<()>;

    async fn room_owner_get(&self, room: &RoomName) -> StoreResult<Option<Username>>;
    async fn room_owner_set(&self, room: &RoomName, owner: Option<Username>) -> StoreResult<()>;

    async fn room_message_add(&self, room: &RoomName, message: Message) -> StoreResult<()>;
    /// Oldest-first, per the store's own consistent choice (spec leaves
    /// order to the implementer provided it's consistent across calls).
    async fn room_messages_get(&self, room: &RoomName) -> StoreResult<Vec<Message>>;

    // -- Users / presence ----------------------------------------------
    /// Creates-or-gets the user and registers `socket` in its presence set.
    async fn login_user(&self, name: &Username, socket: GlobalSocketId) -> StoreResult<UserRecord>;
    /// Called once the user's last socket has disappeared.
    async fn logout_user(&self, name: &Username) -> StoreResult<()>;
    async fn get_online_user(&self, name: &Username) -> StoreResult<UserRecord>;
    async fn online_users(&self) -> StoreResult<Vec<Username>>;

    async fn socket_add(&self, user: &Username, socket: GlobalSocketId) -> StoreResult<()>;
    /// Returns the presence set size *after* removal, so callers can tell
    /// whether this was the last socket without a second round trip.
    async fn socket_remove(&self, user: &Username, socket: &GlobalSocketId) -> StoreResult<usize>;
    async fn sockets_get_all(&self, user: &Username) -> StoreResult<HashSet<GlobalSocketId>>;

    async fn user_room_add(&self, user: &Username, room: &RoomName) -> StoreResult<()>;
    async fn user_room_remove(&self, user: &Username, room: &RoomName) -> StoreResult<()>;
    async fn user_rooms_get_all(&self, user: &Username) -> StoreResult<HashSet<RoomName>>;

    // -- Direct messaging lists -----------------------------------------
    async fn direct_has_in_list(&self, user: &Username, which: DirectList, v: &Username) -> StoreResult<bool>;
    async fn direct_add_to_list(&self, user: &Username, which: DirectList, v: &Username) -> StoreResult<()>;
    async fn direct_remove_from_list(&self, user: &Username, which: DirectList, v: &Username) -> StoreResult<()>;
    async fn direct_get_list(&self, user: &Username, which: DirectList) -> StoreResult<HashSet<Username>>;

    async fn direct_whitelist_only_get(&self, user: &Username) -> StoreResult<bool>;
    async fn direct_whitelist_only_set(&self, user: &Username, value: bool) -> StoreResult<()>;
}
</content>
