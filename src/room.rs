//! Room: permission-checked operations over room state (spec §4.3).
//!
//! This and [`crate::direct_messaging::DirectMessaging`] are the two
//! permission-checking layers built on top of the raw [`StateStore`]; the
//! teacher has no direct precedent for this exact ACL state machine, so the
//! control flow below follows the spec text closely while keeping the
//! `Result<T, Error>`-returning method style the teacher's `core/engine.rs`
//! uses throughout.

use std::sync::Arc;

use crate::domain::{Message, MessageInput, RoomName, Username};
use crate::error::{self, Error, Result};
use crate::state::{RoomList, RoomRecord, StateStore, StoreError};

/// Bounded concurrency for batch list mutations (spec §4.3): at most this
/// many store calls in flight for a single `addToList`/`removeFromList`.
const MAX_BATCH_CONCURRENCY: usize = 16;

pub struct Room<S: StateStore> {
    store: Arc<S>,
}

fn map_store_err(e: StoreError) -> Error {
    match e {
        StoreError::RoomNotFound => error::server_error(),
        other => {
            tracing::error!(error = %other, "state store failure");
            error::server_error()
        }
    }
}

impl<S: StateStore> Room<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn fetch(&self, room: &RoomName) -> Result<RoomRecord> {
        self.store.get_room(room).await.map_err(map_store_err)
    }

    /// `join(user)`: fails `notAllowed` if blacklisted, or if whitelist-only
    /// and the user isn't whitelisted/admin/owner.
    pub async fn join(&self, room: &RoomName, user: &Username) -> Result<()> {
        let record = self.fetch(room).await?;
        if record.blacklist.contains(user) {
            return Err(error::not_allowed([room.as_str()]));
        }
        let is_owner = record.owner.as_ref() == Some(user);
        if record.whitelist_only && !record.whitelist.contains(user) && !record.adminlist.contains(user) && !is_owner {
            return Err(error::not_allowed([room.as_str()]));
        }
        self.store
            .room_add_to_list(room, RoomList::Userlist, user)
            .await
            .map_err(map_store_err)
    }

    /// `leave(user)`: removes from userlist unconditionally.
    pub async fn leave(&self, room: &RoomName, user: &Username) -> Result<()> {
        self.store
            .room_remove_from_list(room, RoomList::Userlist, user)
            .await
            .map_err(map_store_err)
    }

    /// `message(author, msg)`: fails `notJoined` if the author hasn't
    /// joined; else appends to history.
    pub async fn message(&self, room: &RoomName, author: &Username, input: MessageInput, timestamp_ms: i64) -> Result<Message> {
        let record = self.fetch(room).await?;
        if !record.userlist.contains(author) {
            return Err(error::not_joined([room.as_str()]));
        }
        let message = Message::new(author, input.text_message, timestamp_ms);
        self.store
            .room_message_add(room, message.clone())
            .await
            .map_err(map_store_err)?;
        Ok(message)
    }

    pub async fn history(&self, room: &RoomName, author: &Username) -> Result<Vec<Message>> {
        let record = self.fetch(room).await?;
        if !record.userlist.contains(author) {
            return Err(error::not_joined([room.as_str()]));
        }
        Ok(record.history.into_iter().collect())
    }

    /// `getList(author, listName)`: fails `notJoined` if not a member.
    pub async fn get_list(&self, room: &RoomName, author: &Username, which: RoomList) -> Result<Vec<Username>> {
        let record = self.fetch(room).await?;
        if !record.userlist.contains(author) {
            return Err(error::not_joined([room.as_str()]));
        }
        Ok(record.list(which).iter().cloned().collect())
    }

    pub async fn get_mode(&self, room: &RoomName, author: &Username) -> Result<bool> {
        let record = self.fetch(room).await?;
        if !record.userlist.contains(author) {
            return Err(error::not_joined([room.as_str()]));
        }
        Ok(record.whitelist_only)
    }

    pub async fn check_is_owner(&self, room: &RoomName, user: &Username) -> Result<()> {
        let record = self.fetch(room).await?;
        if record.owner.as_ref() != Some(user) {
            return Err(error::not_allowed([room.as_str()]));
        }
        Ok(())
    }

    /// `changeMode(author, bool)`: requires author to be an admin. Returns
    /// the currently-joined non-admin users evicted by a `true` transition.
    pub async fn change_mode(&self, room: &RoomName, author: &Username, value: bool) -> Result<Vec<Username>> {
        let record = self.fetch(room).await?;
        if !record.is_admin(author) {
            return Err(error::not_allowed([room.as_str()]));
        }
        self.store
            .room_whitelist_only_set(room, value)
            .await
            .map_err(map_store_err)?;

        if !value {
            return Ok(Vec::new());
        }

        let lost: Vec<Username> = record
            .userlist
            .iter()
            .filter(|u| !record.is_admin(u) && !record.whitelist.contains(*u))
            .cloned()
            .collect();

        for user in &lost {
            self.store
                .room_remove_from_list(room, RoomList::Userlist, user)
                .await
                .map_err(map_store_err)?;
        }
        Ok(lost)
    }

    /// `addToList`/`removeFromList`: the list-change protocol (spec §4.3).
    /// Returns the lost-access set on success.
    pub async fn add_to_list(&self, room: &RoomName, author: &Username, which: RoomList, values: &[Username]) -> Result<Vec<Username>> {
        self.mutate_list(room, author, which, values, true).await
    }

    pub async fn remove_from_list(&self, room: &RoomName, author: &Username, which: RoomList, values: &[Username]) -> Result<Vec<Username>> {
        self.mutate_list(room, author, which, values, false).await
    }

    async fn mutate_list(
        &self,
        room: &RoomName,
        author: &Username,
        which: RoomList,
        values: &[Username],
        is_add: bool,
    ) -> Result<Vec<Username>> {
        if which == RoomList::Userlist {
            return Err(error::not_allowed([room.as_str()]));
        }

        let record = self.fetch(room).await?;
        let is_owner = record.owner.as_ref() == Some(author);
        if !is_owner && !record.adminlist.contains(author) {
            return Err(error::not_allowed([room.as_str()]));
        }

        let mut applied = Vec::new();
        for chunk in values.chunks(MAX_BATCH_CONCURRENCY) {
            let mut chunk_results = Vec::with_capacity(chunk.len());
            for v in chunk {
                chunk_results.push(self.apply_one(room, &record, author, which, v, is_add));
            }
            let results = futures::future::join_all(chunk_results).await;
            for (v, result) in chunk.iter().zip(results) {
                result?;
                applied.push(v.clone());
            }
        }

        let post = self.fetch(room).await?;
        let lost = self.compute_lost_access(&post, which, &applied, is_add);
        for user in &lost {
            self.store
                .room_remove_from_list(room, RoomList::Userlist, user)
                .await
                .map_err(map_store_err)?;
        }
        Ok(lost)
    }

    /// Per-value steps 3-6 of the list-change protocol. Step 2 ("if author
    /// = owner: permitted") short-circuits steps 3-5, so the owner may
    /// target the owner slot or an admin without `notAllowed`; only the
    /// idempotence check (step 6) still applies to them.
    async fn apply_one(&self, room: &RoomName, record: &RoomRecord, author: &Username, which: RoomList, v: &Username, is_add: bool) -> Result<()> {
        let author_is_owner = record.owner.as_ref() == Some(author);
        if !author_is_owner {
            if record.owner.as_ref() == Some(v) {
                return Err(error::not_allowed([v.as_str()]));
            }
            if record.adminlist.contains(v) {
                return Err(error::not_allowed([v.as_str()]));
            }
        }
        let already_present = record.list(which).contains(v);
        if is_add {
            if already_present {
                return Err(error::name_in_list([v.as_str()]));
            }
            self.store.room_add_to_list(room, which, v).await.map_err(map_store_err)
        } else {
            if !already_present {
                return Err(error::no_name_in_list([v.as_str()]));
            }
            self.store.room_remove_from_list(room, which, v).await.map_err(map_store_err)
        }
    }

    /// Post-mutation lost-access computation (spec §5's "two-phase
    /// eviction"): never evicts a user who is still permitted.
    fn compute_lost_access(&self, post: &RoomRecord, which: RoomList, applied: &[Username], is_add: bool) -> Vec<Username> {
        match (which, is_add) {
            (RoomList::Blacklist, true) => applied
                .iter()
                .filter(|u| post.userlist.contains(*u) && !post.is_admin(u))
                .cloned()
                .collect(),
            (RoomList::Whitelist, false) if post.whitelist_only => applied
                .iter()
                .filter(|u| post.userlist.contains(*u) && !post.is_admin(u))
                .cloned()
                .collect(),
            _ => Vec::new(),
        }
    }
}

</content>
