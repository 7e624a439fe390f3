//! In-memory `StateStore` reference implementation, for single-instance
//! deployments. Grounded on the teacher's `EventDispatcherInner` shape
//! (`crates/lair-chat-server/src/core/events.rs`): plain maps behind
//! `tokio::sync::RwLock`, one lock per concern rather than one giant lock,
//! so unrelated rooms/users don't contend.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::{GlobalSocketId, Message, RoomName, Username};

use super::traits::{DirectList, RoomList, RoomRecord, StateStore, StoreError, StoreResult, UserRecord};

#[derive(Default)]
pub struct MemoryStateStore {
    rooms: RwLock<HashMap<RoomName, RoomRecord>>,
    users: RwLock<HashMap<Username, UserRecord>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get_room(&self, name: &RoomName) -> StoreResult<RoomRecord> {
        self.rooms
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or(StoreError::RoomNotFound)
    }

    async fn add_room(&self, room: RoomRecord) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(&room.name) {
            return Err(StoreError::RoomAlreadyExists);
        }
        rooms.insert(room.name.clone(), room);
        Ok(())
    }

    async fn remove_room(&self, name: &RoomName) -> StoreResult<()> {
        self.rooms
            .write()
            .await
            .remove(name)
            .map(|_| ())
            .ok_or(StoreError::RoomNotFound)
    }

    async fn list_rooms(&self) -> StoreResult<Vec<RoomName>> {
        Ok(self.rooms.read().await.keys().cloned().collect())
    }

    async fn room_has_in_list(&self, room: &RoomName, which: RoomList, v: &Username) -> StoreResult<bool> {
        let rooms = self.rooms.read().await;
        let record = rooms.get(room).ok_or(StoreError::RoomNotFound)?;
        Ok(record.list(which).contains(v))
    }

    async fn room_add_to_list(&self, room: &RoomName, which: RoomList, v: &Username) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        let record = rooms.get_mut(room).ok_or(StoreError::RoomNotFound)?;
        record.list_mut(which).insert(v.clone());
        Ok(())
    }

    async fn room_remove_from_list(&self, room: &RoomName, which: RoomList, v: &Username) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        let record = rooms.get_mut(room).ok_or(StoreError::RoomNotFound)?;
        record.list_mut(which).remove(v);
        Ok(())
    }

    async fn room_get_list(&self, room: &RoomName, which: RoomList) -> StoreResult<HashSet<Username>> {
        let rooms = self.rooms.read().await;
        let record = rooms.get(room).ok_or(StoreError::RoomNotFound)?;
        Ok(record.list(which).clone())
    }

    async fn room_whitelist_only_get(&self, room: &RoomName) -> StoreResult<bool> {
        let rooms = self.rooms.read().await;
        Ok(rooms.get(room).ok_or(StoreError::RoomNotFound)?.whitelist_only)
    }

    async fn room_whitelist_only_set(&self, room: &RoomName, value: bool) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        rooms.get_mut(room).ok_or(StoreError::RoomNotFound)?.whitelist_only = value;
        Ok(())
    }

    async fn room_owner_get(&self, room: &RoomName) -> StoreResult<Option<Username>> {
        let rooms = self.rooms.read().await;
        Ok(rooms.get(room).ok_or(StoreError::RoomNotFound)?.owner.clone())
    }

    async fn room_owner_set(&self, room: &RoomName, owner: Option<Username>) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        rooms.get_mut(room).ok_or(StoreError::RoomNotFound)?.owner = owner;
        Ok(())
    }

    async fn room_message_add(&self, room: &RoomName, message: Message) -> StoreResult<()> {
        let mut rooms = self.rooms.write().await;
        rooms
            .get_mut(room)
            .ok_or(StoreError::RoomNotFound)?
            .push_history(message);
        Ok(())
    }

    async fn room_messages_get(&self, room: &RoomName) -> StoreResult<Vec<Message>> {
        let rooms = self.rooms.read().await;
        Ok(rooms
            .get(room)
            .ok_or(StoreError::RoomNotFound)?
            .history
            .iter()
            .cloned()
            .collect())
    }

    async fn login_user(&self, name: &Username, socket: GlobalSocketId) -> StoreResult<UserRecord> {
        let mut users = self.users.write().await;
        let record = users
            .entry(name.clone())
            .or_insert_with(|| UserRecord::new(name.clone()));
        record.presence.insert(socket);
        Ok(record.clone())
    }

    async fn logout_user(&self, name: &Username) -> StoreResult<()> {
        self.users.write().await.remove(name);
        Ok(())
    }

    async fn get_online_user(&self, name: &Username) -> StoreResult<UserRecord> {
        self.users
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or(StoreError::UserNotFound)
    }

    async fn online_users(&self) -> StoreResult<Vec<Username>> {
        Ok(self
            .users
            .read()
            .await
            .iter()
            .filter(|(_, record)| !record.presence.is_empty())
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn socket_add(&self, user: &Username, socket: GlobalSocketId) -> StoreResult<()> {
        let mut users = self.users.write().await;
        users
            .get_mut(user)
            .ok_or(StoreError::UserNotFound)?
            .presence
            .insert(socket);
        Ok(())
    }

    async fn socket_remove(&self, user: &Username, socket: &GlobalSocketId) -> StoreResult<usize> {
        let mut users = self.users.write().await;
        let record = users.get_mut(user).ok_or(StoreError::UserNotFound)?;
        record.presence.remove(socket);
        Ok(record.presence.len())
    }

    async fn sockets_get_all(&self, user: &Username) -> StoreResult<HashSet<GlobalSocketId>> {
        let users = self.users.read().await;
        Ok(users.get(user).ok_or(StoreError::UserNotFound)?.presence.clone())
    }

    async fn user_room_add(&self, user: &Username, room: &RoomName) -> StoreResult<()> {
        let mut users = self.users.write().await;
        users
            .get_mut(user)
            .ok_or(StoreError::UserNotFound)?
            .rooms_joined
            .insert(room.clone());
        Ok(())
    }

    async fn user_room_remove(&self, user: &Username, room: &RoomName) -> StoreResult<()> {
        let mut users = self.users.write().await;
        users
            .get_mut(user)
            .ok_or(StoreError::UserNotFound)?
            .rooms_joined
            .remove(room);
        Ok(())
    }

    async fn user_rooms_get_all(&self, user: &Username) -> StoreResult<HashSet<RoomName>> {
        let users = self.users.read().await;
        Ok(users.get(user).ok_or(StoreError::UserNotFound)?.rooms_joined.clone())
    }

    async fn direct_has_in_list(&self, user: &Username, which: DirectList, v: &Username) -> StoreResult<bool> {
        let users = self.users.read().await;
        let record = users.get(user).ok_or(StoreError::UserNotFound)?;
        Ok(record.direct_list(which).contains(v))
    }

    async fn direct_add_to_list(&self, user: &Username, which: DirectList, v: &Username) -> StoreResult<()> {
        let mut users = self.users.write().await;
        let record = users.get_mut(user).ok_or(StoreError::UserNotFound)?;
        record.direct_list_mut(which).insert(v.clone());
        Ok(())
    }

    async fn direct_remove_from_list(&self, user: &Username, which: DirectList, v: &Username) -> StoreResult<()> {
        let mut users = self.users.write().await;
        let record = users.get_mut(user).ok_or(StoreError::UserNotFound)?;
        record.direct_list_mut(which).remove(v);
        Ok(())
    }

    async fn direct_get_list(&self, user: &Username, which: DirectList) -> StoreResult<HashSet<Username>> {
        let users = self.users.read().await;
        let record = users.get(user).ok_or(StoreError::UserNotFound)?;
        Ok(record.direct_list(which).clone())
    }

    async fn direct_whitelist_only_get(&self, user: &Username) -> StoreResult<bool> {
        let users = self.users.read().await;
        Ok(users.get(user).ok_or(StoreError::UserNotFound)?.direct_whitelist_only)
    }

    async fn direct_whitelist_only_set(&self, user: &Username, value: bool) -> StoreResult<()> {
        let mut users = self.users.write().await;
        users.get_mut(user).ok_or(StoreError::UserNotFound)?.direct_whitelist_only = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::InstanceId;

    fn socket() -> GlobalSocketId {
        GlobalSocketId::new(InstanceId::generate(), crate::domain::SocketId::generate())
    }

    #[tokio::test]
    async fn room_lifecycle() {
        let store = MemoryStateStore::new();
        let name = RoomName::new("room1").unwrap();
        let owner = Username::new("alice").unwrap();
        store
            .add_room(RoomRecord::new(name.clone(), Some(owner.clone()), false, 100))
            .await
            .unwrap();

        assert!(matches!(
            store
                .add_room(RoomRecord::new(name.clone(), None, false, 100))
                .await,
            Err(StoreError::RoomAlreadyExists)
        ));

        store.room_add_to_list(&name, RoomList::Userlist, &owner).await.unwrap();
        assert!(store.room_has_in_list(&name, RoomList::Userlist, &owner).await.unwrap());

        store.remove_room(&name).await.unwrap();
        assert!(matches!(store.get_room(&name).await, Err(StoreError::RoomNotFound)));
    }

    #[tokio::test]
    async fn presence_tracks_last_socket() {
        let store = MemoryStateStore::new();
        let alice = Username::new("alice").unwrap();
        let s1 = socket();
        let s2 = socket();

        store.login_user(&alice, s1.clone()).await.unwrap();
        store.socket_add(&alice, s2.clone()).await.unwrap();
        assert_eq!(store.sockets_get_all(&alice).await.unwrap().len(), 2);

        let remaining = store.socket_remove(&alice, &s1).await.unwrap();
        assert_eq!(remaining, 1);
        let remaining = store.socket_remove(&alice, &s2).await.unwrap();
        assert_eq!(remaining, 0);
    }

    #[tokio::test]
    async fn bounded_history_evicts_fifo() {
        let store = MemoryStateStore::new();
        let name = RoomName::new("room1").unwrap();
        let author = Username::new("alice").unwrap();
        store
            .add_room(RoomRecord::new(name.clone(), Some(author.clone()), false, 3))
            .await
            .unwrap();

        for i in 0..5 {
            store
                .room_message_add(&name, Message::new(&author, format!("m{i}"), i))
                .await
                .unwrap();
        }

        let history = store.room_messages_get(&name).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(
            history.iter().map(|m| m.text_message.as_str()).collect::<Vec<_>>(),
            vec!["m2", "m3", "m4"]
        );
    }
}
</content>
