//! The command surface (spec §4.5): binds client commands to
//! [`Room`]/[`DirectMessaging`], implements multi-socket echo, presence
//! bookkeeping, and the feature gates.
//!
//! Grounded on the teacher's `adapters/tcp/connection.rs` `handle_authenticated`
//! dispatch `match`, generalized from a fixed match over request types to a
//! registry-driven surface (`CommandKind` + `shape_for`), per the spec's
//! "dynamic dispatch over command names" design note.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::{json, Value};
use strum::{Display, EnumIter, EnumString};

use crate::cluster_bus::ClusterBus;
use crate::config::ServiceConfig;
use crate::direct_messaging::DirectMessaging;
use crate::domain::{ChannelId, GlobalSocketId, MessageInput, RoomName, Username};
use crate::error::{self, Result};
use crate::hooks::HookArgs;
use crate::room::Room;
use crate::state::{DirectList, RoomList, RoomRecord, StateStore, StoreError};
use crate::transport::Transport;

/// The 19 commands of spec §4.5's command surface, addressable by their
/// camelCase wire name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, EnumIter)]
#[strum(serialize_all = "camelCase")]
pub enum CommandKind {
    DirectAddToList,
    DirectRemoveFromList,
    DirectGetAccessList,
    DirectGetWhitelistMode,
    DirectSetWhitelistMode,
    DirectMessage,
    RoomCreate,
    RoomDelete,
    RoomJoin,
    RoomLeave,
    RoomMessage,
    RoomAddToList,
    RoomRemoveFromList,
    RoomGetAccessList,
    RoomGetWhitelistMode,
    RoomSetWhitelistMode,
    RoomHistory,
    ListRooms,
    Disconnect,
}

/// The wire name of every command, for callers that want to check
/// membership without round-tripping through [`CommandKind::from_str`].
pub static ALL_COMMANDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "directAddToList",
        "directRemoveFromList",
        "directGetAccessList",
        "directGetWhitelistMode",
        "directSetWhitelistMode",
        "directMessage",
        "roomCreate",
        "roomDelete",
        "roomJoin",
        "roomLeave",
        "roomMessage",
        "roomAddToList",
        "roomRemoveFromList",
        "roomGetAccessList",
        "roomGetWhitelistMode",
        "roomSetWhitelistMode",
        "roomHistory",
        "listRooms",
        "disconnect",
    ]
    .into_iter()
    .collect()
});

#[derive(Clone, Copy)]
enum ArgKind {
    Str,
    Bool,
    StrList,
    Msg,
}

fn shape_for(kind: CommandKind) -> &'static [ArgKind] {
    use ArgKind::*;
    use CommandKind::*;
    match kind {
        DirectAddToList | DirectRemoveFromList => &[Str, StrList],
        DirectGetAccessList => &[Str],
        DirectGetWhitelistMode => &[],
        DirectSetWhitelistMode => &[Bool],
        DirectMessage => &[Str, Msg],
        RoomCreate => &[Str, Bool],
        RoomDelete | RoomJoin | RoomLeave | RoomHistory | RoomGetWhitelistMode => &[Str],
        RoomMessage => &[Str, Msg],
        RoomAddToList | RoomRemoveFromList => &[Str, Str, StrList],
        RoomGetAccessList => &[Str, Str],
        RoomSetWhitelistMode => &[Str, Bool],
        ListRooms => &[],
        Disconnect => &[Str],
    }
}

/// Checks `args` against `shape`: wrong arity fails `wrongArgumentsCount`,
/// any element of the wrong JSON type fails `badArgument`.
fn check_shape(command: &str, args: &HookArgs, shape: &[ArgKind]) -> Result<()> {
    if args.len() != shape.len() {
        return Err(error::wrong_arguments_count([command.to_string()]));
    }
    for (i, kind) in shape.iter().enumerate() {
        let ok = match kind {
            ArgKind::Str => args[i].is_string(),
            ArgKind::Bool => args[i].is_boolean(),
            ArgKind::StrList => args[i].as_array().is_some_and(|a| a.iter().all(Value::is_string)),
            ArgKind::Msg => args[i]
                .as_object()
                .is_some_and(|o| o.len() == 1 && o.get("textMessage").is_some_and(Value::is_string)),
        };
        if !ok {
            return Err(error::bad_argument([format!("{command}: arg {i}")]));
        }
    }
    Ok(())
}

fn str_arg(args: &HookArgs, i: usize) -> String {
    args[i].as_str().expect("shape already validated").to_string()
}

fn bool_arg(args: &HookArgs, i: usize) -> bool {
    args[i].as_bool().expect("shape already validated")
}

fn string_vec_arg(args: &HookArgs, i: usize) -> Vec<String> {
    args[i]
        .as_array()
        .expect("shape already validated")
        .iter()
        .map(|v| v.as_str().expect("shape already validated").to_string())
        .collect()
}

fn message_input_arg(args: &HookArgs, i: usize) -> String {
    args[i]
        .as_object()
        .expect("shape already validated")
        .get("textMessage")
        .and_then(Value::as_str)
        .expect("shape already validated")
        .to_string()
}

fn room_list_kind(name: &str) -> Result<RoomList> {
    match name {
        "userlist" => Ok(RoomList::Userlist),
        "blacklist" => Ok(RoomList::Blacklist),
        "adminlist" => Ok(RoomList::Adminlist),
        "whitelist" => Ok(RoomList::Whitelist),
        other => Err(error::no_list([other.to_string()])),
    }
}

fn direct_list_kind(name: &str) -> Result<DirectList> {
    match name {
        "blacklist" => Ok(DirectList::Blacklist),
        "whitelist" => Ok(DirectList::Whitelist),
        other => Err(error::no_list([other.to_string()])),
    }
}

fn usernames_from_strings(raw: Vec<String>) -> Result<Vec<Username>> {
    raw.into_iter().map(Username::new).collect()
}

fn names_json<'a>(names: impl IntoIterator<Item = &'a Username>) -> Value {
    json!(names.into_iter().map(Username::as_str).collect::<Vec<_>>())
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Binds the command surface to the domain for one service instance.
pub struct UserService<S: StateStore, T: Transport, C: ClusterBus> {
    store: Arc<S>,
    transport: Arc<T>,
    cluster: Arc<C>,
    room: Room<S>,
    direct: DirectMessaging<S>,
    config: Arc<ServiceConfig>,
}

impl<S: StateStore + 'static, T: Transport + 'static, C: ClusterBus + 'static> UserService<S, T, C> {
    pub fn new(store: Arc<S>, transport: Arc<T>, cluster: Arc<C>, config: Arc<ServiceConfig>) -> Self {
        Self {
            room: Room::new(store.clone()),
            direct: DirectMessaging::new(store.clone()),
            store,
            transport,
            cluster,
            config,
        }
    }

    fn require_direct_messages(&self) -> Result<()> {
        if self.config.enable_direct_messages {
            Ok(())
        } else {
            Err(error::not_allowed(["enableDirectMessages"]))
        }
    }

    fn require_rooms_management(&self) -> Result<()> {
        if self.config.enable_rooms_management {
            Ok(())
        } else {
            Err(error::not_allowed(["enableRoomsManagement"]))
        }
    }

    /// Resolves `command`, checks its argument shape, and runs it through
    /// the five-step hook pipeline.
    pub async fn dispatch(
        &self,
        hooks: &crate::hooks::HookRegistry,
        user: &Username,
        socket: &GlobalSocketId,
        command: &str,
        args: HookArgs,
    ) -> crate::hooks::CommandOutcome {
        let kind = match CommandKind::from_str(command) {
            Ok(kind) => kind,
            Err(_) => return crate::hooks::CommandOutcome::err(error::bad_argument([command.to_string()])),
        };
        let shape = shape_for(kind);
        let command_owned = command.to_string();

        hooks
            .run(
                command,
                user,
                socket,
                args,
                |args| check_shape(&command_owned, args, shape),
                |args| self.execute(kind, user, socket, args),
            )
            .await
    }

    async fn execute(&self, kind: CommandKind, user: &Username, socket: &GlobalSocketId, args: HookArgs) -> Result<Value> {
        use CommandKind::*;
        match kind {
            DirectAddToList => self.exec_direct_add_to_list(user, &args).await,
            DirectRemoveFromList => self.exec_direct_remove_from_list(user, &args).await,
            DirectGetAccessList => self.exec_direct_get_access_list(user, &args).await,
            DirectGetWhitelistMode => self.exec_direct_get_whitelist_mode(user).await,
            DirectSetWhitelistMode => self.exec_direct_set_whitelist_mode(user, &args).await,
            DirectMessage => self.exec_direct_message(user, socket, &args).await,
            RoomCreate => self.exec_room_create(user, &args).await,
            RoomDelete => self.exec_room_delete(user, &args).await,
            RoomJoin => self.exec_room_join(user, socket, &args).await,
            RoomLeave => self.exec_room_leave(user, socket, &args).await,
            RoomMessage => self.exec_room_message(user, &args).await,
            RoomAddToList => self.exec_room_add_to_list(user, &args).await,
            RoomRemoveFromList => self.exec_room_remove_from_list(user, &args).await,
            RoomGetAccessList => self.exec_room_get_access_list(user, &args).await,
            RoomGetWhitelistMode => self.exec_room_get_whitelist_mode(user, &args).await,
            RoomSetWhitelistMode => self.exec_room_set_whitelist_mode(user, &args).await,
            RoomHistory => self.exec_room_history(user, &args).await,
            ListRooms => self.exec_list_rooms().await,
            Disconnect => self.exec_disconnect(user, socket).await,
        }
    }

    // -- Direct messaging ------------------------------------------------

    async fn exec_direct_add_to_list(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        self.require_direct_messages()?;
        let which = direct_list_kind(&str_arg(args, 0))?;
        let targets = usernames_from_strings(string_vec_arg(args, 1))?;
        self.direct.add_to_list(user, which, &targets).await?;
        Ok(Value::Null)
    }

    async fn exec_direct_remove_from_list(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        self.require_direct_messages()?;
        let which = direct_list_kind(&str_arg(args, 0))?;
        let targets = usernames_from_strings(string_vec_arg(args, 1))?;
        self.direct.remove_from_list(user, which, &targets).await?;
        Ok(Value::Null)
    }

    async fn exec_direct_get_access_list(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        self.require_direct_messages()?;
        let which = direct_list_kind(&str_arg(args, 0))?;
        let list = self.direct.get_list(user, which).await?;
        Ok(names_json(&list))
    }

    async fn exec_direct_get_whitelist_mode(&self, user: &Username) -> Result<Value> {
        self.require_direct_messages()?;
        Ok(json!(self.direct.get_whitelist_mode(user).await?))
    }

    async fn exec_direct_set_whitelist_mode(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        self.require_direct_messages()?;
        self.direct.set_whitelist_mode(user, bool_arg(args, 0)).await?;
        Ok(Value::Null)
    }

    async fn exec_direct_message(&self, user: &Username, socket: &GlobalSocketId, args: &HookArgs) -> Result<Value> {
        self.require_direct_messages()?;
        let recipient = Username::new(str_arg(args, 0))?;
        let text = message_input_arg(args, 1);
        let message = self
            .direct
            .message(&recipient, user, MessageInput { text_message: text }, now_ms())
            .await?;
        let payload = serde_json::to_value(&message).map_err(|_| error::server_error())?;

        self.transport
            .emit_to_channel_except_sender(
                socket,
                &ChannelId::UserEcho(user.clone()),
                "directMessageEcho",
                vec![json!(recipient.as_str()), payload.clone()],
            )
            .await;
        self.transport
            .emit_to_channel(
                &ChannelId::UserEcho(recipient),
                "directMessage",
                vec![json!(user.as_str()), payload.clone()],
            )
            .await;

        Ok(payload)
    }

    // -- Rooms -------------------------------------------------------------

    async fn exec_room_create(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        self.require_rooms_management()?;
        let name = RoomName::new(str_arg(args, 0))?;
        let whitelist_only = bool_arg(args, 1);
        let record = RoomRecord::new(name.clone(), Some(user.clone()), whitelist_only, self.config.history_max_messages);
        self.store.add_room(record).await.map_err(|e| match e {
            StoreError::RoomAlreadyExists => error::room_exists([name.as_str()]),
            other => {
                tracing::error!(error = %other, "state store failure");
                error::server_error()
            }
        })?;
        Ok(Value::Null)
    }

    async fn exec_room_delete(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        self.require_rooms_management()?;
        let name = RoomName::new(str_arg(args, 0))?;
        self.room.check_is_owner(&name, user).await?;
        let members = self.room.get_list(&name, user, RoomList::Userlist).await?;
        self.store
            .remove_room(&name)
            .await
            .map_err(|_| error::server_error())?;
        self.evict_from_room(&name, &members).await;
        Ok(Value::Null)
    }

    async fn exec_room_join(&self, user: &Username, socket: &GlobalSocketId, args: &HookArgs) -> Result<Value> {
        let name = RoomName::new(str_arg(args, 0))?;
        let already_joined = self
            .store
            .user_rooms_get_all(user)
            .await
            .map_err(|_| error::server_error())?
            .contains(&name);

        self.room.join(&name, user).await?;

        if socket.instance_id == *self.transport.instance_id() {
            self.transport.join_channel(socket, &ChannelId::Room(name.clone())).await?;
        }

        if !already_joined {
            self.store
                .user_room_add(user, &name)
                .await
                .map_err(|_| error::server_error())?;
            if self.config.enable_userlist_updates {
                self.transport
                    .emit_to_channel_except_sender(
                        socket,
                        &ChannelId::Room(name.clone()),
                        "roomUserJoined",
                        vec![json!(name.as_str()), json!(user.as_str())],
                    )
                    .await;
            }
            self.transport
                .emit_to_channel_except_sender(socket, &ChannelId::UserEcho(user.clone()), "roomJoinedEcho", vec![json!(name.as_str())])
                .await;
        }

        Ok(Value::Null)
    }

    async fn exec_room_leave(&self, user: &Username, socket: &GlobalSocketId, args: &HookArgs) -> Result<Value> {
        let name = RoomName::new(str_arg(args, 0))?;
        self.room.leave(&name, user).await?;
        let _ = self.store.user_room_remove(user, &name).await;

        let sockets = self.store.sockets_get_all(user).await.unwrap_or_default();
        for s in sockets {
            if s.instance_id == *self.transport.instance_id() {
                self.transport.leave_channel(&s, &ChannelId::Room(name.clone())).await;
            } else {
                let _ = self.cluster.room_leave_socket(s, name.clone()).await;
            }
        }

        if self.config.enable_userlist_updates {
            self.transport
                .emit_to_channel_except_sender(
                    socket,
                    &ChannelId::Room(name.clone()),
                    "roomUserLeft",
                    vec![json!(name.as_str()), json!(user.as_str())],
                )
                .await;
        }
        self.transport
            .emit_to_channel_except_sender(socket, &ChannelId::UserEcho(user.clone()), "roomLeftEcho", vec![json!(name.as_str())])
            .await;

        Ok(Value::Null)
    }

    async fn exec_room_message(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        let name = RoomName::new(str_arg(args, 0))?;
        let text = message_input_arg(args, 1);
        let message = self.room.message(&name, user, MessageInput { text_message: text }, now_ms()).await?;
        let payload = serde_json::to_value(&message).map_err(|_| error::server_error())?;
        self.transport
            .emit_to_channel(
                &ChannelId::Room(name.clone()),
                "roomMessage",
                vec![json!(name.as_str()), json!(user.as_str()), payload.clone()],
            )
            .await;
        Ok(payload)
    }

    async fn exec_room_add_to_list(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        self.require_rooms_management()?;
        let name = RoomName::new(str_arg(args, 0))?;
        let which = room_list_kind(&str_arg(args, 1))?;
        let targets = usernames_from_strings(string_vec_arg(args, 2))?;
        let lost = self.room.add_to_list(&name, user, which, &targets).await?;
        self.evict_from_room(&name, &lost).await;
        Ok(Value::Null)
    }

    async fn exec_room_remove_from_list(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        self.require_rooms_management()?;
        let name = RoomName::new(str_arg(args, 0))?;
        let which = room_list_kind(&str_arg(args, 1))?;
        let targets = usernames_from_strings(string_vec_arg(args, 2))?;
        let lost = self.room.remove_from_list(&name, user, which, &targets).await?;
        self.evict_from_room(&name, &lost).await;
        Ok(Value::Null)
    }

    async fn exec_room_get_access_list(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        let name = RoomName::new(str_arg(args, 0))?;
        let which = room_list_kind(&str_arg(args, 1))?;
        let list = self.room.get_list(&name, user, which).await?;
        Ok(names_json(&list))
    }

    async fn exec_room_get_whitelist_mode(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        let name = RoomName::new(str_arg(args, 0))?;
        Ok(json!(self.room.get_mode(&name, user).await?))
    }

    async fn exec_room_set_whitelist_mode(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        self.require_rooms_management()?;
        let name = RoomName::new(str_arg(args, 0))?;
        let value = bool_arg(args, 1);
        let lost = self.room.change_mode(&name, user, value).await?;
        self.evict_from_room(&name, &lost).await;
        Ok(Value::Null)
    }

    async fn exec_room_history(&self, user: &Username, args: &HookArgs) -> Result<Value> {
        let name = RoomName::new(str_arg(args, 0))?;
        let history = self.room.history(&name, user).await?;
        serde_json::to_value(&history).map_err(|_| error::server_error())
    }

    async fn exec_list_rooms(&self) -> Result<Value> {
        let rooms = self.store.list_rooms().await.map_err(|_| error::server_error())?;
        Ok(json!(rooms.iter().map(RoomName::as_str).collect::<Vec<_>>()))
    }

    async fn exec_disconnect(&self, user: &Username, socket: &GlobalSocketId) -> Result<Value> {
        self.handle_disconnect(user, socket).await;
        self.cluster.user_offline(user.clone(), socket.clone()).await;
        if socket.instance_id == *self.transport.instance_id() {
            self.transport.disconnect(socket).await;
        }
        Ok(Value::Null)
    }

    /// Removes `socket` from `user`'s lost-access room(s) roster and, only
    /// once the presence set is empty, runs the all-rooms-leave path and
    /// logs the user out. Shared by the `disconnect` command and the
    /// transport's own connection-teardown path.
    pub async fn handle_disconnect(&self, user: &Username, socket: &GlobalSocketId) {
        let remaining = match self.store.socket_remove(user, socket).await {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "state store failure removing socket");
                return;
            }
        };
        if remaining > 0 {
            return;
        }

        let rooms = self.store.user_rooms_get_all(user).await.unwrap_or_default();
        for room in rooms {
            if self.room.leave(&room, user).await.is_ok() && self.config.enable_userlist_updates {
                self.transport
                    .emit_to_channel(
                        &ChannelId::Room(room.clone()),
                        "roomUserLeft",
                        vec![json!(room.as_str()), json!(user.as_str())],
                    )
                    .await;
            }
            let _ = self.store.user_room_remove(user, &room).await;
        }
        let _ = self.store.logout_user(user).await;
    }

    /// Evicts every member of `lost` from `room`: notifies each on its echo
    /// channel, removes their sockets from the room's channel (locally or
    /// via the cluster bus), and drops the room from their joined set.
    async fn evict_from_room(&self, room: &RoomName, lost: &[Username]) {
        for member in lost {
            self.transport
                .emit_to_channel(&ChannelId::UserEcho(member.clone()), "roomAccessRemoved", vec![json!(room.as_str())])
                .await;
            let sockets = self.store.sockets_get_all(member).await.unwrap_or_default();
            for socket in sockets {
                if socket.instance_id == *self.transport.instance_id() {
                    self.transport.leave_channel(&socket, &ChannelId::Room(room.clone())).await;
                } else {
                    let _ = self.cluster.room_leave_socket(socket, room.clone()).await;
                }
            }
            let _ = self.store.user_room_remove(member, room).await;
        }
    }
}
