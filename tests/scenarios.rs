//! End-to-end scenario tests driving a full `ChatService` through a fake
//! `Transport`, covering the six scenarios and the P1-P7 invariants
//! enumerated in the spec's testable-properties section.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::Duration;

use chatcore::cluster_bus::{ClusterBus, LocalClusterBus};
use chatcore::config::ServiceConfig;
use chatcore::domain::{ChannelId, GlobalSocketId, InstanceId, RoomName, SocketId, Username};
use chatcore::error::Error;
use chatcore::hooks::HookRegistry;
use chatcore::protocol::{ClientFrame, ServerFrame};
use chatcore::state::{MemoryStateStore, RoomRecord, StateStore};
use chatcore::transport::{ConnectHandler, Transport};
use chatcore::ChatService;

/// A `Transport` double that records every event it's asked to fan out and
/// tracks channel membership in-process, so scenario tests can assert on
/// who received what without a real socket.
struct FakeTransport {
    instance_id: InstanceId,
    events: Mutex<Vec<(GlobalSocketId, &'static str, Vec<Value>)>>,
    channels: AsyncMutex<HashMap<ChannelId, HashSet<GlobalSocketId>>>,
    connected: AsyncMutex<HashSet<GlobalSocketId>>,
    disconnected: Mutex<Vec<GlobalSocketId>>,
}

impl FakeTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            instance_id: InstanceId::generate(),
            events: Mutex::new(Vec::new()),
            channels: AsyncMutex::new(HashMap::new()),
            connected: AsyncMutex::new(HashSet::new()),
            disconnected: Mutex::new(Vec::new()),
        })
    }

    async fn connect(&self, socket: &GlobalSocketId) {
        self.connected.lock().await.insert(socket.clone());
    }

    fn events_for(&self, socket: &GlobalSocketId, name: &str) -> Vec<Vec<Value>> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(s, n, _)| s == socket && *n == name)
            .map(|(_, _, args)| args.clone())
            .collect()
    }

    fn count_for(&self, socket: &GlobalSocketId, name: &str) -> usize {
        self.events_for(socket, name).len()
    }

    fn was_disconnected(&self, socket: &GlobalSocketId) -> bool {
        self.disconnected.lock().unwrap().contains(socket)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    async fn emit_to_socket(&self, socket: &GlobalSocketId, event: &'static str, args: Vec<Value>) {
        self.events.lock().unwrap().push((socket.clone(), event, args));
    }

    async fn emit_to_channel(&self, channel: &ChannelId, event: &'static str, args: Vec<Value>) {
        let members = self.channels.lock().await.get(channel).cloned().unwrap_or_default();
        for member in members {
            self.events.lock().unwrap().push((member, event, args.clone()));
        }
    }

    async fn emit_to_channel_except_sender(&self, sender: &GlobalSocketId, channel: &ChannelId, event: &'static str, args: Vec<Value>) {
        let members = self.channels.lock().await.get(channel).cloned().unwrap_or_default();
        for member in members {
            if member == *sender {
                continue;
            }
            self.events.lock().unwrap().push((member, event, args.clone()));
        }
    }

    async fn join_channel(&self, socket: &GlobalSocketId, channel: &ChannelId) -> Result<(), Error> {
        self.channels.lock().await.entry(channel.clone()).or_default().insert(socket.clone());
        Ok(())
    }

    async fn leave_channel(&self, socket: &GlobalSocketId, channel: &ChannelId) {
        if let Some(members) = self.channels.lock().await.get_mut(channel) {
            members.remove(socket);
        }
    }

    async fn disconnect(&self, socket: &GlobalSocketId) {
        self.connected.lock().await.remove(socket);
        self.disconnected.lock().unwrap().push(socket.clone());
    }

    async fn broadcast(&self, _packet: Value) {}
}

type Service = ChatService<MemoryStateStore, FakeTransport, LocalClusterBus<FakeTransport>>;

fn socket_on(instance: &InstanceId) -> GlobalSocketId {
    GlobalSocketId::new(instance.clone(), SocketId::generate())
}

async fn harness(config: ServiceConfig) -> (Arc<Service>, Arc<FakeTransport>, Arc<MemoryStateStore>, Arc<LocalClusterBus<FakeTransport>>) {
    let store = Arc::new(MemoryStateStore::new());
    let transport = FakeTransport::new();
    let cluster = LocalClusterBus::new(transport.clone(), Duration::from_millis(200));
    let service = ChatService::new(store.clone(), transport.clone(), cluster.clone(), HookRegistry::new(), Arc::new(config));
    cluster.set_disconnect_handler(service.clone()).await;
    (service, transport, store, cluster)
}

async fn connect(service: &Arc<Service>, transport: &Arc<FakeTransport>, user: &Username) -> GlobalSocketId {
    let socket = socket_on(transport.instance_id());
    transport.connect(&socket).await;
    service.on_connect(socket.clone(), user.clone()).await;
    socket
}

fn frame(command: &str, args: Vec<Value>) -> ClientFrame {
    ClientFrame {
        command: command.to_string(),
        args,
        request_id: 1,
    }
}

fn ack_error(frame: ServerFrame) -> Option<Value> {
    match frame {
        ServerFrame::Ack { error, .. } => error.map(|e| serde_json::to_value(e).unwrap()),
        ServerFrame::Event { .. } => panic!("expected an ack, got an event"),
    }
}

fn ack_data(frame: ServerFrame) -> Option<Value> {
    match frame {
        ServerFrame::Ack { data, .. } => data,
        ServerFrame::Event { .. } => panic!("expected an ack, got an event"),
    }
}

async fn add_room(store: &MemoryStateStore, name: &str, owner: Option<&Username>, whitelist_only: bool) -> RoomName {
    let room_name = RoomName::new(name).unwrap();
    store
        .add_room(RoomRecord::new(room_name.clone(), owner.cloned(), whitelist_only, 100))
        .await
        .unwrap();
    room_name
}

// Scenario 1: join/leave (spec §8.1).
#[tokio::test]
async fn scenario_join_leave_notifies_existing_members() {
    let mut config = ServiceConfig::default();
    config.enable_userlist_updates = true;
    config.use_raw_error_objects = true;
    let (service, transport, store, _cluster) = harness(config).await;
    add_room(&store, "room1", None, false).await;

    let user1 = Username::new("user1").unwrap();
    let user2 = Username::new("user2").unwrap();
    let s1 = connect(&service, &transport, &user1).await;
    let s2 = connect(&service, &transport, &user2).await;

    let reply = service.on_command(s1.clone(), frame("roomJoin", vec![json!("room1")])).await;
    assert!(ack_error(reply).is_none());

    let reply = service.on_command(s2.clone(), frame("roomJoin", vec![json!("room1")])).await;
    assert!(ack_error(reply).is_none());

    let joined = transport.events_for(&s1, "roomUserJoined");
    assert_eq!(joined, vec![vec![json!("room1"), json!("user2")]]);

    let reply = service.on_command(s2.clone(), frame("roomLeave", vec![json!("room1")])).await;
    assert!(ack_error(reply).is_none());

    let left = transport.events_for(&s1, "roomUserLeft");
    assert_eq!(left, vec![vec![json!("room1"), json!("user2")]]);
}

// Scenario 2: blacklist eviction (spec §8.2, P2).
#[tokio::test]
async fn scenario_blacklist_eviction_removes_and_notifies() {
    let mut config = ServiceConfig::default();
    config.enable_rooms_management = true;
    config.use_raw_error_objects = true;
    let (service, transport, store, _cluster) = harness(config).await;

    let owner = Username::new("user1").unwrap();
    let member = Username::new("user2").unwrap();
    let owner_socket = connect(&service, &transport, &owner).await;
    let member_socket = connect(&service, &transport, &member).await;

    add_room(&store, "room1", Some(&owner), false).await;

    service.on_command(owner_socket.clone(), frame("roomJoin", vec![json!("room1")])).await;
    service.on_command(member_socket.clone(), frame("roomJoin", vec![json!("room1")])).await;

    let reply = service
        .on_command(owner_socket.clone(), frame("roomAddToList", vec![json!("room1"), json!("blacklist"), json!(["user2"])]))
        .await;
    assert!(ack_error(reply).is_none());

    assert_eq!(transport.events_for(&member_socket, "roomAccessRemoved"), vec![vec![json!("room1")]]);

    let reply = service.on_command(owner_socket.clone(), frame("roomGetAccessList", vec![json!("room1"), json!("userlist")])).await;
    let userlist = ack_data(reply).unwrap();
    assert_eq!(userlist, json!(["user1"]));
}

// Scenario 3: whitelist-only flip evicts non-admin, non-whitelisted members
// (spec §8.3, P3).
#[tokio::test]
async fn scenario_whitelist_only_flip_evicts_plain_members() {
    let mut config = ServiceConfig::default();
    config.enable_rooms_management = true;
    config.use_raw_error_objects = true;
    let (service, transport, store, _cluster) = harness(config).await;

    let owner = Username::new("owner").unwrap();
    let admin = Username::new("admin").unwrap();
    let plain = Username::new("plain").unwrap();
    let owner_socket = connect(&service, &transport, &owner).await;
    let admin_socket = connect(&service, &transport, &admin).await;
    let plain_socket = connect(&service, &transport, &plain).await;

    add_room(&store, "room1", Some(&owner), false).await;

    service.on_command(owner_socket.clone(), frame("roomJoin", vec![json!("room1")])).await;
    service.on_command(admin_socket.clone(), frame("roomJoin", vec![json!("room1")])).await;
    service.on_command(plain_socket.clone(), frame("roomJoin", vec![json!("room1")])).await;

    let reply = service
        .on_command(owner_socket.clone(), frame("roomAddToList", vec![json!("room1"), json!("adminlist"), json!(["admin"])]))
        .await;
    assert!(ack_error(reply).is_none());

    let reply = service
        .on_command(owner_socket.clone(), frame("roomSetWhitelistMode", vec![json!("room1"), json!(true)]))
        .await;
    assert!(ack_error(reply).is_none());

    assert_eq!(transport.events_for(&plain_socket, "roomAccessRemoved"), vec![vec![json!("room1")]]);
    assert!(transport.events_for(&owner_socket, "roomAccessRemoved").is_empty());
    assert!(transport.events_for(&admin_socket, "roomAccessRemoved").is_empty());
}

// Scenario 4: direct message echo fan-out (spec §8.4).
#[tokio::test]
async fn scenario_direct_message_echoes_to_other_sockets_and_recipient() {
    let mut config = ServiceConfig::default();
    config.enable_direct_messages = true;
    config.use_raw_error_objects = true;
    let (service, transport, _store, _cluster) = harness(config).await;

    let user1 = Username::new("user1").unwrap();
    let user2 = Username::new("user2").unwrap();
    let s1 = connect(&service, &transport, &user1).await;
    let s2 = connect(&service, &transport, &user1).await;
    let recipient_socket = connect(&service, &transport, &user2).await;

    let reply = service
        .on_command(s1.clone(), frame("directMessage", vec![json!("user2"), json!({"textMessage": "hi"})]))
        .await;
    let ack = ack_data(reply).unwrap();
    assert_eq!(ack["textMessage"], json!("hi"));
    assert_eq!(ack["author"], json!("user1"));

    let echoes = transport.events_for(&s2, "directMessageEcho");
    assert_eq!(echoes.len(), 1);
    assert_eq!(echoes[0][0], json!("user2"));

    assert!(transport.events_for(&s1, "directMessageEcho").is_empty());

    let delivered = transport.events_for(&recipient_socket, "directMessage");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0][0], json!("user1"));
}

// Scenario 5: bounded history (spec §8.5, P4).
#[tokio::test]
async fn scenario_history_is_bounded_to_the_configured_maximum() {
    let mut config = ServiceConfig::default();
    config.history_max_messages = 3;
    config.use_raw_error_objects = true;
    let (service, transport, store, _cluster) = harness(config).await;

    let user1 = Username::new("user1").unwrap();
    let socket = connect(&service, &transport, &user1).await;
    add_room(&store, "room1", Some(&user1), false).await;
    service.on_command(socket.clone(), frame("roomJoin", vec![json!("room1")])).await;

    for i in 0..5 {
        service
            .on_command(socket.clone(), frame("roomMessage", vec![json!("room1"), json!({"textMessage": format!("m{i}")})]))
            .await;
    }

    let reply = service.on_command(socket.clone(), frame("roomHistory", vec![json!("room1")])).await;
    let history = ack_data(reply).unwrap();
    let texts: Vec<&str> = history.as_array().unwrap().iter().map(|m| m["textMessage"].as_str().unwrap()).collect();
    assert_eq!(texts, vec!["m2", "m3", "m4"]);
}

// Scenario 6 (approximated in-process, per the reference ClusterBus's
// single-process scope documented alongside its definition):
// disconnectUserSockets disconnects every socket the local transport holds
// for a user, driven through the cluster bus exactly as an operator's
// out-of-band call would.
#[tokio::test]
async fn scenario_disconnect_user_sockets_clears_every_local_socket() {
    let config = ServiceConfig::default();
    let (service, transport, _store, cluster) = harness(config).await;

    let user1 = Username::new("user1").unwrap();
    let s1 = connect(&service, &transport, &user1).await;
    let s2 = connect(&service, &transport, &user1).await;

    cluster.disconnect_user_sockets(user1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(transport.was_disconnected(&s1));
    assert!(transport.was_disconnected(&s2));
}

// P5: K sockets of one user joining a room produce a single roomUserJoined
// notification to existing members, not K.
#[tokio::test]
async fn p5_multi_socket_join_emits_one_presence_event() {
    let mut config = ServiceConfig::default();
    config.enable_userlist_updates = true;
    config.use_raw_error_objects = true;
    let (service, transport, store, _cluster) = harness(config).await;

    let observer = Username::new("observer").unwrap();
    let joiner = Username::new("joiner").unwrap();
    let observer_socket = connect(&service, &transport, &observer).await;
    add_room(&store, "room1", None, false).await;
    service.on_command(observer_socket.clone(), frame("roomJoin", vec![json!("room1")])).await;

    let j1 = connect(&service, &transport, &joiner).await;
    let j2 = connect(&service, &transport, &joiner).await;
    let j3 = connect(&service, &transport, &joiner).await;

    service.on_command(j1.clone(), frame("roomJoin", vec![json!("room1")])).await;
    service.on_command(j2.clone(), frame("roomJoin", vec![json!("room1")])).await;
    service.on_command(j3.clone(), frame("roomJoin", vec![json!("room1")])).await;

    assert_eq!(transport.count_for(&observer_socket, "roomUserJoined"), 1);
}

// P7: after the final socket disconnect, the user is absent from every
// room's userlist.
#[tokio::test]
async fn p7_final_disconnect_removes_user_from_every_joined_room() {
    let config = ServiceConfig::default();
    let (service, transport, store, _cluster) = harness(config).await;

    let user1 = Username::new("user1").unwrap();
    let socket = connect(&service, &transport, &user1).await;
    let room = add_room(&store, "room1", None, false).await;
    service.on_command(socket.clone(), frame("roomJoin", vec![json!("room1")])).await;

    service.on_disconnect(socket).await;

    let record = store.get_room(&room).await.unwrap();
    assert!(!record.userlist.contains(&user1));
}

// Idempotence: addToList then removeFromList on the same values restores
// the prior (empty) set.
#[tokio::test]
async fn round_trip_add_then_remove_restores_whitelist() {
    let mut config = ServiceConfig::default();
    config.enable_rooms_management = true;
    config.use_raw_error_objects = true;
    let (service, transport, store, _cluster) = harness(config).await;

    let owner = Username::new("owner").unwrap();
    let socket = connect(&service, &transport, &owner).await;
    add_room(&store, "room1", Some(&owner), false).await;

    service.on_command(socket.clone(), frame("roomAddToList", vec![json!("room1"), json!("whitelist"), json!(["someone"])])).await;
    service
        .on_command(socket.clone(), frame("roomRemoveFromList", vec![json!("room1"), json!("whitelist"), json!(["someone"])]))
        .await;

    let reply = service.on_command(socket, frame("roomGetAccessList", vec![json!("room1"), json!("whitelist")])).await;
    let list = ack_data(reply).unwrap();
    assert_eq!(list, json!([] as [String; 0]));
}

// Wrong arity / bad argument validation short-circuits before the command
// ever reaches execution.
#[tokio::test]
async fn validation_errors_precede_command_execution() {
    let mut config = ServiceConfig::default();
    config.use_raw_error_objects = true;
    let (service, transport, _store, _cluster) = harness(config).await;

    let user1 = Username::new("user1").unwrap();
    let socket = connect(&service, &transport, &user1).await;

    let reply = service.on_command(socket.clone(), frame("roomJoin", vec![])).await;
    let error = ack_error(reply).unwrap();
    assert_eq!(error["name"], json!("wrongArgumentsCount"));

    let reply = service.on_command(socket, frame("roomJoin", vec![json!(42)])).await;
    let error = ack_error(reply).unwrap();
    assert_eq!(error["name"], json!("badArgument"));
}
