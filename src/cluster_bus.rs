//! ClusterBus (spec §4.7): a pub/sub layer over `Transport::broadcast`,
//! restricted to a reserved channel, with request/reply by naming
//! convention (`E:done:<correlation>`).
//!
//! Grounded on the teacher's `core/events.rs` `EventDispatcher`: a
//! `broadcast::Sender` wrapped with `RwLock`-guarded online-registry state
//! using the same first-connect/last-disconnect counting rule (I4).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{broadcast, oneshot, RwLock};
use tokio::time::Duration;

use crate::domain::{GlobalSocketId, RoomName, Username};
use crate::error::{self, Error};
use crate::transport::{Transport, WsTransport};

/// The two mandatory cross-instance events (spec §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase")]
enum BusEvent {
    RoomLeaveSocket {
        socket: GlobalSocketId,
        room: RoomName,
        correlation: u64,
    },
    SocketRoomLeft {
        correlation: u64,
    },
    DisconnectUserSockets {
        user: Username,
    },
}

/// Registered by `ChatService` so this instance can react to another
/// instance's `disconnectUserSockets` broadcast by disconnecting whichever
/// of `user`'s sockets are local to it.
#[async_trait]
pub trait DisconnectHandler: Send + Sync {
    async fn handle_disconnect_user_sockets(&self, user: Username);
}

#[async_trait]
pub trait ClusterBus: Send + Sync {
    /// Instructs whichever instance owns `socket` to leave `room`'s channel;
    /// awaits that instance's completion echo, bounded by `busAckTimeout`.
    async fn room_leave_socket(&self, socket: GlobalSocketId, room: RoomName) -> Result<(), Error>;
    /// Instructs every instance holding a socket for `user` to disconnect
    /// those sockets locally. Fire-and-forget: no acknowledgement.
    async fn disconnect_user_sockets(&self, user: Username);
    /// Registers the local handler invoked when this instance receives a
    /// `disconnectUserSockets` broadcast (including its own).
    async fn set_disconnect_handler(&self, handler: Arc<dyn DisconnectHandler>);

    /// First-connect/last-disconnect online registry (I4).
    async fn user_online(&self, user: Username, socket: GlobalSocketId);
    async fn user_offline(&self, user: Username, socket: GlobalSocketId) -> bool;
    async fn is_online(&self, user: &Username) -> bool;
    async fn online_users(&self) -> Vec<Username>;
}

struct Inner {
    sender: broadcast::Sender<BusEvent>,
    online_users: RwLock<HashSet<Username>>,
    connection_counts: RwLock<HashMap<Username, u32>>,
    pending: RwLock<HashMap<u64, oneshot::Sender<()>>>,
    next_correlation: AtomicU64,
    ack_timeout: Duration,
    disconnect_handler: RwLock<Option<Arc<dyn DisconnectHandler>>>,
}

/// In-process reference implementation: `Transport::broadcast` is simulated
/// by a local `tokio::sync::broadcast` channel, which is faithful to the
/// contract for a single-process deployment and for tests; a true
/// multi-process deployment would back this with the transport's actual
/// broadcast primitive (e.g. a message queue) instead.
pub struct LocalClusterBus<T: Transport> {
    transport: Arc<T>,
    inner: Arc<Inner>,
}

impl<T: Transport + 'static> LocalClusterBus<T> {
    pub fn new(transport: Arc<T>, ack_timeout: Duration) -> Arc<Self> {
        let (sender, _) = broadcast::channel(1024);
        let inner = Arc::new(Inner {
            sender,
            online_users: RwLock::new(HashSet::new()),
            connection_counts: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            next_correlation: AtomicU64::new(1),
            ack_timeout,
            disconnect_handler: RwLock::new(None),
        });
        let bus = Arc::new(Self {
            transport,
            inner: inner.clone(),
        });
        bus.spawn_listener();
        bus
    }

    /// Listens to this process's own broadcasts and reacts to the two
    /// mandatory events, as every other instance would.
    fn spawn_listener(self: &Arc<Self>) {
        let mut rx = self.inner.sender.subscribe();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Ok(event) = rx.recv().await {
                this.handle_event(event).await;
            }
        });
    }

    async fn handle_event(&self, event: BusEvent) {
        match event {
            BusEvent::RoomLeaveSocket { socket, room, correlation } => {
                self.transport
                    .leave_channel(&socket, &crate::domain::ChannelId::Room(room))
                    .await;
                let _ = self.inner.sender.send(BusEvent::SocketRoomLeft { correlation });
            }
            BusEvent::SocketRoomLeft { correlation } => {
                if let Some(tx) = self.inner.pending.write().await.remove(&correlation) {
                    let _ = tx.send(());
                }
            }
            BusEvent::DisconnectUserSockets { user } => {
                if let Some(handler) = self.inner.disconnect_handler.read().await.clone() {
                    handler.handle_disconnect_user_sockets(user).await;
                }
            }
        }
    }
}

#[async_trait]
impl<T: Transport + 'static> ClusterBus for LocalClusterBus<T> {
    async fn room_leave_socket(&self, socket: GlobalSocketId, room: RoomName) -> Result<(), Error> {
        let correlation = self.inner.next_correlation.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.inner.pending.write().await.insert(correlation, tx);

        let _ = self.inner.sender.send(BusEvent::RoomLeaveSocket { socket, room, correlation });

        match tokio::time::timeout(self.inner.ack_timeout, rx).await {
            Ok(Ok(())) => Ok(()),
            _ => {
                self.inner.pending.write().await.remove(&correlation);
                Err(error::server_error())
            }
        }
    }

    async fn disconnect_user_sockets(&self, user: Username) {
        let _ = self.inner.sender.send(BusEvent::DisconnectUserSockets { user });
    }

    async fn set_disconnect_handler(&self, handler: Arc<dyn DisconnectHandler>) {
        *self.inner.disconnect_handler.write().await = Some(handler);
    }

    async fn user_online(&self, user: Username, _socket: GlobalSocketId) {
        let mut counts = self.inner.connection_counts.write().await;
        let count = counts.entry(user.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            self.inner.online_users.write().await.insert(user);
        }
    }

    /// Returns `true` iff this was the user's last socket anywhere (I4).
    async fn user_offline(&self, user: Username, _socket: GlobalSocketId) -> bool {
        let mut counts = self.inner.connection_counts.write().await;
        let last = match counts.get_mut(&user) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            _ => {
                counts.remove(&user);
                true
            }
        };
        if last {
            self.inner.online_users.write().await.remove(&user);
        }
        last
    }

    async fn is_online(&self, user: &Username) -> bool {
        self.inner.online_users.read().await.contains(user)
    }

    async fn online_users(&self) -> Vec<Username> {
        self.inner.online_users.read().await.iter().cloned().collect()
    }
}

/// Exposed for `serde_json` payloads passed through `Transport::broadcast`
/// by implementations that really do cross a process boundary.
pub fn encode_packet(event: &str, payload: Value) -> Value {
    serde_json::json!({ "event": event, "payload": payload })
}

</content>
