//! `ChatService`: the composition root binding `StateStore`, `Transport`,
//! `ClusterBus`, `HookRegistry`, and `UserService` into the one object a
//! `Transport` talks to (spec §4.1 "ChatService" / §4.8 "Lifecycle").
//!
//! Grounded on the teacher's `server/mod.rs` `ChatServer`: a struct wired
//! once at startup, implementing the transport's connection-handler trait,
//! with a graceful-shutdown path that waits out in-flight work before
//! forcing disconnects.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Notify, RwLock};
use tracing::{info, warn};

use crate::cluster_bus::{ClusterBus, DisconnectHandler};
use crate::config::ServiceConfig;
use crate::domain::{ChannelId, GlobalSocketId, Username};
use crate::error;
use crate::hooks::{CommandOutcome, HookRegistry};
use crate::protocol::{ClientFrame, ServerFrame};
use crate::state::StateStore;
use crate::transport::{ConnectHandler, Transport};
use crate::user_service::UserService;

/// The one object a `Transport` drives: socket lifecycle in, frames out.
pub struct ChatService<S: StateStore, T: Transport, C: ClusterBus> {
    store: Arc<S>,
    transport: Arc<T>,
    cluster: Arc<C>,
    hooks: HookRegistry,
    users: UserService<S, T, C>,
    config: Arc<ServiceConfig>,
    sockets: RwLock<HashMap<GlobalSocketId, Username>>,
    inflight: AtomicU64,
    idle: Notify,
}

impl<S: StateStore + 'static, T: Transport + 'static, C: ClusterBus + 'static> ChatService<S, T, C> {
    pub fn new(store: Arc<S>, transport: Arc<T>, cluster: Arc<C>, hooks: HookRegistry, config: Arc<ServiceConfig>) -> Arc<Self> {
        let users = UserService::new(store.clone(), transport.clone(), cluster.clone(), config.clone());
        Arc::new(Self {
            store,
            transport,
            cluster,
            hooks,
            users,
            config,
            sockets: RwLock::new(HashMap::new()),
            inflight: AtomicU64::new(0),
            idle: Notify::new(),
        })
    }

    /// Registers this service as the transport's connection handler and the
    /// cluster bus's disconnect handler. Must run before `Transport::serve`.
    pub async fn attach(self: &Arc<Self>, ws: &Arc<crate::transport::WsTransport>) {
        ws.set_connect_handler(self.clone()).await;
        self.cluster.set_disconnect_handler(self.clone()).await;
    }

    /// Waits for in-flight commands to drain, bounded by `closeTimeoutSecs`
    /// (spec §4.8), then force-disconnects whatever sockets remain.
    pub async fn close(self: &Arc<Self>) {
        info!("chat service closing");
        let deadline = self.config.close_timeout();
        let wait = async {
            while self.inflight.load(Ordering::SeqCst) > 0 {
                self.idle.notified().await;
            }
        };
        if tokio::time::timeout(deadline, wait).await.is_err() {
            warn!(inflight = self.inflight.load(Ordering::SeqCst), "close timed out, forcing disconnects");
        }

        let sockets: Vec<GlobalSocketId> = self.sockets.read().await.keys().cloned().collect();
        for socket in sockets {
            self.transport.disconnect(&socket).await;
        }
    }

    async fn ack(&self, frame: &ClientFrame, outcome: CommandOutcome) -> ServerFrame {
        let error = outcome.error.map(|e| e.render(self.config.use_raw_error_objects));
        ServerFrame::ack(frame.request_id, error, outcome.data)
    }

    fn mark_busy(&self) {
        self.inflight.fetch_add(1, Ordering::SeqCst);
    }

    fn mark_idle(&self) {
        if self.inflight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

#[async_trait]
impl<S: StateStore + 'static, T: Transport + 'static, C: ClusterBus + 'static> ConnectHandler for ChatService<S, T, C> {
    async fn on_connect(&self, socket: GlobalSocketId, username: Username) {
        self.sockets.write().await.insert(socket.clone(), username.clone());
        if let Err(e) = self.store.login_user(&username, socket.clone()).await {
            tracing::error!(error = %e, "state store failure on connect");
            return;
        }
        self.cluster.user_online(username.clone(), socket.clone()).await;
        let _ = self.transport.join_channel(&socket, &ChannelId::UserEcho(username)).await;
    }

    async fn on_command(&self, socket: GlobalSocketId, frame: ClientFrame) -> ServerFrame {
        self.mark_busy();
        let username = self.sockets.read().await.get(&socket).cloned();
        let outcome = match username {
            Some(user) => {
                self.users
                    .dispatch(&self.hooks, &user, &socket, &frame.command, frame.args.clone())
                    .await
            }
            None => CommandOutcome::err(error::invalid_socket([socket.to_string()])),
        };
        let reply = self.ack(&frame, outcome).await;
        self.mark_idle();
        reply
    }

    async fn on_disconnect(&self, socket: GlobalSocketId) {
        let username = self.sockets.write().await.remove(&socket);
        if let Some(user) = username {
            self.users.handle_disconnect(&user, &socket).await;
            self.cluster.user_offline(user, socket).await;
        }
    }
}

#[async_trait]
impl<S: StateStore + 'static, T: Transport + 'static, C: ClusterBus + 'static> DisconnectHandler for ChatService<S, T, C> {
    /// Reacts to another instance's `disconnectUserSockets` broadcast by
    /// tearing down whichever of `user`'s sockets are local to this one.
    async fn handle_disconnect_user_sockets(&self, user: Username) {
        let local: Vec<GlobalSocketId> = {
            let sockets = self.sockets.read().await;
            sockets
                .iter()
                .filter(|(socket, name)| socket.instance_id == *self.transport.instance_id() && **name == user)
                .map(|(socket, _)| socket.clone())
                .collect()
        };
        for socket in local {
            self.users.handle_disconnect(&user, &socket).await;
            self.sockets.write().await.remove(&socket);
            self.transport.disconnect(&socket).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_bus::LocalClusterBus;
    use crate::state::MemoryStateStore;
    use crate::transport::WsTransport;
    use tokio::time::Duration;

    fn service() -> Arc<ChatService<MemoryStateStore, WsTransport, LocalClusterBus<WsTransport>>> {
        let store = Arc::new(MemoryStateStore::new());
        let transport = WsTransport::new();
        let cluster = LocalClusterBus::new(transport.clone(), Duration::from_millis(200));
        let mut config = ServiceConfig::default();
        config.use_raw_error_objects = true;
        ChatService::new(store, transport, cluster, HookRegistry::new(), Arc::new(config))
    }

    #[tokio::test]
    async fn close_returns_immediately_with_no_inflight_work() {
        let service = service();
        tokio::time::timeout(Duration::from_millis(500), service.close())
            .await
            .expect("close should not block when nothing is in flight");
    }

    #[tokio::test]
    async fn on_command_from_an_unknown_socket_is_invalid_socket() {
        let service = service();
        let socket = GlobalSocketId::new(crate::domain::InstanceId::generate(), crate::domain::SocketId::generate());
        let frame = ClientFrame {
            command: "listRooms".into(),
            args: vec![],
            request_id: 1,
        };
        let reply = service.on_command(socket, frame).await;
        match reply {
            ServerFrame::Ack { error: Some(err), .. } => {
                assert_eq!(
                    serde_json::to_value(&err).unwrap()["name"],
                    serde_json::json!("invalidSocket")
                );
            }
            other => panic!("expected an ack with an error, got {other:?}"),
        }
    }
}
