//! Transport (interface, spec §4.6): socket accept, per-socket emit,
//! channel join/leave, broadcast. The core only ever talks to this trait;
//! `ws` is the reference implementation over `tokio-tungstenite`.

mod ws;

pub use ws::WsTransport;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::{ChannelId, GlobalSocketId, InstanceId, Username};
use crate::error::Error;
use crate::protocol::{ClientFrame, ServerFrame};

/// Invoked by a `Transport` for socket lifecycle and incoming commands.
/// `ChatService` is the reference implementation (`addClient`, `handleCommand`).
#[async_trait]
pub trait ConnectHandler: Send + Sync {
    async fn on_connect(&self, socket: GlobalSocketId, username: Username);
    async fn on_command(&self, socket: GlobalSocketId, frame: ClientFrame) -> ServerFrame;
    async fn on_disconnect(&self, socket: GlobalSocketId);
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// This process's stable identifier, used to route cluster-bus events
    /// and recognize sockets the local instance owns.
    fn instance_id(&self) -> &InstanceId;
    async fn emit_to_socket(&self, socket: &GlobalSocketId, event: &'static str, args: Vec<Value>);
    async fn emit_to_channel(&self, channel: &ChannelId, event: &'static str, args: Vec<Value>);
    async fn emit_to_channel_except_sender(&self, sender: &GlobalSocketId, channel: &ChannelId, event: &'static str, args: Vec<Value>);
    /// `Ok` or `invalidSocket` if the socket is unknown to this instance.
    async fn join_channel(&self, socket: &GlobalSocketId, channel: &ChannelId) -> Result<(), Error>;
    async fn leave_channel(&self, socket: &GlobalSocketId, channel: &ChannelId);
    async fn disconnect(&self, socket: &GlobalSocketId);
    /// Publishes `packet` on the reserved cluster-bus channel; consumed by
    /// every instance's `ClusterBus`, including this one.
    async fn broadcast(&self, packet: Value);
}
</content>
