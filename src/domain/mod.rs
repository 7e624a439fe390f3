//! Core entities: validated names, messages, sockets, channels.

mod channel;
mod message;
mod name;
mod socket;

pub use channel::ChannelId;
pub use message::{Message, MessageInput};
pub use name::{validate_name, RoomName, Username};
pub use socket::{GlobalSocketId, InstanceId, SocketId};
</content>
