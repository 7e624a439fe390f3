//! Transport fan-out groups: one per room, one per user (the echo channel).

use std::fmt;

use super::{RoomName, Username};

/// A Transport-level fan-out group. Two flavors, per the Data Model.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelId {
    /// All sockets of all users joined to a room.
    Room(RoomName),
    /// All sockets of one user, across instances — used to deliver echoes.
    UserEcho(Username),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::Room(name) => write!(f, "room:{name}"),
            ChannelId::UserEcho(name) => write!(f, "user:{name}"),
        }
    }
}
</content>
