//! Typed errors for the command surface.
//!
//! Every domain failure is tagged with a stable [`ErrorKind`] so that clients
//! can switch on it regardless of rendering mode. [`Error::render`] produces
//! either a raw `{name, args}` object or a `"<name>: <args>"` string,
//! selected once for the whole service by `useRawErrorObjects`.

use serde::{Deserialize, Serialize};
use thiserror::Error as ThisError;

/// Stable, wire-visible error tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    InvalidName,
    NoLogin,
    NotAllowed,
    NotJoined,
    NameInList,
    NoNameInList,
    NoList,
    RoomExists,
    NoUserOnline,
    WrongArgumentsCount,
    BadArgument,
    InvalidSocket,
    ServerError,
}

impl ErrorKind {
    /// The tag as it appears on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            ErrorKind::InvalidName => "invalidName",
            ErrorKind::NoLogin => "noLogin",
            ErrorKind::NotAllowed => "notAllowed",
            ErrorKind::NotJoined => "notJoined",
            ErrorKind::NameInList => "nameInList",
            ErrorKind::NoNameInList => "noNameInList",
            ErrorKind::NoList => "noList",
            ErrorKind::RoomExists => "roomExists",
            ErrorKind::NoUserOnline => "noUserOnline",
            ErrorKind::WrongArgumentsCount => "wrongArgumentsCount",
            ErrorKind::BadArgument => "badArgument",
            ErrorKind::InvalidSocket => "invalidSocket",
            ErrorKind::ServerError => "serverError",
        }
    }
}

/// A domain error: a stable kind plus positional context for rendering.
#[derive(Debug, Clone, ThisError)]
#[error("{}: {}", kind.name(), args.join(", "))]
pub struct Error {
    pub kind: ErrorKind,
    pub args: Vec<String>,
}

impl Error {
    pub fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            args: Vec::new(),
        }
    }

    pub fn with_args(kind: ErrorKind, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            kind,
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Render for the wire, honoring `useRawErrorObjects`.
    pub fn render(&self, raw: bool) -> RenderedError {
        if raw {
            RenderedError::Object {
                name: self.kind.name(),
                args: self.args.clone(),
            }
        } else {
            RenderedError::String(format!("{}: {}", self.kind.name(), self.args.join(", ")))
        }
    }
}

/// The two wire shapes an [`Error`] can take.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RenderedError {
    Object {
        name: &'static str,
        args: Vec<String>,
    },
    String(String),
}

macro_rules! error_ctor {
    ($fn_name:ident, $kind:ident) => {
        pub fn $fn_name(args: impl IntoIterator<Item = impl Into<String>>) -> Error {
            Error::with_args(ErrorKind::$kind, args)
        }
    };
}

error_ctor!(invalid_name, InvalidName);
error_ctor!(no_login, NoLogin);
error_ctor!(not_allowed, NotAllowed);
error_ctor!(not_joined, NotJoined);
error_ctor!(name_in_list, NameInList);
error_ctor!(no_name_in_list, NoNameInList);
error_ctor!(no_list, NoList);
error_ctor!(room_exists, RoomExists);
error_ctor!(no_user_online, NoUserOnline);
error_ctor!(wrong_arguments_count, WrongArgumentsCount);
error_ctor!(bad_argument, BadArgument);
error_ctor!(invalid_socket, InvalidSocket);

/// Backend failures are logged by the caller and collapse to this generic tag.
pub fn server_error() -> Error {
    Error::new(ErrorKind::ServerError)
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_raw_object() {
        let err = not_allowed(["room1"]);
        match err.render(true) {
            RenderedError::Object { name, args } => {
                assert_eq!(name, "notAllowed");
                assert_eq!(args, vec!["room1".to_string()]);
            }
            _ => panic!("expected object rendering"),
        }
    }

    #[test]
    fn renders_string() {
        let err = no_name_in_list(["alice"]);
        match err.render(false) {
            RenderedError::String(s) => assert_eq!(s, "noNameInList: alice"),
            _ => panic!("expected string rendering"),
        }
    }

    #[test]
    fn server_error_has_no_args() {
        let err = server_error();
        assert_eq!(err.kind(), ErrorKind::ServerError);
        assert!(err.args.is_empty());
    }
}
</content>
