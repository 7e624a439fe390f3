//! `chatcore`: the core of a multi-tenant, multi-instance chat service.
//!
//! Dependency order, leaves first (spec §2): [`error`] and [`domain`]
//! underpin everything; [`state`] is the pluggable backing store;
//! [`room`] and [`direct_messaging`] are the permission-checked layers
//! over it; [`hooks`] is the generic command pipeline; [`user_service`]
//! binds the command surface to the domain objects; [`transport`] is the
//! pluggable socket layer; [`cluster_bus`] fans events out across
//! instances; [`service`] is the composition root a [`transport::Transport`]
//! drives.

pub mod cluster_bus;
pub mod config;
pub mod direct_messaging;
pub mod domain;
pub mod error;
pub mod hooks;
pub mod protocol;
pub mod room;
pub mod service;
pub mod state;
pub mod transport;
pub mod user_service;

pub use config::{ConfigBuilder, ServiceConfig};
pub use error::{Error, ErrorKind, Result};
pub use service::ChatService;
