//! filo, a multi-user line-based chat server over TCP.
//!
//! Clients authenticate with login/register, open direct or group chats,
//! and exchange newline-delimited messages that are fanned out live to
//! every online participant.

pub mod chat;
pub mod config;
pub mod error;
pub mod logging;
pub mod server;
pub mod store;
pub mod user;

pub use chat::{AddMemberError, ChatEntity, ChatKind, ChatRegistry, ChatSummary, Message};
pub use config::Config;
pub use error::{FiloError, Result};
pub use server::{ChatServer, SessionContext, SessionHandler};
pub use store::SqliteStore;
pub use user::{Account, SessionHandle, UserRegistry};
