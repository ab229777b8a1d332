//! Chats, messages and the chat registry for filo.

mod entity;
mod registry;

pub use entity::{AddMemberError, ChatEntity, ChatKind, Message};
pub use registry::{ChatRegistry, ChatSummary};
