//! Chat registry for filo.
//!
//! Process-wide directory of chats. One lock guards the chat map and both id
//! counters, so chat creation, membership changes and message appends are
//! atomic with respect to every other session: no lookup ever observes a
//! partially inserted chat, and the shared message counter stays strictly
//! increasing across all chats.

use std::collections::HashMap;

use tokio::sync::RwLock;
use tracing::info;

use super::entity::{AddMemberError, ChatEntity, ChatKind, Message};
use crate::{FiloError, Result};

/// Identity snapshot of a chat, as listed by `/list`.
#[derive(Debug, Clone)]
pub struct ChatSummary {
    /// Chat id.
    pub id: i64,
    /// Type tag.
    pub kind: ChatKind,
    /// Group name, if any.
    pub name: Option<String>,
}

struct Inner {
    /// Chats indexed by id.
    chats: HashMap<i64, ChatEntity>,
    /// Next chat id to allocate. Never reused.
    next_chat_id: i64,
    /// Next message id to allocate. One counter shared across all chats.
    next_message_id: i64,
}

/// Registry of all chats.
pub struct ChatRegistry {
    inner: RwLock<Inner>,
}

impl ChatRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                chats: HashMap::new(),
                next_chat_id: 1,
                next_message_id: 1,
            }),
        }
    }

    /// Create a direct chat between two accounts.
    ///
    /// Account existence is the caller's concern; the registry only
    /// allocates the id and inserts the entity.
    pub async fn create_direct(&self, a: i64, b: i64) -> ChatSummary {
        let mut inner = self.inner.write().await;
        let id = inner.next_chat_id;
        inner.next_chat_id += 1;

        inner.chats.insert(id, ChatEntity::direct(id, a, b));
        info!("Created direct chat {} between {} and {}", id, a, b);
        ChatSummary {
            id,
            kind: ChatKind::Direct,
            name: None,
        }
    }

    /// Create a group chat seeded with its creator.
    pub async fn create_group(&self, name: impl Into<String>, creator: i64) -> ChatSummary {
        let name = name.into();
        let mut inner = self.inner.write().await;
        let id = inner.next_chat_id;
        inner.next_chat_id += 1;

        inner
            .chats
            .insert(id, ChatEntity::group(id, name.clone(), vec![creator]));
        info!("Created group chat {} ({:?}) by {}", id, name, creator);
        ChatSummary {
            id,
            kind: ChatKind::Group,
            name: Some(name),
        }
    }

    /// Look up a chat's identity by id.
    pub async fn get(&self, chat_id: i64) -> Option<ChatSummary> {
        self.inner.read().await.chats.get(&chat_id).map(|chat| ChatSummary {
            id: chat.id(),
            kind: chat.kind(),
            name: chat.name().map(String::from),
        })
    }

    /// Get a snapshot of a chat's message log, in log order.
    pub async fn messages(&self, chat_id: i64) -> Option<Vec<Message>> {
        self.inner
            .read()
            .await
            .chats
            .get(&chat_id)
            .map(|chat| chat.messages().to_vec())
    }

    /// Get a snapshot of a chat's participants.
    pub async fn participants(&self, chat_id: i64) -> Option<Vec<i64>> {
        self.inner
            .read()
            .await
            .chats
            .get(&chat_id)
            .map(|chat| chat.participants().to_vec())
    }

    /// Add a participant to a group chat.
    pub async fn add_member(&self, chat_id: i64, user_id: i64) -> std::result::Result<(), AddMemberError> {
        let mut inner = self.inner.write().await;
        let chat = inner
            .chats
            .get_mut(&chat_id)
            .ok_or(AddMemberError::ChatNotFound)?;
        chat.add_member(user_id)
    }

    /// Allocate the next global message id, construct the message and append
    /// it to the chat's log, all under one critical section.
    ///
    /// Returns the message and a participant snapshot for fan-out.
    pub async fn append_message(
        &self,
        chat_id: i64,
        sender_id: i64,
        content: impl Into<String>,
    ) -> Result<(Message, Vec<i64>)> {
        let mut inner = self.inner.write().await;

        if !inner.chats.contains_key(&chat_id) {
            return Err(FiloError::NotFound("chat".to_string()));
        }

        let id = inner.next_message_id;
        inner.next_message_id += 1;

        let message = Message::new(id, sender_id, chat_id, content);
        // Checked above; the lock is still held
        let chat = inner.chats.get_mut(&chat_id).expect("chat vanished under lock");
        chat.push_message(message.clone());

        Ok((message, chat.participants().to_vec()))
    }

    /// List every chat a user participates in, sorted by id.
    ///
    /// Implemented as a scan over all chats; fine at this scale.
    pub async fn list_for_user(&self, user_id: i64) -> Vec<ChatSummary> {
        let inner = self.inner.read().await;
        let mut result: Vec<ChatSummary> = inner
            .chats
            .values()
            .filter(|chat| chat.is_participant(user_id))
            .map(|chat| ChatSummary {
                id: chat.id(),
                kind: chat.kind(),
                name: chat.name().map(String::from),
            })
            .collect();

        // Sort by id for consistent ordering
        result.sort_by_key(|summary| summary.id);
        result
    }

    /// Get the number of chats.
    pub async fn count(&self) -> usize {
        self.inner.read().await.chats.len()
    }

    /// Insert a chat loaded from the persistent store.
    ///
    /// Keeps both counters ahead of every loaded id.
    pub async fn insert_loaded(&self, chat: ChatEntity) {
        let mut inner = self.inner.write().await;
        if chat.id() >= inner.next_chat_id {
            inner.next_chat_id = chat.id() + 1;
        }
        if let Some(max_msg) = chat.messages().iter().map(|m| m.id).max() {
            if max_msg >= inner.next_message_id {
                inner.next_message_id = max_msg + 1;
            }
        }
        inner.chats.insert(chat.id(), chat);
    }
}

impl Default for ChatRegistry {
    fn default() -> Self {
        Self::new()
    }
}
