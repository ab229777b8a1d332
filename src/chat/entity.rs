//! Chat entities for filo.
//!
//! A chat is either a direct (two-party, fixed membership) conversation or a
//! named group with a growable participant set. Both variants share an id and
//! an append-only message log.

use chrono::{DateTime, Utc};

/// Type tag for a chat.
///
/// The string forms are part of the wire protocol (`/list` output).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    /// Two-party conversation with fixed membership.
    Direct,
    /// Named conversation with a growable participant set.
    Group,
}

impl ChatKind {
    /// Get the wire representation of the type tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatKind::Direct => "DirectMessage",
            ChatKind::Group => "Gruppo",
        }
    }
}

impl std::fmt::Display for ChatKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A posted message.
///
/// Immutable once constructed; appended to exactly one chat's log. Message
/// ids come from a single counter shared across all chats.
#[derive(Debug, Clone)]
pub struct Message {
    /// Globally unique message id.
    pub id: i64,
    /// Sender's user id.
    pub sender_id: i64,
    /// Owning chat id.
    pub chat_id: i64,
    /// Message text. May contain any character except a line terminator,
    /// including the `|` protocol delimiter.
    pub content: String,
    /// Creation timestamp.
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a new message stamped with the current time.
    pub fn new(id: i64, sender_id: i64, chat_id: i64, content: impl Into<String>) -> Self {
        Self {
            id,
            sender_id,
            chat_id,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// Format the message as a `/open` log line.
    pub fn format_log_line(&self) -> String {
        format!("[{}] {}", self.sender_id, self.content)
    }

    /// Format the message as a live push line.
    pub fn format_push_line(&self) -> String {
        format!("[{}] {}: {}", self.chat_id, self.sender_id, self.content)
    }
}

/// Error when adding a participant to a chat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddMemberError {
    /// Chat does not exist.
    ChatNotFound,
    /// The chat is a direct chat; its membership is fixed.
    NotAGroup,
    /// The user is already a participant.
    AlreadyMember,
}

#[derive(Debug, Clone)]
enum Variant {
    Direct {
        /// The two participants, fixed at creation. A self-DM stores the
        /// same id twice.
        pair: [i64; 2],
    },
    Group {
        name: String,
        /// Participants in join order, no duplicates.
        members: Vec<i64>,
    },
}

/// A chat: identity, participants and an ordered message log.
#[derive(Debug, Clone)]
pub struct ChatEntity {
    id: i64,
    variant: Variant,
    log: Vec<Message>,
}

impl ChatEntity {
    /// Create a direct chat between two accounts.
    pub fn direct(id: i64, a: i64, b: i64) -> Self {
        Self {
            id,
            variant: Variant::Direct { pair: [a, b] },
            log: Vec::new(),
        }
    }

    /// Create a group chat with an initial member list.
    pub fn group(id: i64, name: impl Into<String>, members: Vec<i64>) -> Self {
        Self {
            id,
            variant: Variant::Group {
                name: name.into(),
                members,
            },
            log: Vec::new(),
        }
    }

    /// Get the chat id.
    pub fn id(&self) -> i64 {
        self.id
    }

    /// Get the type tag.
    pub fn kind(&self) -> ChatKind {
        match self.variant {
            Variant::Direct { .. } => ChatKind::Direct,
            Variant::Group { .. } => ChatKind::Group,
        }
    }

    /// Get the group name, if this is a group.
    pub fn name(&self) -> Option<&str> {
        match &self.variant {
            Variant::Direct { .. } => None,
            Variant::Group { name, .. } => Some(name),
        }
    }

    /// Get the participant ids.
    pub fn participants(&self) -> &[i64] {
        match &self.variant {
            Variant::Direct { pair } => pair,
            Variant::Group { members, .. } => members,
        }
    }

    /// Check whether a user participates in this chat.
    pub fn is_participant(&self, user_id: i64) -> bool {
        self.participants().contains(&user_id)
    }

    /// Get the message log in append order.
    pub fn messages(&self) -> &[Message] {
        &self.log
    }

    /// Append a message to the log.
    ///
    /// Callers must allocate the message id through the registry so the
    /// global ordering invariant holds.
    pub fn push_message(&mut self, message: Message) {
        self.log.push(message);
    }

    /// Add a participant to a group chat.
    pub fn add_member(&mut self, user_id: i64) -> Result<(), AddMemberError> {
        match &mut self.variant {
            Variant::Direct { .. } => Err(AddMemberError::NotAGroup),
            Variant::Group { members, .. } => {
                if members.contains(&user_id) {
                    return Err(AddMemberError::AlreadyMember);
                }
                members.push(user_id);
                Ok(())
            }
        }
    }
}
