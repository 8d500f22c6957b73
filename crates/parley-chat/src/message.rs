// ABOUTME: Core message types for parley-chat
// ABOUTME: MessagePart, Role, MessageId, Message and the derived MessagePhase

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// An atomic piece of message content.
///
/// Adjacent parts of the same kind are concatenable; parts of different kinds
/// never combine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessagePart {
    Text { text: String },
    Markdown { markdown: String },
}

/// Discriminant of a [`MessagePart`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartKind {
    Text,
    Markdown,
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        MessagePart::Text { text: text.into() }
    }

    pub fn markdown(markdown: impl Into<String>) -> Self {
        MessagePart::Markdown {
            markdown: markdown.into(),
        }
    }

    pub fn kind(&self) -> PartKind {
        match self {
            MessagePart::Text { .. } => PartKind::Text,
            MessagePart::Markdown { .. } => PartKind::Markdown,
        }
    }

    /// Raw content regardless of kind
    pub fn content(&self) -> &str {
        match self {
            MessagePart::Text { text } => text,
            MessagePart::Markdown { markdown } => markdown,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content().is_empty()
    }

    /// Concatenate `other` onto this part if both are the same kind.
    ///
    /// Returns false (and leaves `self` untouched) for mismatched kinds.
    pub fn try_concat(&mut self, other: &MessagePart) -> bool {
        match (self, other) {
            (MessagePart::Text { text }, MessagePart::Text { text: more }) => {
                text.push_str(more);
                true
            }
            (MessagePart::Markdown { markdown }, MessagePart::Markdown { markdown: more }) => {
                markdown.push_str(more);
                true
            }
            _ => false,
        }
    }
}

/// Concatenate the content of every part, in order
pub fn parts_text(parts: &[MessagePart]) -> String {
    parts.iter().map(MessagePart::content).collect()
}

/// Role in a conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

/// Stable identifier of a message within a history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for MessageId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Lifecycle position of a message.
///
/// Only assistant messages ever leave `Finalized`; user messages are created
/// finalized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePhase {
    /// Streaming with no parts yet
    Pending,
    /// Parts are arriving
    Streaming,
    /// No further mutation
    Finalized,
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub parts: Vec<MessagePart>,
    #[serde(default)]
    pub streaming: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(parts: Vec<MessagePart>) -> Self {
        Self::finalized(Role::User, parts)
    }

    pub fn assistant(parts: Vec<MessagePart>) -> Self {
        Self::finalized(Role::Assistant, parts)
    }

    /// An assistant message awaiting its first part
    pub fn pending_assistant() -> Self {
        Self {
            id: MessageId::new(),
            role: Role::Assistant,
            parts: Vec::new(),
            streaming: true,
            created_at: Utc::now(),
        }
    }

    fn finalized(role: Role, parts: Vec<MessagePart>) -> Self {
        Self {
            id: MessageId::new(),
            role,
            parts,
            streaming: false,
            created_at: Utc::now(),
        }
    }

    /// All part content concatenated
    pub fn text(&self) -> String {
        parts_text(&self.parts)
    }

    pub fn phase(&self) -> MessagePhase {
        match (self.streaming, self.parts.is_empty()) {
            (true, true) => MessagePhase::Pending,
            (true, false) => MessagePhase::Streaming,
            (false, _) => MessagePhase::Finalized,
        }
    }

    /// "Thinking..." indicator: streaming but nothing received yet
    pub fn shows_thinking(&self) -> bool {
        self.phase() == MessagePhase::Pending
    }

    /// "No content available": finished without any parts
    pub fn shows_no_content(&self) -> bool {
        !self.streaming && self.parts.is_empty()
    }

    /// Retry/delete actions only appear once the message is done
    pub fn shows_footer(&self) -> bool {
        !self.streaming
    }
}
