// ABOUTME: Chat state and the reducer driving message lifecycle
// ABOUTME: All history mutations go through ChatState::reduce

use crate::merge::append_part;
use crate::message::{Message, MessageId, MessagePart, Role};

/// Conversation state.
///
/// `history` is append-ordered; the only removals are deletes and
/// truncations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatState {
    /// Waiting for the first part of a response
    pub loading: bool,
    /// A response is being generated
    pub streaming: bool,
    pub history: Vec<Message>,
}

/// State transitions. Actions naming an unknown id are no-ops.
#[derive(Debug, Clone, PartialEq)]
pub enum ChatAction {
    SetLoading(bool),
    SetStreaming(bool),
    PushMessage(Message),
    /// Replace the message with the same id
    UpdateMessage(Message),
    DeleteMessage(MessageId),
    /// Merge a part into the tail of a streaming message
    AppendPart { id: MessageId, part: MessagePart },
    /// Clear the streaming flag; the message is immutable afterwards
    Finalize(MessageId),
    /// Remove the message and everything after it
    TruncateFrom(MessageId),
    /// Remove everything after the message
    TruncateAfter(MessageId),
}

impl ChatState {
    pub fn new(history: Vec<Message>) -> Self {
        Self {
            history,
            ..Self::default()
        }
    }

    pub fn reduce(&mut self, action: ChatAction) {
        match action {
            ChatAction::SetLoading(loading) => self.loading = loading,
            ChatAction::SetStreaming(streaming) => self.streaming = streaming,
            ChatAction::PushMessage(message) => self.history.push(message),
            ChatAction::UpdateMessage(message) => {
                if let Some(slot) = self.history.iter_mut().find(|m| m.id == message.id) {
                    *slot = message;
                }
            }
            ChatAction::DeleteMessage(id) => self.history.retain(|m| m.id != id),
            ChatAction::AppendPart { id, part } => match self.get_mut(id) {
                Some(message) if message.streaming => append_part(&mut message.parts, part),
                Some(_) => tracing::debug!(%id, "Dropping part for finalized message"),
                None => tracing::debug!(%id, "Dropping part for unknown message"),
            },
            ChatAction::Finalize(id) => {
                if let Some(message) = self.get_mut(id) {
                    message.streaming = false;
                }
            }
            ChatAction::TruncateFrom(id) => {
                if let Some(index) = self.position(id) {
                    self.history.truncate(index);
                }
            }
            ChatAction::TruncateAfter(id) => {
                if let Some(index) = self.position(id) {
                    self.history.truncate(index + 1);
                }
            }
        }
    }

    pub fn last(&self) -> Option<&Message> {
        self.history.last()
    }

    pub fn position(&self, id: MessageId) -> Option<usize> {
        self.history.iter().position(|m| m.id == id)
    }

    pub fn get(&self, id: MessageId) -> Option<&Message> {
        self.history.iter().find(|m| m.id == id)
    }

    fn get_mut(&mut self, id: MessageId) -> Option<&mut Message> {
        self.history.iter_mut().find(|m| m.id == id)
    }

    /// True when the newest message is an assistant reply still streaming.
    /// The composer swaps its send button for a stop button in this state.
    pub fn is_generating(&self) -> bool {
        self.last()
            .is_some_and(|m| m.role == Role::Assistant && m.streaming)
    }

    /// History prefix up to and including `id`
    pub fn context_until(&self, id: MessageId) -> Option<&[Message]> {
        self.position(id).map(|index| &self.history[..=index])
    }
}
