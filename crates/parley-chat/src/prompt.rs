// ABOUTME: Composer prompt buffer and starter prompts
// ABOUTME: Parts are assembled here before being handed to ChatSession::send

use crate::merge::append_part;
use crate::message::{parts_text, MessagePart};
use crate::state::ChatState;

/// The prompt being composed
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prompt {
    parts: Vec<MessagePart>,
}

impl Prompt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parts(&self) -> &[MessagePart] {
        &self.parts
    }

    /// Transform the current parts
    pub fn update(&mut self, f: impl FnOnce(Vec<MessagePart>) -> Vec<MessagePart>) {
        self.parts = f(std::mem::take(&mut self.parts));
    }

    pub fn push(&mut self, part: MessagePart) {
        append_part(&mut self.parts, part);
    }

    /// Replace the whole prompt with a single text part
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.parts = vec![MessagePart::text(text)];
    }

    pub fn clear(&mut self) {
        self.parts.clear();
    }

    /// Move the parts out, leaving the prompt empty
    pub fn take(&mut self) -> Vec<MessagePart> {
        std::mem::take(&mut self.parts)
    }

    /// Whitespace-only prompts count as empty
    pub fn is_empty(&self) -> bool {
        parts_text(&self.parts).trim().is_empty()
    }

    /// Send is offered only for a non-empty prompt while nothing is generating
    pub fn can_send(&self, state: &ChatState) -> bool {
        !self.is_empty() && !state.is_generating()
    }
}

/// A canned prompt offered on the landing screen
#[derive(Debug, Clone, PartialEq)]
pub struct Starter {
    pub label: String,
    pub description: String,
    pub prompt: Vec<MessagePart>,
}

impl Starter {
    pub fn new(
        label: impl Into<String>,
        description: impl Into<String>,
        prompt: Vec<MessagePart>,
    ) -> Self {
        Self {
            label: label.into(),
            description: description.into(),
            prompt,
        }
    }

    /// Fill the composer with this starter's prompt
    pub fn apply(&self, prompt: &mut Prompt) {
        prompt.update(|_| self.prompt.clone());
    }
}
