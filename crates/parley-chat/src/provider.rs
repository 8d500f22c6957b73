// ABOUTME: TextProvider trait defining how parley talks to text generation backends
// ABOUTME: Implementations: OllamaProvider (HTTP), ScriptedProvider (canned deltas)

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{ChatError, Result};
use crate::message::{Message, MessagePart, Role};

/// Stream of incremental parts for one response
pub type PartStream = BoxStream<'static, Result<MessagePart>>;

/// Role as seen by a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelRole {
    System,
    User,
    Assistant,
}

impl From<Role> for ModelRole {
    fn from(role: Role) -> Self {
        match role {
            Role::User => ModelRole::User,
            Role::Assistant => ModelRole::Assistant,
        }
    }
}

/// A flattened history entry sent to the model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMessage {
    pub role: ModelRole,
    pub content: String,
}

impl ModelMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ModelRole::System,
            content: content.into(),
        }
    }
}

impl From<&Message> for ModelMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role.into(),
            content: message.text(),
        }
    }
}

/// Flatten history for a model request, with an optional leading system prompt
pub fn model_history(system_prompt: Option<&str>, history: &[Message]) -> Vec<ModelMessage> {
    system_prompt
        .map(ModelMessage::system)
        .into_iter()
        .chain(history.iter().map(ModelMessage::from))
        .collect()
}

/// A provider turns conversation history into a stream of parts.
///
/// Dropping the returned stream must abort the underlying request.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// Unique name for this provider
    fn name(&self) -> &'static str;

    /// Start generating a response to `history`
    async fn stream(&self, history: Vec<ModelMessage>) -> Result<PartStream>;
}

/// Replays a fixed list of parts. Used offline and in tests.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    parts: Vec<MessagePart>,
    delay: Option<Duration>,
    fail_after: Option<usize>,
    calls: Arc<Mutex<Vec<Vec<ModelMessage>>>>,
}

impl ScriptedProvider {
    pub fn new(parts: Vec<MessagePart>) -> Self {
        Self {
            parts,
            ..Self::default()
        }
    }

    /// Split `text` on whitespace boundaries into markdown deltas
    pub fn from_markdown(text: &str) -> Self {
        let parts = text
            .split_inclusive(char::is_whitespace)
            .map(MessagePart::markdown)
            .collect();
        Self::new(parts)
    }

    /// Sleep before each part
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Emit an error after `n` parts instead of finishing
    pub fn failing_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// Every history this provider has been asked to answer
    pub fn calls(&self) -> Vec<Vec<ModelMessage>> {
        self.calls.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn stream(&self, history: Vec<ModelMessage>) -> Result<PartStream> {
        self.calls.lock().expect("lock poisoned").push(history);

        let mut items: Vec<Result<MessagePart>> = match self.fail_after {
            Some(n) => self.parts.iter().take(n).cloned().map(Ok).collect(),
            None => self.parts.iter().cloned().map(Ok).collect(),
        };
        if self.fail_after.is_some() {
            items.push(Err(ChatError::Provider("scripted failure".to_string())));
        }

        let delay = self.delay;
        Ok(stream::iter(items)
            .then(move |item| async move {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed())
    }
}
