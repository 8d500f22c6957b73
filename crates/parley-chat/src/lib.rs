// ABOUTME: Chat core for parley - message model, part merge, reducer, providers
// ABOUTME: Shared by the CLI and any other front end driving a conversation

pub mod error;
pub mod merge;
pub mod message;
pub mod ollama;
pub mod prompt;
pub mod provider;
pub mod session;
pub mod state;

pub use error::{ChatError, Result};
pub use merge::{append_part, merge_parts};
pub use message::{parts_text, Message, MessageId, MessagePart, MessagePhase, PartKind, Role};
pub use ollama::{ModelInfo, OllamaProvider};
pub use prompt::{Prompt, Starter};
pub use provider::{
    model_history, ModelMessage, ModelRole, PartStream, ScriptedProvider, TextProvider,
};
pub use session::{ChatObserver, ChatSession, Outcome};
pub use state::{ChatAction, ChatState};
