// ABOUTME: Error types for parley-chat
// ABOUTME: ChatError covers session misuse and provider/transport failures

use thiserror::Error;

use crate::message::{MessageId, Role};

/// Errors that can occur in chat operations
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Prompt is empty")]
    EmptyPrompt,

    #[error("A response is already being generated")]
    Busy,

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Message {id} is not a {expected} message")]
    WrongRole { id: MessageId, expected: Role },

    #[error("Message {0} is still streaming")]
    StillStreaming(MessageId),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Invalid provider URL: {0}")]
    InvalidUrl(String),
}

impl From<reqwest::Error> for ChatError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            ChatError::Connection(err.to_string())
        } else if err.is_decode() {
            ChatError::InvalidResponse(err.to_string())
        } else {
            ChatError::Provider(err.to_string())
        }
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        ChatError::InvalidResponse(err.to_string())
    }
}

impl From<url::ParseError> for ChatError {
    fn from(err: url::ParseError) -> Self {
        ChatError::InvalidUrl(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ChatError>;
