// ABOUTME: Extensions compiled into the parley binary and the core plugin.
// ABOUTME: Provides citations (markdown markers) and token-counter (composer widget + event hook).

use async_trait::async_trait;
use parley_chat::{MessagePart, Starter};
use parley_ext::{
    BuiltinResolver, CitationMarkers, EventHandler, ExtensionContext, ExtensionModule, Hooks,
    ManifestBuilder, Plugin,
};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Event emitted after each assistant reply settles
pub const MESSAGE_FINALIZED: &str = "message:finalized";

/// What the host itself contributes before any extension
pub fn core_plugin() -> Plugin {
    Plugin::default()
        .route("/", "Chat")
        .composer("send", "Send")
        .composer("stop", "Stop")
        .content("empty-state", "How can I help you today?")
}

/// Prompts offered when a conversation is empty
pub fn starters() -> Vec<Starter> {
    vec![
        Starter::new(
            "Explain a concept",
            "Get a short explanation",
            vec![MessagePart::text("Explain how a hash map works, briefly.")],
        ),
        Starter::new(
            "Write some code",
            "Generate a small snippet",
            vec![MessagePart::text(
                "Write a Rust function that reverses the words in a sentence.",
            )],
        ),
        Starter::new(
            "Summarize",
            "Condense a paragraph",
            vec![MessagePart::text("Summarize the plot of Hamlet in three sentences.")],
        ),
    ]
}

struct Citations;

#[async_trait]
impl ExtensionModule for Citations {
    fn plugin(&self) -> Plugin {
        Plugin::default().renderer(Arc::new(CitationMarkers))
    }
}

/// Rough token estimate: about four characters per token
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() as u64).div_ceil(4)
}

/// Tracks estimated tokens across finalized replies
#[derive(Default)]
struct TokenCounter {
    total: Arc<AtomicU64>,
    warn_above: Arc<AtomicU64>,
}

struct CountTokens {
    total: Arc<AtomicU64>,
    warn_above: Arc<AtomicU64>,
}

#[async_trait]
impl EventHandler for CountTokens {
    async fn handle(&self, _event: &str, payload: &Value) -> anyhow::Result<()> {
        let text = payload
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("payload has no text"))?;
        let tokens = estimate_tokens(text);
        let total = self.total.fetch_add(tokens, Ordering::Relaxed) + tokens;

        let limit = self.warn_above.load(Ordering::Relaxed);
        if limit > 0 && total > limit {
            tracing::warn!(total, limit, "Conversation is past the token warning threshold");
        } else {
            tracing::info!(tokens, total, "Counted reply tokens");
        }
        Ok(())
    }
}

#[async_trait]
impl ExtensionModule for TokenCounter {
    async fn activate(&self, ctx: &ExtensionContext) -> anyhow::Result<()> {
        if let Some(limit) = ctx.config().get("warn_above").and_then(Value::as_u64) {
            self.warn_above.store(limit, Ordering::Relaxed);
            ctx.debug(&format!("warning above {limit} tokens"));
        }
        Ok(())
    }

    fn plugin(&self) -> Plugin {
        Plugin::default().composer("token-counter", "Tokens")
    }

    fn hooks(&self) -> Hooks {
        Hooks::default().on(
            MESSAGE_FINALIZED,
            0,
            Arc::new(CountTokens {
                total: self.total.clone(),
                warn_above: self.warn_above.clone(),
            }),
        )
    }
}

pub fn resolver() -> BuiltinResolver {
    BuiltinResolver::new()
        .with(
            ManifestBuilder::new("citations", "1.0.0")
                .name("Citations")
                .description("Numbers paragraphs of assistant replies")
                .client_plugin("citations")
                .build(),
            Arc::new(Citations),
        )
        .with(
            ManifestBuilder::new("token-counter", "1.0.0")
                .name("Token Counter")
                .description("Estimates tokens used by the conversation")
                .client_component("TokenCount")
                .server_event(MESSAGE_FINALIZED)
                .build(),
            Arc::new(TokenCounter::default()),
        )
}
