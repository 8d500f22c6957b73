// ABOUTME: ChatSession drives one conversation against a TextProvider
// ABOUTME: Send/edit/retry generate, stop cancels, delete removes a user/assistant pair

use futures::StreamExt;
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::{ChatError, Result};
use crate::merge::merge_parts;
use crate::message::{parts_text, Message, MessageId, MessagePart, Role};
use crate::provider::{model_history, TextProvider};
use crate::state::{ChatAction, ChatState};

/// How a generation ended. The assistant message is finalized in every case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    /// Cancelled by `stop`; parts received so far are kept
    Stopped,
    /// The provider failed; parts received so far are kept
    Failed(String),
}

/// Callback for session changes (for UI updates)
pub trait ChatObserver: Send + Sync {
    fn on_history_changed(&self, _state: &ChatState) {}
    fn on_streaming_changed(&self, _streaming: bool) {}
    fn on_part(&self, _id: MessageId, _part: &MessagePart) {}
}

struct Inner {
    provider: Arc<dyn TextProvider>,
    system_prompt: Option<String>,
    state: RwLock<ChatState>,
    /// Token of the generation in flight, if any
    active: Mutex<Option<CancellationToken>>,
    observer: RwLock<Option<Arc<dyn ChatObserver>>>,
}

/// A single conversation. Clones share state.
#[derive(Clone)]
pub struct ChatSession {
    inner: Arc<Inner>,
}

/// Everything a generation needs once the history is prepared
struct Generation {
    context: Vec<crate::provider::ModelMessage>,
    cancel: CancellationToken,
    guard: FinishGuard,
}

/// Finalizes the assistant message and frees the generation slot if the
/// generating future is dropped before it finishes.
struct FinishGuard {
    session: ChatSession,
    assistant_id: MessageId,
    done: bool,
}

impl FinishGuard {
    fn finish(mut self, outcome: Outcome) -> Outcome {
        self.done = true;
        self.session.finish(self.assistant_id, outcome)
    }
}

impl Drop for FinishGuard {
    fn drop(&mut self) {
        if !self.done {
            tracing::debug!(id = %self.assistant_id, "Generation dropped before completion");
            self.session.finish(self.assistant_id, Outcome::Stopped);
        }
    }
}

impl ChatSession {
    pub fn new(provider: Arc<dyn TextProvider>) -> Self {
        Self::with_history(provider, Vec::new())
    }

    pub fn with_history(provider: Arc<dyn TextProvider>, history: Vec<Message>) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                system_prompt: None,
                state: RwLock::new(ChatState::new(history)),
                active: Mutex::new(None),
                observer: RwLock::new(None),
            }),
        }
    }

    /// Set the system prompt sent ahead of the history. Must be called before
    /// the session is cloned.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.system_prompt = Some(prompt.into());
        } else {
            tracing::warn!("System prompt ignored: session already shared");
        }
        self
    }

    pub fn set_observer(&self, observer: Arc<dyn ChatObserver>) {
        *self.inner.observer.write().expect("lock poisoned") = Some(observer);
    }

    pub fn provider_name(&self) -> &'static str {
        self.inner.provider.name()
    }

    pub fn snapshot(&self) -> ChatState {
        self.inner.state.read().expect("lock poisoned").clone()
    }

    pub fn history(&self) -> Vec<Message> {
        self.inner.state.read().expect("lock poisoned").history.clone()
    }

    pub fn is_generating(&self) -> bool {
        self.inner.active.lock().expect("lock poisoned").is_some()
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Append a user message and generate a reply.
    pub async fn send(&self, parts: Vec<MessagePart>) -> Result<Outcome> {
        ensure_not_empty(&parts)?;
        let generation = self.begin(|state| {
            state.reduce(ChatAction::PushMessage(Message::user(merge_parts(&parts))));
            Ok(())
        })?;
        Ok(self.generate(generation).await)
    }

    /// Replace a user message's parts, drop everything after it, and
    /// generate a fresh reply.
    pub async fn edit(&self, id: MessageId, parts: Vec<MessagePart>) -> Result<Outcome> {
        ensure_not_empty(&parts)?;
        let generation = self.begin(|state| {
            let mut message = expect_role(state, id, Role::User)?.clone();
            message.parts = merge_parts(&parts);
            state.reduce(ChatAction::UpdateMessage(message));
            state.reduce(ChatAction::TruncateAfter(id));
            Ok(())
        })?;
        Ok(self.generate(generation).await)
    }

    /// Drop an assistant reply (and anything after it) and ask again with the
    /// same context.
    pub async fn retry(&self, id: MessageId) -> Result<Outcome> {
        let generation = self.begin(|state| {
            expect_role(state, id, Role::Assistant)?;
            state.reduce(ChatAction::TruncateFrom(id));
            Ok(())
        })?;
        Ok(self.generate(generation).await)
    }

    /// Remove a message together with its partner: an assistant reply takes
    /// the user message before it, a user message takes the reply after it.
    pub fn delete(&self, id: MessageId) -> Result<()> {
        let snapshot = {
            let mut state = self.inner.state.write().expect("lock poisoned");
            let index = state.position(id).ok_or(ChatError::MessageNotFound(id))?;
            let message = &state.history[index];

            let partner = match message.role {
                Role::Assistant => index
                    .checked_sub(1)
                    .map(|i| &state.history[i])
                    .filter(|m| m.role == Role::User),
                Role::User => state
                    .history
                    .get(index + 1)
                    .filter(|m| m.role == Role::Assistant),
            };

            if message.streaming {
                return Err(ChatError::StillStreaming(id));
            }
            if let Some(p) = partner.filter(|p| p.streaming) {
                return Err(ChatError::StillStreaming(p.id));
            }

            let partner_id = partner.map(|p| p.id);
            state.reduce(ChatAction::DeleteMessage(id));
            if let Some(partner_id) = partner_id {
                state.reduce(ChatAction::DeleteMessage(partner_id));
            }
            tracing::debug!(%id, ?partner_id, "Deleted message pair");
            state.clone()
        };

        self.notify(|o| o.on_history_changed(&snapshot));
        Ok(())
    }

    /// Cancel the generation in flight. Returns false if nothing was running.
    pub fn stop(&self) -> bool {
        match self.inner.active.lock().expect("lock poisoned").as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    // =========================================================================
    // Generation
    // =========================================================================

    /// Reserve the single generation slot, apply `prepare` to the history,
    /// then push a pending assistant message.
    fn begin(
        &self,
        prepare: impl FnOnce(&mut ChatState) -> Result<()>,
    ) -> Result<Generation> {
        let mut active = self.inner.active.lock().expect("lock poisoned");
        if active.is_some() {
            return Err(ChatError::Busy);
        }

        let (generation, snapshot) = {
            let mut state = self.inner.state.write().expect("lock poisoned");
            prepare(&mut *state)?;

            let context = model_history(self.inner.system_prompt.as_deref(), &state.history);
            let assistant = Message::pending_assistant();
            let assistant_id = assistant.id;
            state.reduce(ChatAction::PushMessage(assistant));
            state.reduce(ChatAction::SetStreaming(true));
            state.reduce(ChatAction::SetLoading(true));

            let cancel = CancellationToken::new();
            *active = Some(cancel.clone());
            (
                Generation {
                    context,
                    cancel,
                    guard: FinishGuard {
                        session: self.clone(),
                        assistant_id,
                        done: false,
                    },
                },
                state.clone(),
            )
        };
        drop(active);

        self.notify(|o| {
            o.on_history_changed(&snapshot);
            o.on_streaming_changed(true);
        });
        Ok(generation)
    }

    async fn generate(&self, generation: Generation) -> Outcome {
        let Generation {
            context,
            cancel,
            guard,
        } = generation;
        let assistant_id = guard.assistant_id;
        let provider = self.inner.provider.clone();

        tracing::info!(
            provider = provider.name(),
            %assistant_id,
            messages = context.len(),
            "Generating response"
        );

        let stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return guard.finish(Outcome::Stopped),
            result = provider.stream(context) => result,
        };

        let mut stream = match stream {
            Ok(stream) => stream,
            Err(e) => return guard.finish(Outcome::Failed(e.to_string())),
        };

        let outcome = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Outcome::Stopped,
                next = stream.next() => match next {
                    Some(Ok(part)) => {
                        if part.is_empty() {
                            continue;
                        }
                        self.apply_part(assistant_id, &part);
                        self.notify(|o| o.on_part(assistant_id, &part));
                    }
                    Some(Err(e)) => break Outcome::Failed(e.to_string()),
                    None => break Outcome::Completed,
                }
            }
        };

        // Dropping the stream aborts the underlying request.
        drop(stream);
        guard.finish(outcome)
    }

    fn apply_part(&self, id: MessageId, part: &MessagePart) {
        let mut state = self.inner.state.write().expect("lock poisoned");
        state.reduce(ChatAction::AppendPart {
            id,
            part: part.clone(),
        });
        state.reduce(ChatAction::SetLoading(false));
    }

    fn finish(&self, id: MessageId, outcome: Outcome) -> Outcome {
        let snapshot = {
            let mut state = self.inner.state.write().expect("lock poisoned");
            state.reduce(ChatAction::Finalize(id));
            state.reduce(ChatAction::SetLoading(false));
            state.reduce(ChatAction::SetStreaming(false));
            state.clone()
        };
        *self.inner.active.lock().expect("lock poisoned") = None;

        match &outcome {
            Outcome::Completed => tracing::info!(%id, "Response complete"),
            Outcome::Stopped => tracing::info!(%id, "Response stopped"),
            Outcome::Failed(e) => tracing::warn!(%id, error = %e, "Response failed"),
        }

        self.notify(|o| {
            o.on_history_changed(&snapshot);
            o.on_streaming_changed(false);
        });
        outcome
    }

    fn notify(&self, f: impl FnOnce(&dyn ChatObserver)) {
        let observer = self.inner.observer.read().expect("lock poisoned").clone();
        if let Some(observer) = observer {
            f(observer.as_ref());
        }
    }
}

fn ensure_not_empty(parts: &[MessagePart]) -> Result<()> {
    if parts_text(parts).trim().is_empty() {
        return Err(ChatError::EmptyPrompt);
    }
    Ok(())
}

fn expect_role(state: &ChatState, id: MessageId, expected: Role) -> Result<&Message> {
    let message = state.get(id).ok_or(ChatError::MessageNotFound(id))?;
    if message.role != expected {
        return Err(ChatError::WrongRole { id, expected });
    }
    Ok(message)
}
