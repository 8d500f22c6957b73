// ABOUTME: Integration tests for ChatSession lifecycle.
// ABOUTME: Covers stop, busy rejection, edit truncation, retry, delete pairing and failures.

use parley_chat::{
    ChatError, ChatObserver, ChatSession, MessageId, MessagePart, MessagePhase, Outcome, Role,
    ScriptedProvider,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

const LONG_REPLY: &str = "one two three four five six seven eight nine ten";

fn text(s: &str) -> Vec<MessagePart> {
    vec![MessagePart::text(s)]
}

/// Signals every streamed part on a channel
struct PartSignal(mpsc::UnboundedSender<MessageId>);

impl ChatObserver for PartSignal {
    fn on_part(&self, id: MessageId, _part: &MessagePart) {
        let _ = self.0.send(id);
    }
}

/// Records streaming flag transitions
#[derive(Default)]
struct StreamingLog(Mutex<Vec<bool>>);

impl ChatObserver for StreamingLog {
    fn on_streaming_changed(&self, streaming: bool) {
        self.0.lock().unwrap().push(streaming);
    }
}

/// Start a slow generation in the background and wait for its first part.
async fn start_slow(
    chat: &ChatSession,
) -> (
    tokio::task::JoinHandle<Result<Outcome, ChatError>>,
    MessageId,
) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    chat.set_observer(Arc::new(PartSignal(tx)));

    let task = {
        let chat = chat.clone();
        tokio::spawn(async move { chat.send(text("go")).await })
    };
    let assistant_id = rx.recv().await.expect("no part streamed");
    (task, assistant_id)
}

fn slow_session() -> ChatSession {
    let provider = ScriptedProvider::from_markdown(LONG_REPLY).with_delay(Duration::from_millis(20));
    ChatSession::new(Arc::new(provider))
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test]
async fn test_stop_finalizes_and_keeps_partial_parts() {
    let chat = slow_session();
    let (task, assistant_id) = start_slow(&chat).await;

    assert!(chat.stop());
    let outcome = task.await.unwrap().unwrap();
    assert_eq!(outcome, Outcome::Stopped);

    let state = chat.snapshot();
    assert!(!state.streaming);
    let reply = state.get(assistant_id).unwrap();
    assert_eq!(reply.phase(), MessagePhase::Finalized);
    assert!(!reply.parts.is_empty());
    assert!(reply.text().len() < LONG_REPLY.len());
    assert!(!chat.is_generating());
}

#[tokio::test]
async fn test_session_accepts_new_prompt_after_stop() {
    let chat = slow_session();
    let (task, _) = start_slow(&chat).await;
    chat.stop();
    task.await.unwrap().unwrap();

    let outcome = chat.send(text("again")).await.unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(chat.history().len(), 4);
}

// ============================================================================
// Busy
// ============================================================================

#[tokio::test]
async fn test_stop_before_first_part_finalizes_empty_reply() {
    let provider = ScriptedProvider::from_markdown(LONG_REPLY).with_delay(Duration::from_secs(5));
    let chat = ChatSession::new(Arc::new(provider));

    let task = {
        let chat = chat.clone();
        tokio::spawn(async move { chat.send(text("go")).await })
    };
    while !chat.is_generating() {
        tokio::task::yield_now().await;
    }
    assert!(chat.snapshot().history[1].shows_thinking());

    assert!(chat.stop());
    assert_eq!(task.await.unwrap().unwrap(), Outcome::Stopped);

    let state = chat.snapshot();
    assert!(!state.loading);
    assert!(!state.streaming);
    assert!(state.history[1].shows_no_content());
    assert!(!chat.is_generating());
}

#[tokio::test]
async fn test_dropped_generation_is_finalized_and_frees_session() {
    let provider = ScriptedProvider::from_markdown(LONG_REPLY).with_delay(Duration::from_millis(50));
    let chat = ChatSession::new(Arc::new(provider));

    let timed_out = tokio::time::timeout(Duration::from_millis(80), chat.send(text("go"))).await;
    assert!(timed_out.is_err());

    assert!(!chat.is_generating());
    assert!(!chat.stop());
    let state = chat.snapshot();
    assert!(!state.loading);
    assert!(!state.streaming);
    let reply = &state.history[1];
    assert_eq!(reply.role, Role::Assistant);
    assert_eq!(reply.phase(), MessagePhase::Finalized);

    assert_eq!(
        chat.send(text("again")).await.unwrap(),
        Outcome::Completed,
        "session stays usable after a dropped generation"
    );
}

#[tokio::test]
async fn test_operations_are_refused_while_generating() {
    let chat = slow_session();
    let (task, assistant_id) = start_slow(&chat).await;

    assert!(matches!(
        chat.send(text("second")).await,
        Err(ChatError::Busy)
    ));
    assert!(matches!(chat.retry(assistant_id).await, Err(ChatError::Busy)));
    assert!(matches!(
        chat.delete(assistant_id),
        Err(ChatError::StillStreaming(_))
    ));

    let user_id = chat.history()[0].id;
    assert!(matches!(
        chat.delete(user_id),
        Err(ChatError::StillStreaming(id)) if id == assistant_id
    ));

    chat.stop();
    task.await.unwrap().unwrap();
    assert_eq!(chat.history().len(), 2);
}

// ============================================================================
// Edit
// ============================================================================

#[tokio::test]
async fn test_edit_truncates_later_history_and_regenerates() {
    let provider = ScriptedProvider::from_markdown("answer");
    let chat = ChatSession::new(Arc::new(provider.clone()));
    chat.send(text("first question")).await.unwrap();
    chat.send(text("second question")).await.unwrap();
    assert_eq!(chat.history().len(), 4);

    let first_user = chat.history()[0].id;
    let outcome = chat.edit(first_user, text("better question")).await.unwrap();
    assert_eq!(outcome, Outcome::Completed);

    let history = chat.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, first_user);
    assert_eq!(history[0].text(), "better question");
    assert_eq!(history[1].role, Role::Assistant);

    let calls = provider.calls();
    let last = calls.last().unwrap();
    assert_eq!(last.len(), 1);
    assert_eq!(last[0].content, "better question");
}

#[tokio::test]
async fn test_edit_rejects_assistant_message() {
    let chat = ChatSession::new(Arc::new(ScriptedProvider::from_markdown("a")));
    chat.send(text("q")).await.unwrap();
    let assistant_id = chat.history()[1].id;

    let err = chat.edit(assistant_id, text("nope")).await.unwrap_err();
    assert!(matches!(err, ChatError::WrongRole { expected: Role::User, .. }));
    assert_eq!(chat.history().len(), 2);
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn test_retry_reissues_same_context() {
    let provider = ScriptedProvider::from_markdown("reply");
    let chat = ChatSession::new(Arc::new(provider.clone()));
    chat.send(text("q1")).await.unwrap();
    chat.send(text("q2")).await.unwrap();

    let old_reply = chat.history()[3].id;
    let outcome = chat.retry(old_reply).await.unwrap();
    assert_eq!(outcome, Outcome::Completed);

    let history = chat.history();
    assert_eq!(history.len(), 4);
    assert_ne!(history[3].id, old_reply);
    assert_eq!(history[3].text(), "reply");

    let calls = provider.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2], calls[1]);
}

#[tokio::test]
async fn test_retry_of_earlier_reply_drops_later_turns() {
    let chat = ChatSession::new(Arc::new(ScriptedProvider::from_markdown("reply")));
    chat.send(text("q1")).await.unwrap();
    chat.send(text("q2")).await.unwrap();

    let first_reply = chat.history()[1].id;
    chat.retry(first_reply).await.unwrap();

    let history = chat.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text(), "q1");
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_removes_pairs() {
    let chat = ChatSession::new(Arc::new(ScriptedProvider::from_markdown("reply")));
    chat.send(text("q1")).await.unwrap();
    chat.send(text("q2")).await.unwrap();

    let first_reply = chat.history()[1].id;
    chat.delete(first_reply).unwrap();
    let history = chat.history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].text(), "q2");

    let second_user = history[0].id;
    chat.delete(second_user).unwrap();
    assert!(chat.history().is_empty());
}

// ============================================================================
// Failure
// ============================================================================

#[tokio::test]
async fn test_failure_finalizes_without_retry() {
    let provider = ScriptedProvider::from_markdown("a b c d").failing_after(2);
    let chat = ChatSession::new(Arc::new(provider.clone()));

    let outcome = chat.send(text("q")).await.unwrap();
    assert!(matches!(outcome, Outcome::Failed(ref msg) if msg.contains("scripted failure")));

    let state = chat.snapshot();
    assert!(!state.streaming);
    let reply = &state.history[1];
    assert!(!reply.streaming);
    assert_eq!(reply.parts, vec![MessagePart::markdown("a b ")]);
    assert_eq!(provider.calls().len(), 1);
}

#[tokio::test]
async fn test_empty_reply_shows_no_content() {
    let chat = ChatSession::new(Arc::new(ScriptedProvider::new(vec![])));
    chat.send(text("q")).await.unwrap();
    let reply = &chat.history()[1];
    assert!(reply.shows_no_content());
}

// ============================================================================
// Observer
// ============================================================================

#[tokio::test]
async fn test_observer_sees_streaming_transitions() {
    let chat = ChatSession::new(Arc::new(ScriptedProvider::from_markdown("hi")));
    let log = Arc::new(StreamingLog::default());
    chat.set_observer(log.clone());

    chat.send(text("q")).await.unwrap();
    assert_eq!(*log.0.lock().unwrap(), vec![true, false]);
}
