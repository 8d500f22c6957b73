// ABOUTME: Ollama HTTP provider streaming newline-delimited JSON chat chunks.
// ABOUTME: Each content delta becomes a markdown part.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use url::Url;

use crate::error::{ChatError, Result};
use crate::message::MessagePart;
use crate::provider::{ModelMessage, PartStream, TextProvider};

pub const DEFAULT_BASE_URL: &str = "http://localhost:11434/api";
pub const DEFAULT_MODEL: &str = "llama3:latest";

/// Streams chat completions from an Ollama server.
#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: Client,
    base_url: Url,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ModelMessage],
    stream: bool,
}

/// One line of the streamed response
#[derive(Debug, Deserialize)]
struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelInfo>,
}

/// A locally available model
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

impl OllamaProvider {
    /// `base_url` is the API root, e.g. "http://localhost:11434/api".
    /// `connect_timeout` bounds connection setup only; a response may stream
    /// for as long as the model keeps producing.
    pub fn new(
        base_url: &str,
        model: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| ChatError::Connection(format!("Failed to create HTTP client: {e}")))?;

        // A trailing slash makes Url::join append rather than replace.
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        let base_url = Url::parse(&base)?;

        Ok(Self {
            client,
            base_url,
            model: model.into(),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(DEFAULT_BASE_URL, DEFAULT_MODEL, Duration::from_secs(10))
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    /// List models installed on the server
    pub async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let response = self.client.get(self.endpoint("tags")?).send().await?;
        let response = check_status(response).await?;
        let tags: TagsResponse = response.json().await?;
        Ok(tags.models)
    }
}

async fn check_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ChatChunk>(&body)
        .ok()
        .and_then(|c| c.error)
        .unwrap_or(body);
    Err(ChatError::Provider(format!("{status}: {detail}")))
}

#[async_trait]
impl TextProvider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn stream(&self, history: Vec<ModelMessage>) -> Result<PartStream> {
        let request = ChatRequest {
            model: &self.model,
            messages: &history,
            stream: true,
        };

        tracing::debug!(model = %self.model, messages = history.len(), "Starting Ollama chat stream");

        let response = self
            .client
            .post(self.endpoint("chat")?)
            .json(&request)
            .send()
            .await?;
        let response = check_status(response).await?;

        let bytes = response
            .bytes_stream()
            .map(|chunk| chunk.map(|b| b.to_vec()))
            .boxed();

        Ok(decode_chunks(bytes))
    }
}

/// Reassembles lines from arbitrarily split byte chunks
#[derive(Debug, Default)]
pub(crate) struct LineDecoder {
    buf: Vec<u8>,
}

impl LineDecoder {
    /// Feed bytes, returning every line completed by them
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..pos]).into_owned());
        }
        lines
    }

    /// Whatever is left once the stream ends
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

struct DecodeState<E> {
    bytes: BoxStream<'static, std::result::Result<Vec<u8>, E>>,
    lines: LineDecoder,
    pending: VecDeque<Result<MessagePart>>,
    finished: bool,
}

impl<E> DecodeState<E> {
    fn handle_line(&mut self, line: &str) {
        if self.finished {
            return;
        }
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        let chunk: ChatChunk = match serde_json::from_str(line) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.fail(ChatError::InvalidResponse(format!(
                    "Failed to parse chunk: {e}"
                )));
                return;
            }
        };

        if let Some(error) = chunk.error {
            self.fail(ChatError::Provider(error));
            return;
        }

        if let Some(message) = chunk.message {
            if !message.content.is_empty() {
                self.pending
                    .push_back(Ok(MessagePart::markdown(message.content)));
            }
        }

        if chunk.done {
            self.finished = true;
        }
    }

    fn fail(&mut self, err: ChatError) {
        self.pending.push_back(Err(err));
        self.finished = true;
    }
}

/// Turn a raw NDJSON byte stream into parts. Stops after `done`, an error
/// line, or the first transport error.
pub(crate) fn decode_chunks<E>(
    bytes: BoxStream<'static, std::result::Result<Vec<u8>, E>>,
) -> PartStream
where
    E: Into<ChatError> + Send + 'static,
{
    let state = DecodeState {
        bytes,
        lines: LineDecoder::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.finished {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    for line in state.lines.push(&chunk) {
                        state.handle_line(&line);
                    }
                }
                Some(Err(e)) => state.fail(e.into()),
                None => {
                    if let Some(rest) = state.lines.finish() {
                        state.handle_line(&rest);
                    }
                    state.finished = true;
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn byte_stream(
        chunks: Vec<&'static str>,
    ) -> BoxStream<'static, std::result::Result<Vec<u8>, ChatError>> {
        stream::iter(chunks.into_iter().map(|c| Ok(c.as_bytes().to_vec()))).boxed()
    }

    #[test]
    fn test_line_decoder_reassembles_split_lines() {
        let mut decoder = LineDecoder::default();
        assert!(decoder.push(b"{\"a\":").is_empty());
        assert_eq!(decoder.push(b"1}\n{\"b\""), vec!["{\"a\":1}".to_string()]);
        assert_eq!(decoder.push(b":2}\n"), vec!["{\"b\":2}".to_string()]);
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn test_line_decoder_keeps_multibyte_chars_across_chunks() {
        let mut decoder = LineDecoder::default();
        let text = "héllo\n".as_bytes();
        assert!(decoder.push(&text[..2]).is_empty());
        assert_eq!(decoder.push(&text[2..]), vec!["héllo".to_string()]);
    }

    #[test]
    fn test_line_decoder_finish_returns_tail() {
        let mut decoder = LineDecoder::default();
        decoder.push(b"no newline");
        assert_eq!(decoder.finish(), Some("no newline".to_string()));
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_decode_yields_markdown_deltas() {
        let bytes = byte_stream(vec![
            "{\"message\":{\"role\":\"assistant\",\"content\":\"Hel\"},\"done\":false}\n",
            "{\"message\":{\"role\":\"assistant\",\"content\":\"lo\"},\"done\":false}\n{\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
        ]);
        let parts: Vec<_> = decode_chunks(bytes).collect().await;
        let parts: Vec<MessagePart> = parts.into_iter().map(|p| p.unwrap()).collect();
        assert_eq!(
            parts,
            vec![MessagePart::markdown("Hel"), MessagePart::markdown("lo")]
        );
    }

    #[tokio::test]
    async fn test_decode_stops_after_done() {
        let bytes = byte_stream(vec![
            "{\"message\":{\"content\":\"a\"},\"done\":true}\n{\"message\":{\"content\":\"ignored\"},\"done\":false}\n",
        ]);
        let parts: Vec<_> = decode_chunks(bytes).collect().await;
        assert_eq!(parts.len(), 1);
    }

    #[tokio::test]
    async fn test_decode_surfaces_error_line() {
        let bytes = byte_stream(vec![
            "{\"message\":{\"content\":\"partial\"}}\n{\"error\":\"model crashed\"}\n",
        ]);
        let parts: Vec<_> = decode_chunks(bytes).collect().await;
        assert_eq!(parts.len(), 2);
        assert!(parts[0].is_ok());
        match &parts[1] {
            Err(ChatError::Provider(msg)) => assert_eq!(msg, "model crashed"),
            other => panic!("expected provider error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_decode_rejects_garbage() {
        let bytes = byte_stream(vec!["not json\n"]);
        let parts: Vec<_> = decode_chunks(bytes).collect().await;
        assert!(matches!(parts[..], [Err(ChatError::InvalidResponse(_))]));
    }

    #[tokio::test]
    async fn test_decode_handles_unterminated_last_line() {
        let bytes = byte_stream(vec!["{\"message\":{\"content\":\"tail\"},\"done\":true}"]);
        let parts: Vec<_> = decode_chunks(bytes).collect().await;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].as_ref().unwrap(), &MessagePart::markdown("tail"));
    }

    #[test]
    fn test_endpoint_joins_under_api_root() {
        let provider =
            OllamaProvider::new("http://localhost:11434/api/", "m", Duration::from_secs(1))
                .unwrap();
        assert_eq!(
            provider.endpoint("chat").unwrap().as_str(),
            "http://localhost:11434/api/chat"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        let err = OllamaProvider::new("::nope::", "m", Duration::from_secs(1)).unwrap_err();
        assert!(matches!(err, ChatError::InvalidUrl(_)));
    }
}
