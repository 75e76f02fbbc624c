//! Answer generation: the [`Generator`] seam and a streaming OpenAI client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, instrument, warn};

use sitekb_shared::{LlmConfig, Result, SiteKbError};

/// Who said a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Produces an answer as a stream of text pieces.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Start generating. Errors before the first piece are returned directly;
    /// errors mid-stream arrive on the receiver.
    async fn generate(
        &self,
        system_prompt: &str,
        context_text: &str,
        history: &[Turn],
        query: &str,
    ) -> Result<mpsc::Receiver<Result<String>>>;
}

/// The user message: retrieved context followed by the question.
pub fn user_prompt(context_text: &str, query: &str) -> String {
    format!(
        "Knowledge base excerpts:\n\n{context_text}\n\n---\n\nQuestion:\n{query}\n\n\
         Answer directly from the excerpts above."
    )
}

// ---------------------------------------------------------------------------
// OpenAI
// ---------------------------------------------------------------------------

/// Calls `POST {base_url}/chat/completions` with `stream: true` and parses
/// the server-sent events.
#[derive(Debug, Clone)]
pub struct OpenAiGenerator {
    client: Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAiGenerator {
    pub fn new(config: &LlmConfig, api_key: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SiteKbError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key,
            model: config.chat_model.clone(),
        })
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    #[instrument(skip_all, fields(model = %self.model, history = history.len()))]
    async fn generate(
        &self,
        system_prompt: &str,
        context_text: &str,
        history: &[Turn],
        query: &str,
    ) -> Result<mpsc::Receiver<Result<String>>> {
        let prompt = user_prompt(context_text, query);
        let mut messages = vec![ChatMessage {
            role: "system",
            content: system_prompt,
        }];
        messages.extend(history.iter().map(|turn| ChatMessage {
            role: match turn.role {
                Role::User => "user",
                Role::Assistant => "assistant",
            },
            content: &turn.content,
        }));
        messages.push(ChatMessage {
            role: "user",
            content: &prompt,
        });

        let body = serde_json::json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SiteKbError::Generation(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(SiteKbError::Generation(format!("API error {status}: {text}")));
        }

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(forward_events(response, tx));
        Ok(rx)
    }
}

/// Read the SSE body and send every content delta until `[DONE]`.
async fn forward_events(mut response: reqwest::Response, tx: mpsc::Sender<Result<String>>) {
    let mut buffer: Vec<u8> = Vec::new();

    loop {
        let bytes = match response.chunk().await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => break,
            Err(e) => {
                let _ = tx.send(Err(SiteKbError::Generation(e.to_string()))).await;
                return;
            }
        };
        buffer.extend_from_slice(&bytes);

        while let Some(line) = next_line(&mut buffer) {
            match parse_event(line.trim()) {
                Event::Done => {
                    debug!("stream finished");
                    return;
                }
                Event::Content(piece) => {
                    if tx.send(Ok(piece)).await.is_err() {
                        return;
                    }
                }
                Event::Skip => {}
            }
        }
    }

    if !buffer.iter().all(u8::is_ascii_whitespace) {
        warn!(pending = buffer.len(), "stream ended without [DONE]");
    }
}

/// Take the next complete line off the front of `buffer`.
///
/// Lines are split on raw bytes and decoded only once complete, so a UTF-8
/// character split across network chunks stays intact. Invalid lines are
/// logged and returned empty.
fn next_line(buffer: &mut Vec<u8>) -> Option<String> {
    let newline = buffer.iter().position(|b| *b == b'\n')?;
    let line: Vec<u8> = buffer.drain(..=newline).collect();
    match String::from_utf8(line) {
        Ok(line) => Some(line),
        Err(e) => {
            warn!(error = %e, "stream line is not valid UTF-8");
            Some(String::new())
        }
    }
}

#[derive(Debug, PartialEq)]
enum Event {
    Content(String),
    Done,
    Skip,
}

fn parse_event(line: &str) -> Event {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Event::Skip;
    };
    if data == "[DONE]" {
        return Event::Done;
    }
    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|c| !c.is_empty())
            .map_or(Event::Skip, Event::Content),
        Err(e) => {
            warn!(error = %e, "unparseable stream event");
            Event::Skip
        }
    }
}
