use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{Stream, StreamExt, stream};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::RuntimeConfig;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One entry of a chat history as the API expects it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

/// A search hit the API attaches to an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
}

/// A search result with its 1-based citation index, as referenced by `[N]`
/// markers in the answer text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedSource {
    pub index: usize,
    pub title: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Sources(Vec<SearchResult>),
}

#[derive(Debug, Clone)]
pub enum ApiError {
    Status {
        status: u16,
        message: String,
        retry_after: Option<u64>,
    },
    Connect(String),
    Stream(String),
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Status {
                status, message, ..
            } => write!(f, "API error ({status}): {message}"),
            ApiError::Connect(detail) => write!(f, "connection error: {detail}"),
            ApiError::Stream(detail) => write!(f, "stream error: {detail}"),
        }
    }
}

impl std::error::Error for ApiError {}

pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, ApiError>> + Send>>;

/// Capability the session depends on: given a message history, produce an
/// ordered asynchronous sequence of stream events.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn stream_chat(&self, messages: Vec<ChatTurn>) -> Result<EventStream, ApiError>;
}

/// Streaming client for the Sonar chat completion endpoint.
pub struct SonarClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
}

impl SonarClient {
    pub fn new(cfg: &RuntimeConfig, api_key: String) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ApiError::Connect(e.to_string()))?;

        Ok(Self {
            http,
            api_key,
            base_url: cfg.base_url.clone(),
            model: cfg.model.clone(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl ChatClient for SonarClient {
    async fn stream_chat(&self, messages: Vec<ChatTurn>) -> Result<EventStream, ApiError> {
        let payload = json!({
            "model": self.model,
            "stream": true,
            "messages": messages
                .iter()
                .map(|m| json!({ "role": m.role, "content": m.content }))
                .collect::<Vec<Value>>(),
        });

        tracing::debug!(turns = messages.len(), model = %self.model, "starting chat stream");

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    ApiError::Connect(e.to_string())
                } else {
                    ApiError::Stream(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let body = response.text().await.unwrap_or_default();
            let message = error_body_message(&body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("request failed")
                    .to_string()
            });
            return Err(ApiError::Status {
                status: status.as_u16(),
                message,
                retry_after,
            });
        }

        let mut parser = SseParser::default();
        let events = response.bytes_stream().flat_map(move |result| {
            let batch: Vec<Result<StreamEvent, ApiError>> = match result {
                Ok(chunk) => parser.feed(&chunk).into_iter().map(Ok).collect(),
                Err(err) => vec![Err(ApiError::Stream(err.to_string()))],
            };
            stream::iter(batch)
        });

        Ok(Box::pin(events))
    }
}

/// Incremental parser for the SSE response body.
///
/// Frames accumulate and split as raw bytes; a frame is decoded only once it
/// is complete, so a multi-byte character broken across network chunks is
/// never turned into replacement characters. The API repeats the
/// `search_results` array on multiple chunks; only the first occurrence is
/// surfaced so a turn sees at most one sources event.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    sources_seen: bool,
}

impl SseParser {
    /// Feed arbitrary bytes into the parser and drain complete events.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(split) = self.buffer.windows(2).position(|pair| pair == b"\n\n") {
            let frame_bytes = self.buffer[..split].to_vec();
            self.buffer.drain(..split + 2);
            let frame = String::from_utf8_lossy(&frame_bytes);

            let Some(payload) = data_payload(&frame) else {
                continue;
            };
            if payload == "[DONE]" || payload.is_empty() {
                continue;
            }
            let Ok(value) = serde_json::from_str::<Value>(&payload) else {
                continue;
            };
            self.collect_events(&value, &mut events);
        }

        events
    }

    fn collect_events(&mut self, value: &Value, events: &mut Vec<StreamEvent>) {
        if let Some(content) = value
            .pointer("/choices/0/delta/content")
            .and_then(Value::as_str)
            && !content.is_empty()
        {
            events.push(StreamEvent::Token(content.to_string()));
        }

        if !self.sources_seen
            && let Some(results) = value.get("search_results").and_then(Value::as_array)
        {
            let sources = results
                .iter()
                .filter_map(|entry| {
                    let title = entry.get("title").and_then(Value::as_str)?;
                    let url = entry.get("url").and_then(Value::as_str)?;
                    Some(SearchResult {
                        title: title.to_string(),
                        url: url.to_string(),
                    })
                })
                .collect::<Vec<SearchResult>>();

            if !sources.is_empty() {
                self.sources_seen = true;
                events.push(StreamEvent::Sources(sources));
            }
        }
    }
}

fn data_payload(frame: &str) -> Option<String> {
    let data_lines: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect();

    if data_lines.is_empty() {
        None
    } else {
        Some(data_lines.join("\n"))
    }
}

fn error_body_message(body: &str) -> Option<String> {
    let value = serde_json::from_str::<Value>(body).ok()?;
    if let Some(message) = value.pointer("/error/message").and_then(Value::as_str) {
        return Some(message.to_string());
    }
    value.get("error").and_then(Value::as_str).map(str::to_string)
}

/// Turn a raw turn error into the message shown to the user.
pub fn classify_api_error(err: &anyhow::Error) -> String {
    let Some(api_err) = err.downcast_ref::<ApiError>() else {
        return err.to_string();
    };

    match api_err {
        ApiError::Status { status: 401, .. } => {
            "Invalid API key. Check your PERPLEXITY_API_KEY.".to_string()
        }
        ApiError::Status {
            status: 429,
            retry_after,
            ..
        } => match retry_after {
            Some(secs) => format!("Rate limited. Retry after {secs}s."),
            None => "Rate limited.".to_string(),
        },
        ApiError::Status { status, .. } if *status >= 500 => {
            format!("Perplexity server error ({status}). Try again later.")
        }
        ApiError::Status {
            status, message, ..
        } => format!("API error ({status}): {message}"),
        ApiError::Connect(_) => "Could not reach the Perplexity API. Check your connection.".to_string(),
        ApiError::Stream(detail) => format!("Response stream interrupted: {detail}"),
    }
}
