pub mod groq;
pub mod openai;

use async_trait::async_trait;
use futures::{ Stream, StreamExt };
use log::{ debug, warn };
use reqwest::{ Client as HttpClient, header::{ HeaderMap, HeaderValue, CONTENT_TYPE, AUTHORIZATION } };
use serde::{ Deserialize, Serialize };
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use super::{ LlmConfig, LlmType };
use self::groq::GroqChatClient;
use self::openai::OpenAIChatClient;
use crate::models::chat::ChatMessage;

/// Ordered, finite, non-restartable sequence of text fragments from the model.
pub type FragmentStream = Pin<Box<dyn Stream<Item = Result<String, ChatError>> + Send>>;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0} API key is required")]
    MissingApiKey(&'static str),
    #[error("Invalid API key format: {0}")]
    InvalidApiKey(String),
    #[error("Invalid base URL '{url}': {source}")]
    InvalidBaseUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("{provider} request error: {source}")]
    Http {
        provider: &'static str,
        #[source]
        source: reqwest::Error,
    },
    #[error("{provider} API error: status {status}: {body}")]
    Status {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("{0}")]
    Upstream(String),
}

#[async_trait]
pub trait ChatClient: Send + Sync {
    /// Starts a streamed completion over `messages`, in order. Failures after
    /// the call returns arrive as `Err` items on the stream.
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, ChatError>;

    fn model(&self) -> &str;

    fn provider(&self) -> LlmType;
}

pub fn new_client(config: &LlmConfig) -> Result<Arc<dyn ChatClient>, ChatError> {
    let client: Arc<dyn ChatClient> = match config.llm_type {
        LlmType::Groq => {
            let specific_client = GroqChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
        LlmType::OpenAI => {
            let specific_client = OpenAIChatClient::from_config(config)?;
            Arc::new(specific_client)
        }
    };
    Ok(client)
}

pub(crate) fn bearer_http_client(api_key: &str) -> Result<HttpClient, ChatError> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| ChatError::InvalidApiKey(e.to_string()))?
    );

    HttpClient::builder()
        .default_headers(headers)
        .build()
        .map_err(|source| ChatError::Http { provider: "http", source })
}

pub(crate) fn validate_endpoint(raw: &str) -> Result<String, ChatError> {
    url::Url::parse(raw)
        .map(|u| u.to_string())
        .map_err(|source| ChatError::InvalidBaseUrl { url: raw.to_string(), source })
}

#[derive(Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Fragment(String),
    Done,
    Skip,
}

/// Interprets one line of an OpenAI-compatible `text/event-stream` body.
pub(crate) fn parse_sse_line(line: &str) -> SseEvent {
    let line = line.trim_end_matches('\r');
    let data = match line.strip_prefix("data:") {
        Some(data) => data.trim_start(),
        None => return SseEvent::Skip,
    };
    if data == "[DONE]" {
        return SseEvent::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(chunk) => {
            let mut text = String::new();
            let mut stopped = false;
            for choice in chunk.choices {
                if let Some(content) = choice.delta.content {
                    text.push_str(&content);
                }
                if choice.finish_reason.as_deref() == Some("stop") {
                    stopped = true;
                }
            }
            match (text.is_empty(), stopped) {
                (false, _) => SseEvent::Fragment(text),
                (true, true) => SseEvent::Done,
                (true, false) => SseEvent::Skip,
            }
        }
        Err(e) => {
            warn!("Failed to parse stream chunk: {}, error: {}", data, e);
            SseEvent::Skip
        }
    }
}

/// Reassembles complete lines from network chunks that may split them anywhere,
/// including inside a multi-byte character.
#[derive(Default)]
pub(crate) struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line[..line.len() - 1]).into_owned());
        }
        lines
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

/// Posts `payload` to an OpenAI-compatible chat completions endpoint and relays
/// the streamed deltas through a channel, one item per non-empty fragment.
pub(crate) fn stream_completions<P>(
    http: HttpClient,
    url: String,
    payload: P,
    provider: &'static str
) -> FragmentStream
    where P: Serialize + Send + 'static
{
    let (tx, rx) = mpsc::channel(32);

    tokio::spawn(async move {
        let resp = match http.post(&url).json(&payload).send().await {
            Ok(r) => r,
            Err(source) => {
                let _ = tx.send(Err(ChatError::Http { provider, source })).await;
                return;
            }
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let _ = tx.send(
                Err(ChatError::Status { provider, status: status.as_u16(), body })
            ).await;
            return;
        }

        let mut lines = LineBuffer::default();
        let mut bytes = resp.bytes_stream();
        while let Some(chunk) = bytes.next().await {
            match chunk {
                Ok(buf) => {
                    debug!("{} raw chunk: {} bytes", provider, buf.len());
                    for line in lines.push(&buf) {
                        match parse_sse_line(&line) {
                            SseEvent::Fragment(text) => {
                                if tx.send(Ok(text)).await.is_err() {
                                    return;
                                }
                            }
                            SseEvent::Done => {
                                return;
                            }
                            SseEvent::Skip => {}
                        }
                    }
                }
                Err(source) => {
                    let _ = tx.send(Err(ChatError::Http { provider, source })).await;
                    return;
                }
            }
        }

        if let Some(line) = lines.finish() {
            if let SseEvent::Fragment(text) = parse_sse_line(&line) {
                let _ = tx.send(Ok(text)).await;
            }
        }
    });

    Box::pin(ReceiverStream::new(rx))
}
