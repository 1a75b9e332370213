use async_trait::async_trait;
use bytes::Bytes;
use futures::{ Stream, StreamExt };
use log::debug;
use reqwest::Client as HttpClient;
use std::pin::Pin;
use thiserror::Error;
use url::Url;

use crate::models::chat::{ ChatMessage, ChatRequest };

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ConsumerError>> + Send>>;

#[derive(Debug, Error)]
pub enum ConsumerError {
    #[error("Invalid gateway URL '{url}': {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("Gateway request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Gateway returned status {0}")]
    Status(u16),
    #[error("Gateway response body failed: {0}")]
    Body(String),
}

/// Delivers a conversation to the completion gateway and hands back the raw reply body.
#[async_trait]
pub trait GatewayTransport: Send + Sync {
    async fn post_chat(&self, messages: Vec<ChatMessage>) -> Result<ByteStream, ConsumerError>;
}

pub struct HttpTransport {
    http: HttpClient,
    url: Url,
}

impl HttpTransport {
    pub fn new(gateway_url: &str) -> Result<Self, ConsumerError> {
        let url = Url::parse(gateway_url).map_err(|source| ConsumerError::InvalidUrl {
            url: gateway_url.to_string(),
            source,
        })?;
        Ok(Self { http: HttpClient::new(), url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl GatewayTransport for HttpTransport {
    async fn post_chat(&self, messages: Vec<ChatMessage>) -> Result<ByteStream, ConsumerError> {
        debug!("Posting {} messages to {}", messages.len(), self.url);
        let resp = self.http
            .post(self.url.clone())
            .json(&ChatRequest { messages })
            .send().await?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ConsumerError::Status(status.as_u16()));
        }

        Ok(Box::pin(resp.bytes_stream().map(|chunk| chunk.map_err(ConsumerError::from))))
    }
}

/// Incremental UTF-8 decoder for a body split at arbitrary byte boundaries.
#[derive(Default)]
pub struct TextDecoder {
    pending: Vec<u8>,
}

impl TextDecoder {
    /// Decodes as much of the buffered input as forms complete characters.
    pub fn push(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match e.error_len() {
                        // Incomplete trailing sequence: wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    /// Flushes whatever is left; a dangling partial character becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        let rest = std::mem::take(&mut self.pending);
        String::from_utf8_lossy(&rest).into_owned()
    }
}
