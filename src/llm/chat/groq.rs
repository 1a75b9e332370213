use async_trait::async_trait;
use log::info;
use reqwest::Client as HttpClient;
use serde::Serialize;

use super::{ bearer_http_client, stream_completions, validate_endpoint, ChatClient, ChatError, FragmentStream };
use crate::llm::{ LlmConfig, LlmType };
use crate::models::chat::ChatMessage;

const DEFAULT_MODEL: &str = "llama-3.1-8b-instant";
const DEFAULT_URL: &str = "https://api.groq.com/openai/v1/chat/completions";

pub struct GroqChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct GroqRequest {
    messages: Vec<ChatMessage>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    stream: bool,
}

impl GroqChatClient {
    pub fn new(
        api_key: String,
        model: Option<String>,
        base_url: Option<String>,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<Self, ChatError> {
        let chat_model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let api_url = validate_endpoint(base_url.as_deref().unwrap_or(DEFAULT_URL))?;
        let http = bearer_http_client(&api_key)?;

        Ok(Self {
            http,
            model: chat_model,
            base_url: api_url,
            max_tokens,
            temperature,
        })
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, ChatError> {
        let api_key = config.api_key
            .clone()
            .ok_or(ChatError::MissingApiKey("Groq"))?;

        Self::new(
            api_key,
            config.completion_model.clone(),
            config.base_url.clone(),
            config.max_tokens,
            config.temperature,
        )
    }
}

#[async_trait]
impl ChatClient for GroqChatClient {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, ChatError> {
        let req = GroqRequest {
            messages,
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            stream: true,
        };

        info!("Starting Groq stream request to {} ({} messages)", self.base_url, req.messages.len());
        Ok(stream_completions(self.http.clone(), self.base_url.clone(), req, "Groq"))
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> LlmType {
        LlmType::Groq
    }
}
