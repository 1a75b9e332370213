use async_trait::async_trait;
use log::info;
use reqwest::Client as HttpClient;
use serde::Serialize;

use super::{ bearer_http_client, stream_completions, validate_endpoint, ChatClient, ChatError, FragmentStream };
use crate::llm::{ LlmConfig, LlmType };
use crate::models::chat::ChatMessage;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_URL: &str = "https://api.openai.com/v1/chat/completions";

pub struct OpenAIChatClient {
    http: HttpClient,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct OpenAIChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_completion_tokens: u32,
    stream: bool,
    store: bool,
}

impl OpenAIChatClient {
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
            .ok_or(ChatError::MissingApiKey("OpenAI"))?;

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
impl ChatClient for OpenAIChatClient {
    async fn stream_chat(&self, messages: Vec<ChatMessage>) -> Result<FragmentStream, ChatError> {
        let req = OpenAIChatRequest {
            model: self.model.clone(),
            messages,
            temperature: self.temperature,
            max_completion_tokens: self.max_tokens,
            stream: true,
            store: false,
        };

        info!("Starting OpenAI stream request to {} ({} messages)", self.base_url, req.messages.len());
        Ok(stream_completions(self.http.clone(), self.base_url.clone(), req, "OpenAI"))
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn provider(&self) -> LlmType {
        LlmType::OpenAI
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn custom_endpoint_and_model_are_kept() {
        let config = LlmConfig {
            llm_type: LlmType::OpenAI,
            api_key: Some("sk-test".into()),
            completion_model: Some("gpt-4o".into()),
            base_url: Some("http://localhost:8080/v1/chat/completions".into()),
            ..LlmConfig::default()
        };
        let client = OpenAIChatClient::from_config(&config).unwrap();
        assert_eq!(client.model(), "gpt-4o");
        assert_eq!(client.base_url, "http://localhost:8080/v1/chat/completions");
        assert_eq!(client.provider(), LlmType::OpenAI);
    }

    #[test]
    fn api_key_with_newline_is_rejected() {
        let err = OpenAIChatClient::new("sk\nbad".into(), None, None, 500, 0.7).err().unwrap();
        assert!(matches!(err, ChatError::InvalidApiKey(_)));
    }
}
