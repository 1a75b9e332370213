use crate::config::prompt::PromptContext;
use crate::llm::chat::{ ChatClient, ChatError };
use crate::models::chat::{ ChatMessage, ErrorBody, Role };
use std::future::ready;
use std::sync::Arc;
use axum::{
    body::{ Body, Bytes },
    extract::State,
    http::{ header::CONTENT_TYPE, StatusCode },
    response::{ IntoResponse, Response },
    routing::post,
    Json,
    Router,
};
use futures::{ stream, StreamExt, TryStreamExt };
use serde_json::Value as JsonValue;
use thiserror::Error;
use tower_http::cors::{ Any, CorsLayer };
use uuid::Uuid;
use log::{ info, warn, error };

pub const CHAT_ROUTE: &str = "/api/chat";

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Messages array is required")]
    MalformedRequest,
    #[error("Each message needs a role of \"user\" or \"assistant\" and string content")]
    InvalidMessage {
        index: usize,
        reason: String,
    },
    #[error("Failed to get response from AI")]
    Upstream(#[source] ChatError),
}

impl GatewayError {
    fn status(&self) -> StatusCode {
        match self {
            GatewayError::MalformedRequest | GatewayError::InvalidMessage { .. } =>
                StatusCode::BAD_REQUEST,
            GatewayError::Upstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let body = ErrorBody { error: self.to_string() };
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub chat_client: Arc<dyn ChatClient>,
    pub prompt: Arc<PromptContext>,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(CHAT_ROUTE, post(chat_handler))
        .layer(cors)
        .with_state(state)
}

/// Extracts the caller's conversation. Only the `messages` field is read.
pub fn parse_messages(body: &[u8]) -> Result<Vec<ChatMessage>, GatewayError> {
    let value: JsonValue = serde_json::from_slice(body)
        .map_err(|_| GatewayError::MalformedRequest)?;
    let items = value
        .get("messages")
        .and_then(JsonValue::as_array)
        .ok_or(GatewayError::MalformedRequest)?;

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let msg: ChatMessage = serde_json::from_value(item.clone())
                .map_err(|e| GatewayError::InvalidMessage { index, reason: e.to_string() })?;
            if msg.role == Role::System {
                return Err(GatewayError::InvalidMessage {
                    index,
                    reason: "system role is reserved for the prompt context".into(),
                });
            }
            Ok(msg)
        })
        .collect()
}

async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4();

    match relay_chat(&state, request_id, &body).await {
        Ok(response) => response,
        Err(e) => {
            match &e {
                GatewayError::InvalidMessage { index, reason } => {
                    warn!("[{}] Rejected message {}: {}", request_id, index, reason);
                }
                GatewayError::MalformedRequest => {
                    warn!("[{}] Rejected request without a messages array", request_id);
                }
                GatewayError::Upstream(source) => {
                    error!("[{}] Upstream chat error: {}", request_id, source);
                }
            }
            e.into_response()
        }
    }
}

async fn relay_chat(
    state: &AppState,
    request_id: Uuid,
    body: &[u8]
) -> Result<Response, GatewayError> {
    let messages = parse_messages(body)?;
    info!(
        "[{}] Chat request with {} messages (model {})",
        request_id,
        messages.len(),
        state.chat_client.model()
    );

    let mut upstream = Vec::with_capacity(messages.len() + 1);
    upstream.push(state.prompt.system_message());
    upstream.extend(messages);

    let mut fragments = state.chat_client
        .stream_chat(upstream).await
        .map_err(GatewayError::Upstream)?
        .try_filter(|fragment| ready(!fragment.is_empty()));

    // Nothing has been written yet, so a failure here can still become a 500.
    let first = match fragments.next().await {
        Some(Ok(fragment)) => Some(fragment),
        Some(Err(e)) => {
            return Err(GatewayError::Upstream(e));
        }
        None => None,
    };

    let relayed = stream::iter(first.map(Ok))
        .chain(fragments)
        .inspect_err(move |e| {
            error!("[{}] Upstream stream failed mid-response: {}", request_id, e);
        });

    Ok(
        (
            [(CONTENT_TYPE, "text/plain; charset=utf-8")],
            Body::from_stream(relayed),
        ).into_response()
    )
}
