use crate::api::error::{ApiError, ApiResult};
use crate::api::types::{
    ChatCompletionRequest, ChatCompletionResponse, Choice, Usage, DEFAULT_MAX_TOKENS,
    DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};
use crate::state::AppState;
use axum::{extract::State, Json};
use llamagrid_cluster::ChatMessage;
use tracing::instrument;
use uuid::Uuid;

/// OpenAI-compatible chat completion endpoint.
#[instrument(skip(state, req))]
pub async fn chat_completions(
    State(state): State<AppState>,
    Json(req): Json<ChatCompletionRequest>,
) -> ApiResult<Json<ChatCompletionResponse>> {
    if req.messages.is_empty() {
        return Err(ApiError::BadRequest("messages must not be empty".into()));
    }

    let temperature = req.temperature.unwrap_or(DEFAULT_TEMPERATURE);
    let max_tokens = req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS);
    if !(0.0..=2.0).contains(&temperature) {
        return Err(ApiError::BadRequest(
            "temperature must be between 0 and 2".into(),
        ));
    }
    if max_tokens == 0 {
        return Err(ApiError::BadRequest("max_tokens must be positive".into()));
    }

    let reply = state
        .dispatcher
        .submit(req.messages.clone(), temperature, max_tokens)
        .await?;

    let text = reply.text.unwrap_or_default();
    let usage = Usage::from_text(&req.messages, &text);

    Ok(Json(ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion",
        created: llamagrid_cluster::now_millis() / 1000,
        model: req.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
        choices: vec![Choice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: text,
            },
            finish_reason: reply.finish_reason.unwrap_or_else(|| "stop".to_string()),
        }],
        usage,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Duration;

    fn request(messages: Vec<ChatMessage>) -> ChatCompletionRequest {
        ChatCompletionRequest {
            messages,
            model: None,
            temperature: None,
            max_tokens: None,
        }
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let state = AppState::new(Duration::from_secs(1));
        let result = chat_completions(State(state), Json(request(vec![]))).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_invalid_temperature_rejected() {
        let state = AppState::new(Duration::from_secs(1));
        let mut req = request(vec![ChatMessage {
            role: "user".into(),
            content: "hi".into(),
        }]);
        req.temperature = Some(9.0);
        let result = chat_completions(State(state), Json(req)).await;
        assert!(matches!(result, Err(ApiError::BadRequest(_))));
    }

    #[tokio::test]
    async fn test_no_workers_maps_to_service_unavailable() {
        let state = AppState::new(Duration::from_secs(1));
        let req = request(vec![ChatMessage {
            role: "user".into(),
            content: "hi".into(),
        }]);
        let result = chat_completions(State(state), Json(req)).await;
        assert!(matches!(result, Err(ApiError::NoEligibleWorker)));
    }
}
