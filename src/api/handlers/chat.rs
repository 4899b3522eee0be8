//! Helpdesk assistant: forwards the latest user message to an OpenAI-compatible
//! chat-completions endpoint, grounded on the optional knowledge base.

use anyhow::{anyhow, Context, Result};
use axum::{extract::Extension, http::StatusCode, response::IntoResponse, Json};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, info_span, Instrument};
use utoipa::ToSchema;

use super::auth::AuthState;
use crate::error::{ApiError, ErrorBody};

const CHAT_MODEL: &str = "meta-llama/Llama-3.2-3B-Instruct";
const MAX_TOKENS: u32 = 300;
const DEFAULT_USER_MESSAGE: &str = "Hello";
const FALLBACK_REPLY: &str = "I couldn't generate a response right now.";

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone, Default)]
pub struct ChatMessage {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub content: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ChatResponse {
    pub message: ChatMessage,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    max_tokens: u32,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: Option<ChatMessage>,
}

fn system_prompt(knowledge_base: Option<&str>, user_message: &str) -> String {
    let knowledge = knowledge_base
        .filter(|kb| !kb.trim().is_empty())
        .map(|kb| format!("Use the following knowledge base to answer user queries: {kb}\n\n"))
        .unwrap_or_default();

    format!(
        "You are the HCK College AI Assistant, a strict query chatbot for Herald College Kathmandu (HCK).\n\n\
         --- GUIDELINES ---\n\
         1. USE THE KNOWLEDGE BASE BELOW TO ANSWER ALL QUERIES.\n\
         2. IF THE INFORMATION IS NOT IN THE KNOWLEDGE BASE, POLITELY STATE THAT YOU DO NOT HAVE THAT SPECIFIC INFORMATION AND ADVISE THE USER TO CONTACT THE COLLEGE DIRECTLY.\n\
         3. DO NOT MAKE UP OR HALLUCINATE ANY FACTS, DATES, OR DETAILS.\n\
         4. RESPOND IN A PROFESSIONAL, HELPFUL, AND CONCISE MANNER.\n\n\
         --- KNOWLEDGE BASE ---\n\
         {knowledge}\n\n\
         USER QUERY: {user_message}"
    )
}

async fn complete(auth_state: &AuthState, api_key: &str, user_message: &str) -> Result<String> {
    let request = CompletionRequest {
        model: CHAT_MODEL,
        messages: vec![
            ChatMessage {
                role: "system".to_string(),
                content: system_prompt(auth_state.knowledge_base(), user_message),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user_message.to_string(),
            },
        ],
        max_tokens: MAX_TOKENS,
    };

    let span = info_span!("chat.completion", http.method = "POST", model = CHAT_MODEL);
    async {
        let response = auth_state
            .http()
            .post(auth_state.config().chat_endpoint())
            .bearer_auth(api_key)
            .json(&request)
            .send()
            .await
            .context("chat provider request failed")?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("chat provider returned {status}: {body}"));
        }
        let completion: CompletionResponse = response
            .json()
            .await
            .context("invalid chat provider response")?;

        Ok(completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message)
            .map(|message| message.content.trim().to_string())
            .filter(|content| !content.is_empty())
            .unwrap_or_else(|| FALLBACK_REPLY.to_string()))
    }
    .instrument(span)
    .await
}

#[utoipa::path(
    post,
    path = "/api/chat",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Assistant reply", body = ChatResponse),
        (status = 400, description = "Messages array is required", body = ErrorBody),
        (status = 502, description = "Chat provider failed", body = ErrorBody),
        (status = 503, description = "Chat provider not configured", body = ErrorBody)
    ),
    tag = "chat"
)]
pub async fn chat(
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<ChatRequest>>,
) -> impl IntoResponse {
    let Some(messages) = payload.and_then(|Json(request)| request.messages) else {
        return ApiError::BadRequest("Messages array is required".to_string()).into_response();
    };

    let Some(api_key) = auth_state.config().huggingface_api_key() else {
        return ApiError::NotConfigured("Chat assistant is not configured".to_string())
            .into_response();
    };

    let user_message = messages
        .last()
        .map(|message| message.content.trim())
        .filter(|content| !content.is_empty())
        .unwrap_or(DEFAULT_USER_MESSAGE);

    match complete(&auth_state, api_key.expose_secret(), user_message).await {
        Ok(content) => {
            info!(history = messages.len(), "Chat reply generated");
            (
                StatusCode::OK,
                Json(ChatResponse {
                    message: ChatMessage {
                        role: "assistant".to_string(),
                        content,
                    },
                }),
            )
                .into_response()
        }
        Err(err) => {
            error!("Chat completion failed: {err:#}");
            ApiError::UpstreamUnavailable("Failed to get response from the assistant".to_string())
                .into_response()
        }
    }
}
