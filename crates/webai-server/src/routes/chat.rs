//! Plain-text chat routes: `/chat`, `/chat-with-context`, `/translate`,
//! `/gemini` and `/gemini-chat`.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use webai_chat::adapter::dispatch;
use webai_chat::{ChatMessage, ConversationKey, SimpleChatRequest, SimpleChatResponse, TextResponse};
use webai_core::Provider;

use crate::error::ApiResult;
use crate::state::AppState;

const CONTEXT_KEY: &str = "default";
const TRANSLATE_KEY: &str = "translate";
const GEMINI_CHAT_KEY: &str = "gemini-chat";

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat-with-context", post(chat_with_context))
        .route("/translate", post(translate))
        .route("/gemini", post(gemini))
        .route("/gemini-chat", post(gemini_chat))
}

/// One user message under `key`; returns the reply text.
async fn ask(
    state: &AppState,
    key: ConversationKey,
    model: Option<&str>,
    prompt: String,
) -> ApiResult<String> {
    let settings = state.settings();
    let (_, reply) = dispatch(
        &state.router,
        &settings,
        &key,
        model,
        &[ChatMessage::user(prompt)],
    )
    .await?;
    Ok(reply)
}

/// Gemini endpoints use the Gemini default model unless the caller names one.
fn gemini_model(state: &AppState, requested: Option<String>) -> String {
    requested
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| state.settings().default_model(Provider::Gemini))
}

async fn chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SimpleChatRequest>, JsonRejection>,
) -> ApiResult<Json<SimpleChatResponse>> {
    let Json(req) = payload?;
    let reply = ask(&state, ConversationKey::fresh(), req.model.as_deref(), req.prompt).await?;
    Ok(Json(SimpleChatResponse { reply }))
}

async fn chat_with_context(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SimpleChatRequest>, JsonRejection>,
) -> ApiResult<Json<SimpleChatResponse>> {
    let Json(req) = payload?;
    let reply = ask(
        &state,
        ConversationKey::shared(CONTEXT_KEY),
        req.model.as_deref(),
        req.prompt,
    )
    .await?;
    Ok(Json(SimpleChatResponse { reply }))
}

async fn translate(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SimpleChatRequest>, JsonRejection>,
) -> ApiResult<Json<TextResponse>> {
    let Json(req) = payload?;
    let response = ask(
        &state,
        ConversationKey::shared(TRANSLATE_KEY),
        req.model.as_deref(),
        req.prompt,
    )
    .await?;
    Ok(Json(TextResponse { response }))
}

async fn gemini(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SimpleChatRequest>, JsonRejection>,
) -> ApiResult<Json<TextResponse>> {
    let Json(req) = payload?;
    let model = gemini_model(&state, req.model);
    let response = ask(&state, ConversationKey::fresh(), Some(&model), req.prompt).await?;
    Ok(Json(TextResponse { response }))
}

async fn gemini_chat(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<SimpleChatRequest>, JsonRejection>,
) -> ApiResult<Json<TextResponse>> {
    let Json(req) = payload?;
    let model = gemini_model(&state, req.model);
    let response = ask(
        &state,
        ConversationKey::shared(GEMINI_CHAT_KEY),
        Some(&model),
        req.prompt,
    )
    .await?;
    Ok(Json(TextResponse { response }))
}
