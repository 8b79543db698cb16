//! Google Generative Language `generateContent` shape over the same routing.

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use webai_chat::adapter::dispatch;
use webai_chat::{ChatMessage, ConversationKey};

use crate::error::ApiResult;
use crate::state::AppState;

const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

#[derive(Debug, Deserialize)]
pub struct GenerateContentRequest {
    #[serde(default)]
    pub contents: Vec<Content>,
}

#[derive(Debug, Deserialize)]
pub struct Content {
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
pub struct Part {
    #[serde(default)]
    pub text: String,
}

impl GenerateContentRequest {
    /// Every part's text, concatenated in order.
    pub fn prompt(&self) -> String {
        self.contents
            .iter()
            .flat_map(|c| c.parts.iter())
            .map(|p| p.text.as_str())
            .collect()
    }
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/v1beta/models/{model}", post(generate_content))
}

/// `gemini-pro:generateContent` names the model `gemini-pro`.
fn model_name(path: &str) -> &str {
    path.split(':').next().unwrap_or(path)
}

async fn generate_content(
    State(state): State<Arc<AppState>>,
    Path(model): Path<String>,
    payload: Result<Json<GenerateContentRequest>, JsonRejection>,
) -> ApiResult<Json<Value>> {
    let Json(req) = payload?;
    let settings = state.settings();
    let (_, reply) = dispatch(
        &state.router,
        &settings,
        &ConversationKey::fresh(),
        Some(model_name(&model)),
        &[ChatMessage::user(req.prompt())],
    )
    .await?;
    Ok(Json(generate_content_response(&reply)))
}

pub fn generate_content_response(text: &str) -> Value {
    let ratings: Vec<Value> = HARM_CATEGORIES
        .iter()
        .map(|c| json!({"category": c, "probability": "NEGLIGIBLE"}))
        .collect();
    json!({
        "candidates": [{
            "content": {
                "parts": [{"text": text}],
                "role": "model",
            },
            "finishReason": "STOP",
            "index": 0,
            "safetyRatings": ratings,
        }],
        "promptFeedback": {"safetyRatings": ratings},
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_name_drops_method_suffix() {
        assert_eq!(model_name("gemini-2.5-pro:generateContent"), "gemini-2.5-pro");
        assert_eq!(model_name("gemini-2.5-flash"), "gemini-2.5-flash");
    }

    #[test]
    fn test_prompt_concatenates_parts() {
        let req: GenerateContentRequest = serde_json::from_value(json!({
            "contents": [
                {"role": "user", "parts": [{"text": "Hello, "}, {"text": "world"}]},
                {"parts": [{"text": "!"}]},
            ]
        }))
        .unwrap();
        assert_eq!(req.prompt(), "Hello, world!");
    }

    #[test]
    fn test_response_shape() {
        let body = generate_content_response("Hi");
        assert_eq!(body["candidates"][0]["content"]["parts"][0]["text"], "Hi");
        assert_eq!(body["candidates"][0]["content"]["role"], "model");
        assert_eq!(body["candidates"][0]["finishReason"], "STOP");
        assert_eq!(body["candidates"][0]["safetyRatings"].as_array().unwrap().len(), 4);
        assert_eq!(body["promptFeedback"]["safetyRatings"].as_array().unwrap().len(), 4);
    }
}
