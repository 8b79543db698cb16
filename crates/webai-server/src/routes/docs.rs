//! `/openapi.json` and a small HTML index at `/docs`.

use std::sync::Arc;

use axum::response::Html;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

/// (method, path, summary)
const ENDPOINTS: &[(&str, &str, &str)] = &[
    ("post", "/chat", "Stateless one-shot chat: {prompt} -> {reply}"),
    ("post", "/chat-with-context", "Chat on the shared 'default' conversation"),
    ("post", "/translate", "Chat on the shared 'translate' conversation: {message} -> {response}"),
    ("post", "/gemini", "Stateless Gemini prompt: {message, model?} -> {response}"),
    ("post", "/gemini-chat", "Gemini on the shared 'gemini-chat' conversation"),
    ("post", "/v1/chat/completions", "OpenAI chat completion, JSON or SSE"),
    ("post", "/v1/messages", "Anthropic Messages, JSON or SSE, with tool-call markers"),
    ("get", "/v1/models", "Models of the enabled providers"),
    ("post", "/v1beta/models/{model}", "Google Generative generateContent"),
    ("get", "/sessions", "Live conversation sessions"),
    ("delete", "/sessions/{key}", "Close a session"),
    ("get", "/config", "Configuration with cookies masked"),
    ("put", "/config", "Update default AI, default models, enabled providers, browser"),
    ("get", "/health", "Liveness"),
];

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/openapi.json", get(openapi))
        .route("/docs", get(docs))
}

pub fn openapi_document() -> Value {
    let mut paths = serde_json::Map::new();
    for (method, path, summary) in ENDPOINTS {
        let entry = paths
            .entry(path.to_string())
            .or_insert_with(|| Value::Object(Default::default()));
        if let Value::Object(ops) = entry {
            ops.insert(
                method.to_string(),
                json!({
                    "summary": summary,
                    "responses": {"200": {"description": "OK"}},
                }),
            );
        }
    }
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "WebAI",
            "version": env!("CARGO_PKG_VERSION"),
            "description": "OpenAI-compatible API over browser-authenticated AI web apps",
        },
        "paths": paths,
    })
}

async fn openapi() -> Json<Value> {
    Json(openapi_document())
}

async fn docs() -> Html<String> {
    let rows: String = ENDPOINTS
        .iter()
        .map(|(method, path, summary)| {
            format!(
                "<tr><td><code>{}</code></td><td><code>{}</code></td><td>{}</td></tr>\n",
                method.to_uppercase(),
                path,
                summary
            )
        })
        .collect();
    Html(format!(
        "<!doctype html>\n<html><head><title>WebAI API</title></head><body>\n\
         <h1>WebAI API</h1>\n<p>Machine-readable: <a href=\"/openapi.json\">/openapi.json</a></p>\n\
         <table>\n{}</table>\n</body></html>\n",
        rows
    ))
}
