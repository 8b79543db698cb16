//! Anthropic-compatible `POST /v1/messages`.
//!
//! Clients resend the whole history each call, so every request runs on a
//! fresh conversation. Streaming requests get the reply as synthesized
//! Messages events. A model whose provider is disabled is served by the
//! default provider, and the requested name is echoed back.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use futures::Stream;
use serde_json::Value;
use tracing::{debug, info};
use webai_chat::adapter::dispatch;
use webai_chat::messages::{message_events, message_response, to_chat_messages};
use webai_chat::{ConversationKey, MessagesRequest};
use webai_core::Provider;

use crate::error::ApiResult;
use crate::state::AppState;

type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/v1/messages", post(create_message))
}

async fn create_message(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<MessagesRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = payload?;
    let settings = state.settings();
    debug!(
        "Messages request: model={:?} messages={} tools={} stream={}",
        req.model,
        req.messages.len(),
        req.tools.len(),
        req.wants_stream()
    );

    let model = req
        .model
        .as_deref()
        .filter(|m| Provider::for_model(m).map_or(true, |p| settings.is_enabled(p)));
    let messages = to_chat_messages(&req);
    let (route, reply) = dispatch(
        &state.router,
        &settings,
        &ConversationKey::fresh(),
        model,
        &messages,
    )
    .await?;

    let echo = req.model.clone().unwrap_or(route.echo);
    let message = message_response(&reply, &echo);
    info!(
        "Messages reply via {} ({} blocks, stop_reason={})",
        route.provider,
        message.content.len(),
        message.stop_reason
    );

    if req.wants_stream() {
        return Ok(Sse::new(event_stream(message_events(&message))).into_response());
    }
    Ok(Json(message).into_response())
}

fn event_stream(events: Vec<(&'static str, Value)>) -> SseStream {
    Box::pin(async_stream::stream! {
        for (name, data) in events {
            yield Ok::<_, Infallible>(Event::default().event(name).data(data.to_string()));
        }
    })
}
