//! OpenAI-compatible `/v1/chat/completions`.
//!
//! Providers return whole replies, so a streaming request gets the reply as a
//! synthesized SSE stream: one content chunk, one stop chunk, then `[DONE]`.

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
use tracing::debug;
use webai_chat::adapter::{completion_chunks, completion_response, dispatch};
use webai_chat::{CompletionChunk, CompletionRequest, ConversationKey};

use crate::error::ApiResult;
use crate::state::AppState;

type SseStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/v1/chat/completions", post(chat_completions))
}

async fn chat_completions(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<CompletionRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(req) = payload?;
    let settings = state.settings();
    let key = ConversationKey::from_request(req.conversation_id.as_deref());
    debug!(
        "Completion request: key={} model={:?} messages={} stream={}",
        key,
        req.model,
        req.messages.len(),
        req.wants_stream()
    );

    let (route, reply) = dispatch(
        &state.router,
        &settings,
        &key,
        req.model.as_deref(),
        &req.messages,
    )
    .await?;

    if req.wants_stream() {
        let chunks = completion_chunks(reply, &route.echo);
        return Ok(Sse::new(chunk_stream(chunks)).into_response());
    }
    Ok(Json(completion_response(reply, &route.echo)).into_response())
}

fn chunk_stream(chunks: Vec<CompletionChunk>) -> SseStream {
    Box::pin(async_stream::stream! {
        for chunk in chunks {
            let data = serde_json::to_string(&chunk).unwrap_or_default();
            yield Ok::<_, Infallible>(Event::default().data(data));
        }
        yield Ok(Event::default().data("[DONE]"));
    })
}
