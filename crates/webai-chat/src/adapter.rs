//! Translation between the OpenAI chat-completion shape and the session router.

use serde::Serialize;
use webai_core::{Error, Provider, Result, Settings};

use crate::session::SessionRouter;
use crate::types::{
    ChatMessage, Choice, ChunkChoice, CompletionChunk, CompletionResponse, Delta, Role, Usage,
};

pub const FINISH_STOP: &str = "stop";

/// An inbound message list split into what the provider needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    /// All system messages joined, in order.
    pub system: Option<String>,
    /// User/assistant turns before the latest user message.
    pub history: Vec<ChatMessage>,
    pub latest_user: String,
}

/// Split `messages` into system preamble, prior turns and the latest user
/// message. Fails when no non-blank user message is present.
pub fn split_messages(messages: &[ChatMessage]) -> Result<Conversation> {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == Role::System)
        .map(|m| m.content.trim())
        .filter(|c| !c.is_empty())
        .collect();

    let turns: Vec<&ChatMessage> = messages.iter().filter(|m| m.role != Role::System).collect();
    let last_user = turns
        .iter()
        .rposition(|m| m.role == Role::User && !m.content.trim().is_empty())
        .ok_or_else(|| Error::Validation("request must contain at least one user message".into()))?;

    Ok(Conversation {
        system: if system.is_empty() {
            None
        } else {
            Some(system.join("\n\n"))
        },
        history: turns[..last_user]
            .iter()
            .filter(|m| !m.content.trim().is_empty())
            .map(|m| (*m).clone())
            .collect(),
        latest_user: turns[last_user].content.clone(),
    })
}

const EPHEMERAL_PREFIX: &str = "ephemeral-";

/// Identifier scoping a session's history.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct ConversationKey(String);

impl ConversationKey {
    /// A one-shot key; the session is dropped after its single exchange.
    pub fn fresh() -> Self {
        Self(format!("{}{}", EPHEMERAL_PREFIX, uuid::Uuid::new_v4().simple()))
    }

    /// A caller-stable key reused across calls.
    pub fn shared(name: &str) -> Self {
        Self(name.to_string())
    }

    /// `conversation_id` when the caller sent one, otherwise a fresh key.
    pub fn from_request(conversation_id: Option<&str>) -> Self {
        match conversation_id.map(str::trim).filter(|id| !id.is_empty()) {
            Some(id) => Self::shared(id),
            None => Self::fresh(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_ephemeral(&self) -> bool {
        self.0.starts_with(EPHEMERAL_PREFIX)
    }
}

impl std::fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Where a request goes and which model name goes back to the client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelRoute {
    pub provider: Provider,
    /// Model sent to the provider.
    pub model: String,
    /// Model echoed in the response.
    pub echo: String,
}

/// Route by model-name prefix. Names no provider claims go to the
/// configured default provider with its default model.
pub fn resolve_model(requested: Option<&str>, settings: &Settings) -> Result<ModelRoute> {
    let requested = requested.map(str::trim).filter(|m| !m.is_empty());
    match requested.and_then(|m| Provider::for_model(m).map(|p| (p, m))) {
        Some((provider, model)) => Ok(ModelRoute {
            provider,
            model: model.to_string(),
            echo: model.to_string(),
        }),
        None => {
            let provider = settings.default_provider()?;
            let model = settings.default_model(provider);
            Ok(ModelRoute {
                provider,
                echo: requested.map(str::to_string).unwrap_or_else(|| model.clone()),
                model,
            })
        }
    }
}

fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Wrap a reply in the non-streaming envelope.
pub fn completion_response(reply: String, model: &str) -> CompletionResponse {
    CompletionResponse {
        id: completion_id(),
        object: "chat.completion".into(),
        created: now(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChatMessage::assistant(reply),
            finish_reason: FINISH_STOP.into(),
        }],
        usage: Usage::default(),
    }
}

/// The reply as a synthesized stream: one chunk carrying role and content,
/// then a terminating chunk with `finish_reason: "stop"`. The transport adds
/// the `[DONE]` sentinel.
pub fn completion_chunks(reply: String, model: &str) -> Vec<CompletionChunk> {
    let id = completion_id();
    let created = now();
    let chunk = |delta: Delta, finish: Option<&str>| CompletionChunk {
        id: id.clone(),
        object: "chat.completion.chunk".into(),
        created,
        model: model.to_string(),
        choices: vec![ChunkChoice {
            index: 0,
            delta,
            finish_reason: finish.map(str::to_string),
        }],
    };
    vec![
        chunk(
            Delta {
                role: Some(Role::Assistant),
                content: Some(reply),
            },
            None,
        ),
        chunk(Delta::default(), Some(FINISH_STOP)),
    ]
}

/// Validate, route and send one exchange; returns the route and the reply.
///
/// Messages are checked before any session is touched. Session creation and
/// the provider call run under one lock on the key, so the reply always comes
/// from the routed provider. Sessions behind ephemeral keys are closed once
/// the exchange finishes.
pub async fn dispatch(
    router: &SessionRouter,
    settings: &Settings,
    key: &ConversationKey,
    model: Option<&str>,
    messages: &[ChatMessage],
) -> Result<(ModelRoute, String)> {
    split_messages(messages)?;
    let route = resolve_model(model, settings)?;

    let result = router
        .exchange(key.as_str(), route.provider, &route.model, messages)
        .await;

    if key.is_ephemeral() {
        router.close_session(key.as_str());
    }
    result.map(|reply| (route, reply))
}

#[cfg(test)]
mod tests {
    use super::*;
    use webai_core::ConfigStore;

    fn settings(ini: &str) -> Settings {
        ConfigStore::from_ini_str(ini).unwrap().settings()
    }

    #[test]
    fn test_split_joins_system_and_keeps_prior_turns() {
        let conv = split_messages(&[
            ChatMessage::system("You are terse."),
            ChatMessage::user("One"),
            ChatMessage::assistant("1"),
            ChatMessage::system("Answer in digits."),
            ChatMessage::user("Two"),
        ])
        .unwrap();
        assert_eq!(conv.system.as_deref(), Some("You are terse.\n\nAnswer in digits."));
        assert_eq!(conv.history, vec![ChatMessage::user("One"), ChatMessage::assistant("1")]);
        assert_eq!(conv.latest_user, "Two");
    }

    #[test]
    fn test_split_keeps_tool_output_and_drops_empty_turns() {
        let messages: Vec<ChatMessage> = serde_json::from_value(serde_json::json!([
            {"role": "developer", "content": "Use tools."},
            {"role": "user", "content": [{"type": "text", "text": "Weather?"}]},
            {"role": "assistant", "content": null},
            {"role": "tool", "content": "Sunny"},
            {"role": "user", "content": "Summarize"}
        ]))
        .unwrap();
        let conv = split_messages(&messages).unwrap();
        assert_eq!(conv.system.as_deref(), Some("Use tools."));
        assert_eq!(conv.history.len(), 2);
        assert_eq!(conv.history[0], ChatMessage::user("Weather?"));
        assert_eq!(conv.history[1].role, Role::Tool);
        assert_eq!(conv.latest_user, "Summarize");
    }

    #[test]
    fn test_split_without_user_is_validation_error() {
        for messages in [
            vec![],
            vec![ChatMessage::system("only system")],
            vec![ChatMessage::assistant("hi"), ChatMessage::user("   ")],
        ] {
            let err = split_messages(&messages).unwrap_err();
            assert_eq!(err.code(), "validation_error");
        }
    }

    #[test]
    fn test_conversation_keys() {
        let a = ConversationKey::fresh();
        let b = ConversationKey::fresh();
        assert_ne!(a, b);
        assert!(a.is_ephemeral());
        assert!(!ConversationKey::shared("default").is_ephemeral());
        assert_eq!(ConversationKey::from_request(Some("abc")).as_str(), "abc");
        assert!(ConversationKey::from_request(Some("  ")).is_ephemeral());
    }

    #[test]
    fn test_model_routing() {
        let s = settings("");
        let route = resolve_model(Some("claude-3-5-haiku-20241022"), &s).unwrap();
        assert_eq!(route.provider, Provider::Claude);
        assert_eq!(route.model, "claude-3-5-haiku-20241022");

        let route = resolve_model(None, &s).unwrap();
        assert_eq!(route.provider, Provider::Gemini);
        assert_eq!(route.echo, route.model);

        let route = resolve_model(Some("x"), &s).unwrap();
        assert_eq!(route.provider, Provider::Gemini);
        assert_eq!(route.model, webai_core::provider::DEFAULT_GEMINI_MODEL);
        assert_eq!(route.echo, "x");
    }

    #[test]
    fn test_default_model_follows_config() {
        let s = settings("[AI]\ndefault_ai = claude\ndefault_model_claude = claude-3-5-sonnet-20241022\n");
        let route = resolve_model(Some("gpt-4o"), &s).unwrap();
        assert_eq!(route.provider, Provider::Claude);
        assert_eq!(route.model, "claude-3-5-sonnet-20241022");
        assert_eq!(route.echo, "gpt-4o");
    }

    #[test]
    fn test_response_envelope() {
        let a = completion_response("Hi there!".into(), "x");
        let b = completion_response("Hi there!".into(), "x");
        assert_ne!(a.id, b.id);
        assert!(a.id.starts_with("chatcmpl-"));

        let json = serde_json::to_value(&a).unwrap();
        assert_eq!(json["object"], "chat.completion");
        assert_eq!(json["model"], "x");
        assert_eq!(json["choices"][0]["index"], 0);
        assert_eq!(json["choices"][0]["message"]["role"], "assistant");
        assert_eq!(json["choices"][0]["message"]["content"], "Hi there!");
        assert_eq!(json["choices"][0]["finish_reason"], "stop");
        assert_eq!(json["usage"]["prompt_tokens"], 0);
        assert_eq!(json["usage"]["completion_tokens"], 0);
        assert_eq!(json["usage"]["total_tokens"], 0);
    }

    #[test]
    fn test_synthesized_stream_chunks() {
        let chunks = completion_chunks("Hello".into(), "gemini-2.5-flash");
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].id, chunks[1].id);
        assert_eq!(chunks[0].choices[0].delta.role, Some(Role::Assistant));
        assert_eq!(chunks[0].choices[0].delta.content.as_deref(), Some("Hello"));
        assert!(chunks[0].choices[0].finish_reason.is_none());
        assert_eq!(chunks[1].choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(chunks[1].object, "chat.completion.chunk");
    }
}
