//! Chat types matching the OpenAI chat-completion API surface.

use serde::{Deserialize, Serialize};

/// Message author. `developer` is the newer OpenAI name for `system`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[serde(alias = "developer")]
    System,
    User,
    Assistant,
    /// Tool output; flattened into the transcript as plain text.
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// Chat message in conversation history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    #[serde(default, deserialize_with = "content_text")]
    pub content: String,
}

/// Message content as clients send it: a bare string, a list of typed
/// parts, or null (assistant turns that only carried tool calls).
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

/// One element of a multi-part content list. Only text parts carry
/// anything the web providers can use; images and the like are dropped.
#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageContent {
    /// The text parts joined with newlines.
    pub fn into_text(self) -> String {
        match self {
            MessageContent::Text(text) => text,
            MessageContent::Parts(parts) => parts
                .into_iter()
                .filter(|p| p.kind.as_deref().map_or(true, |k| k == "text"))
                .filter_map(|p| p.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

fn content_text<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let content = Option::<MessageContent>::deserialize(deserializer)?;
    Ok(content.map(MessageContent::into_text).unwrap_or_default())
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Incoming `/v1/chat/completions` request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: Option<bool>,
    /// Non-standard extension: reuse a server-side conversation across calls.
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl CompletionRequest {
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

/// Token counters. The web providers do not report usage, so these stay zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: String,
}

/// Non-streaming completion envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Delta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

/// One SSE frame of a streamed completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionChunk {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

/// `/chat` and `/chat-with-context` request body.
#[derive(Debug, Clone, Deserialize)]
pub struct SimpleChatRequest {
    #[serde(alias = "message")]
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleChatResponse {
    pub reply: String,
}

/// `/gemini`, `/gemini-chat` and `/translate` response body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextResponse {
    pub response: String,
}

/// Session table entry as reported by `GET /sessions`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub key: String,
    pub provider: String,
    pub model: String,
    pub turns: usize,
    #[serde(rename = "hasContinuation")]
    pub has_continuation: bool,
    #[serde(rename = "createdAt")]
    pub created_at: String,
    #[serde(rename = "idleSecs")]
    pub idle_secs: u64,
}

/// OpenAI `GET /v1/models` entry.
#[derive(Debug, Clone, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub owned_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ModelList {
    pub object: String,
    pub data: Vec<ModelInfo>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_request_parses_openai_body() {
        let req: CompletionRequest = serde_json::from_str(
            r#"{"model":"gemini-2.5-pro","messages":[{"role":"system","content":"Be brief"},{"role":"user","content":"Hi"}],"stream":true}"#,
        )
        .unwrap();
        assert_eq!(req.model.as_deref(), Some("gemini-2.5-pro"));
        assert_eq!(req.messages.len(), 2);
        assert_eq!(req.messages[0].role, Role::System);
        assert!(req.wants_stream());
        assert!(req.conversation_id.is_none());
    }

    #[test]
    fn test_unknown_role_is_rejected() {
        let res: Result<CompletionRequest, _> =
            serde_json::from_str(r#"{"messages":[{"role":"narrator","content":"x"}]}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_content_parts_are_joined() {
        let req: CompletionRequest = serde_json::from_str(
            r#"{"messages":[{"role":"user","content":[
                {"type":"text","text":"Describe"},
                {"type":"image_url","image_url":{"url":"data:image/png;base64,AA=="}},
                {"type":"text","text":"briefly"}
            ]}]}"#,
        )
        .unwrap();
        assert_eq!(req.messages[0].content, "Describe\nbriefly");
    }

    #[test]
    fn test_developer_tool_and_null_content() {
        let req: CompletionRequest = serde_json::from_str(
            r#"{"messages":[
                {"role":"developer","content":"Be brief"},
                {"role":"assistant","content":null,"tool_calls":[]},
                {"role":"tool","tool_call_id":"call_1","content":"42"},
                {"role":"user","content":"And?"}
            ]}"#,
        )
        .unwrap();
        assert_eq!(req.messages[0].role, Role::System);
        assert_eq!(req.messages[1].content, "");
        assert_eq!(req.messages[2].role, Role::Tool);
        assert_eq!(req.messages[2].content, "42");
    }

    #[test]
    fn test_content_of_wrong_shape_is_rejected() {
        let res: Result<ChatMessage, _> = serde_json::from_str(r#"{"role":"user","content":7}"#);
        assert!(res.is_err());
    }

    #[test]
    fn test_simple_request_accepts_message_alias() {
        let a: SimpleChatRequest = serde_json::from_str(r#"{"prompt":"hi"}"#).unwrap();
        let b: SimpleChatRequest = serde_json::from_str(r#"{"message":"hi","model":"claude-3-5-haiku-20241022"}"#).unwrap();
        assert_eq!(a.prompt, "hi");
        assert_eq!(b.prompt, "hi");
        assert!(b.model.is_some());
    }

    #[test]
    fn test_delta_omits_empty_fields() {
        let json = serde_json::to_value(Delta {
            role: None,
            content: Some("x".into()),
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"content": "x"}));
    }
}
