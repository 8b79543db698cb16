//! Translation between the Anthropic Messages shape and the chat adapter.
//!
//! Requests are flattened to [`ChatMessage`]s: block lists become text, and
//! declared tools become instructions in the system prompt asking the model
//! to answer with `[[TOOL_CALL: {...}]]` markers. Replies are scanned for
//! those markers and returned as `tool_use` blocks.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::types::{ChatMessage, Role};

pub const STOP_END_TURN: &str = "end_turn";
pub const STOP_TOOL_USE: &str = "tool_use";

static TOOL_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\[\[TOOL_CALL:\s*(\{.*?\})\s*\]\]").unwrap());

const TOOL_INSTRUCTIONS: &str = "You can call the tools listed below. To call one, reply with \
the call on its own, as raw JSON wrapped in a marker (no code fences):\n\
[[TOOL_CALL: {\"name\": \"<tool name>\", \"input\": {<arguments>}}]]\n\
Stop writing after a tool call; its result arrives in the next user turn as \
[TOOL_RESULT (...) for ID ...].\n\nTools:\n";

/// Incoming `POST /v1/messages` body.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesRequest {
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Vec<InputMessage>,
    #[serde(default)]
    pub system: Option<Blocks>,
    #[serde(default)]
    pub stream: Option<bool>,
    /// Accepted for compatibility; the web providers pick their own length.
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
}

impl MessagesRequest {
    pub fn wants_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputMessage {
    pub role: Role,
    pub content: Blocks,
}

/// A string or a list of content blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Blocks {
    Text(String),
    List(Vec<InputBlock>),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputBlock {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub input: Option<Value>,
    #[serde(default)]
    pub tool_use_id: Option<String>,
    #[serde(default)]
    pub content: Option<Value>,
    #[serde(default)]
    pub is_error: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Value,
}

/// Output content block.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessageUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Non-streaming `/v1/messages` response.
#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: Role,
    pub model: String,
    pub content: Vec<ContentBlock>,
    pub stop_reason: String,
    pub stop_sequence: Option<String>,
    pub usage: MessageUsage,
}

impl Blocks {
    fn flatten(&self) -> String {
        match self {
            Blocks::Text(text) => text.clone(),
            Blocks::List(blocks) => blocks
                .iter()
                .filter_map(InputBlock::as_text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

impl InputBlock {
    fn as_text(&self) -> Option<String> {
        match self.kind.as_str() {
            "text" => self.text.clone(),
            "tool_use" => {
                let call = json!({
                    "name": self.name.clone().unwrap_or_default(),
                    "input": self.input.clone().unwrap_or_else(|| json!({})),
                });
                Some(format!("[[TOOL_CALL: {}]]", call))
            }
            "tool_result" => {
                let status = if self.is_error.unwrap_or(false) {
                    "ERROR"
                } else {
                    "SUCCESS"
                };
                Some(format!(
                    "[TOOL_RESULT ({}) for ID {}]: {}",
                    status,
                    self.tool_use_id.as_deref().unwrap_or("?"),
                    result_text(self.content.as_ref())
                ))
            }
            "image" | "document" => Some(format!("[{} omitted]", self.kind)),
            _ => None,
        }
    }
}

fn result_text(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(" "),
        Some(other) => other.to_string(),
    }
}

/// The request as chat messages: one system message (system blocks plus
/// tool instructions) followed by the flattened turns.
pub fn to_chat_messages(request: &MessagesRequest) -> Vec<ChatMessage> {
    let mut system = request
        .system
        .as_ref()
        .map(Blocks::flatten)
        .unwrap_or_default();
    if !request.tools.is_empty() {
        if !system.trim().is_empty() {
            system.push_str("\n\n");
        }
        system.push_str(&tool_instructions(&request.tools));
    }

    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    if !system.trim().is_empty() {
        messages.push(ChatMessage::system(system));
    }
    messages.extend(request.messages.iter().map(|m| ChatMessage {
        role: m.role,
        content: m.content.flatten(),
    }));
    messages
}

fn tool_instructions(tools: &[ToolSpec]) -> String {
    let listed: Vec<Value> = tools
        .iter()
        .map(|t| {
            json!({
                "name": t.name,
                "description": t.description,
                "parameters": t.input_schema,
            })
        })
        .collect();
    let listed = serde_json::to_string_pretty(&listed).unwrap_or_default();
    format!("{}{}", TOOL_INSTRUCTIONS, listed)
}

/// Split a reply into text and `tool_use` blocks. Markers whose JSON does not
/// parse, or that lack a name, stay in the text.
pub fn parse_reply(reply: &str) -> Vec<ContentBlock> {
    let mut blocks = Vec::new();
    let mut text = String::new();
    let mut last = 0;

    for caps in TOOL_CALL.captures_iter(reply) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        text.push_str(&reply[last..whole.start()]);
        last = whole.end();

        match tool_use(body.as_str()) {
            Some(call) => {
                push_text(&mut blocks, &mut text);
                blocks.push(call);
            }
            None => text.push_str(whole.as_str()),
        }
    }
    text.push_str(&reply[last..]);
    push_text(&mut blocks, &mut text);
    blocks
}

fn tool_use(body: &str) -> Option<ContentBlock> {
    let call: Value = serde_json::from_str(body).ok()?;
    let name = call.get("name")?.as_str()?.to_string();
    let input = call.get("input").cloned().unwrap_or_else(|| json!({}));
    Some(ContentBlock::ToolUse {
        id: format!("toolu_{}", &uuid::Uuid::new_v4().simple().to_string()[..12]),
        name,
        input,
    })
}

fn push_text(blocks: &mut Vec<ContentBlock>, text: &mut String) {
    let trimmed = text.trim();
    if !trimmed.is_empty() {
        blocks.push(ContentBlock::Text {
            text: trimmed.to_string(),
        });
    }
    text.clear();
}

/// Wrap a reply in the Messages envelope.
pub fn message_response(reply: &str, model: &str) -> MessageResponse {
    let content = parse_reply(reply);
    let stop_reason = if content
        .iter()
        .any(|b| matches!(b, ContentBlock::ToolUse { .. }))
    {
        STOP_TOOL_USE
    } else {
        STOP_END_TURN
    };
    MessageResponse {
        id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
        kind: "message".into(),
        role: Role::Assistant,
        model: model.to_string(),
        content,
        stop_reason: stop_reason.into(),
        stop_sequence: None,
        usage: MessageUsage {
            input_tokens: 0,
            output_tokens: reply.split_whitespace().count() as u32,
        },
    }
}

/// The response as Messages stream events, `(event name, data)` in order:
/// `message_start`, a start/delta/stop triple per block, `message_delta`
/// carrying the stop reason, then `message_stop`.
pub fn message_events(message: &MessageResponse) -> Vec<(&'static str, Value)> {
    let mut events = vec![(
        "message_start",
        json!({
            "type": "message_start",
            "message": {
                "id": message.id,
                "type": "message",
                "role": "assistant",
                "content": [],
                "model": message.model,
                "stop_reason": null,
                "stop_sequence": null,
                "usage": {"input_tokens": 0, "output_tokens": 0},
            },
        }),
    )];

    for (index, block) in message.content.iter().enumerate() {
        let (start, delta) = match block {
            ContentBlock::Text { text } => (
                json!({"type": "text", "text": ""}),
                json!({"type": "text_delta", "text": text}),
            ),
            ContentBlock::ToolUse { id, name, input } => (
                json!({"type": "tool_use", "id": id, "name": name, "input": {}}),
                json!({"type": "input_json_delta", "partial_json": input.to_string()}),
            ),
        };
        events.push((
            "content_block_start",
            json!({"type": "content_block_start", "index": index, "content_block": start}),
        ));
        events.push((
            "content_block_delta",
            json!({"type": "content_block_delta", "index": index, "delta": delta}),
        ));
        events.push((
            "content_block_stop",
            json!({"type": "content_block_stop", "index": index}),
        ));
    }

    events.push((
        "message_delta",
        json!({
            "type": "message_delta",
            "delta": {"stop_reason": message.stop_reason, "stop_sequence": null},
            "usage": {"output_tokens": message.usage.output_tokens},
        }),
    ));
    events.push(("message_stop", json!({"type": "message_stop"})));
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::split_messages;

    fn request(body: Value) -> MessagesRequest {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn test_system_blocks_and_turns_flatten() {
        let req = request(json!({
            "model": "claude-sonnet-4",
            "max_tokens": 1024,
            "system": [{"type": "text", "text": "Be terse."}],
            "messages": [
                {"role": "user", "content": "Hi"},
                {"role": "assistant", "content": [{"type": "text", "text": "Hello"}]},
                {"role": "user", "content": [
                    {"type": "text", "text": "What is"},
                    {"type": "text", "text": "2+2?"}
                ]}
            ]
        }));
        let messages = to_chat_messages(&req);
        assert_eq!(messages[0], ChatMessage::system("Be terse."));
        assert_eq!(messages[2], ChatMessage::assistant("Hello"));
        assert_eq!(messages[3], ChatMessage::user("What is\n2+2?"));

        let conv = split_messages(&messages).unwrap();
        assert_eq!(conv.latest_user, "What is\n2+2?");
        assert_eq!(conv.history.len(), 2);
    }

    #[test]
    fn test_tools_become_system_instructions() {
        let req = request(json!({
            "system": "Be terse.",
            "tools": [{"name": "read_file", "description": "Read a file",
                       "input_schema": {"type": "object", "properties": {"path": {"type": "string"}}}}],
            "messages": [{"role": "user", "content": "Open main.rs"}]
        }));
        let messages = to_chat_messages(&req);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.starts_with("Be terse.\n\n"));
        assert!(messages[0].content.contains("[[TOOL_CALL:"));
        assert!(messages[0].content.contains("\"read_file\""));
    }

    #[test]
    fn test_tool_turns_flatten_to_markers() {
        let req = request(json!({
            "messages": [
                {"role": "user", "content": "Open main.rs"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "read_file", "input": {"path": "main.rs"}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1",
                     "content": [{"type": "text", "text": "fn main() {}"}]}
                ]}
            ]
        }));
        let messages = to_chat_messages(&req);
        assert!(messages[1].content.starts_with("[[TOOL_CALL: "));
        assert!(messages[1].content.contains("\"read_file\""));
        assert_eq!(
            messages[2].content,
            "[TOOL_RESULT (SUCCESS) for ID toolu_1]: fn main() {}"
        );
    }

    #[test]
    fn test_reply_with_tool_call() {
        let reply = "Let me look.\n[[TOOL_CALL: {\"name\": \"read_file\", \"input\": {\"path\": \"main.rs\"}}]]";
        let message = message_response(reply, "claude-sonnet-4");
        assert_eq!(message.stop_reason, STOP_TOOL_USE);
        assert_eq!(
            message.content[0],
            ContentBlock::Text {
                text: "Let me look.".into()
            }
        );
        match &message.content[1] {
            ContentBlock::ToolUse { id, name, input } => {
                assert!(id.starts_with("toolu_"));
                assert_eq!(name, "read_file");
                assert_eq!(input, &json!({"path": "main.rs"}));
            }
            other => panic!("expected tool_use, got {:?}", other),
        }
    }

    #[test]
    fn test_unparseable_marker_stays_text() {
        let reply = "Trying [[TOOL_CALL: {not json}]] anyway";
        let blocks = parse_reply(reply);
        assert_eq!(
            blocks,
            vec![ContentBlock::Text {
                text: reply.to_string()
            }]
        );
        assert_eq!(message_response(reply, "m").stop_reason, STOP_END_TURN);
    }

    #[test]
    fn test_plain_reply_response_shape() {
        let json = serde_json::to_value(message_response("Hi there", "claude-sonnet-4")).unwrap();
        assert!(json["id"].as_str().unwrap().starts_with("msg_"));
        assert_eq!(json["type"], "message");
        assert_eq!(json["role"], "assistant");
        assert_eq!(json["content"], json!([{"type": "text", "text": "Hi there"}]));
        assert_eq!(json["stop_reason"], "end_turn");
        assert!(json["stop_sequence"].is_null());
        assert_eq!(json["usage"]["output_tokens"], 2);
    }

    #[test]
    fn test_stream_event_order() {
        let message = message_response(
            "Reading.\n[[TOOL_CALL: {\"name\": \"ls\", \"input\": {}}]]",
            "claude-sonnet-4",
        );
        let events = message_events(&message);
        let names: Vec<&str> = events.iter().map(|(name, _)| *name).collect();
        assert_eq!(
            names,
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
        assert_eq!(events[2].1["delta"]["text"], "Reading.");
        assert_eq!(events[4].1["content_block"]["type"], "tool_use");
        assert_eq!(events[5].1["delta"]["partial_json"], "{}");
        assert_eq!(events[7].1["delta"]["stop_reason"], "tool_use");
    }
}
