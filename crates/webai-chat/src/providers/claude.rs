//! Claude web UI client.
//!
//! Authenticates with the `sessionKey` cookie. Each remote conversation is a
//! `chat_conversations` entry under the account's first organization; its uuid
//! is the continuation token.

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use reqwest::Client;
use serde_json::{json, Value};
use tokio_stream::StreamExt;
use tracing::{debug, info};
use webai_core::{Error, Provider, Result};

use super::{check_status, status_error, transport, GenerateRequest, Generation, ProviderSession};

pub struct ClaudeSession {
    http: Client,
    base_url: String,
    organization: String,
}

impl ClaudeSession {
    /// Look up the organization the session cookie belongs to.
    pub async fn open(http: Client, base_url: String) -> Result<Self> {
        let resp = http
            .get(format!("{}/api/organizations", base_url))
            .send()
            .await
            .map_err(|e| transport(Provider::Claude, e))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| transport(Provider::Claude, e))?;
        check_status(Provider::Claude, status, &body)?;

        let orgs: Value = serde_json::from_str(&body).map_err(|e| {
            Error::Transport(format!("Claude organizations response unreadable: {}", e))
        })?;
        let organization = orgs
            .get(0)
            .and_then(|o| o["uuid"].as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                Error::AuthExpired("Claude session has no organization; log in again".into())
            })?;
        info!("Claude session opened");

        Ok(Self {
            http,
            base_url,
            organization,
        })
    }

    fn conversations_url(&self) -> String {
        format!(
            "{}/api/organizations/{}/chat_conversations",
            self.base_url, self.organization
        )
    }

    async fn create_conversation(&self) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let resp = self
            .http
            .post(self.conversations_url())
            .json(&json!({"uuid": id, "name": ""}))
            .send()
            .await
            .map_err(|e| transport(Provider::Claude, e))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| transport(Provider::Claude, e))?;
        check_status(Provider::Claude, status, &body)?;

        // The server echoes the uuid; fall back to ours if the body is unexpected.
        let created = serde_json::from_str::<Value>(&body)
            .ok()
            .and_then(|v| v["uuid"].as_str().map(str::to_string))
            .unwrap_or(id);
        debug!("Created Claude conversation {}", created);
        Ok(created)
    }
}

#[async_trait]
impl ProviderSession for ClaudeSession {
    async fn generate(&self, request: GenerateRequest) -> Result<Generation> {
        let conversation = match request.continuation {
            Some(id) => id,
            None => self.create_conversation().await?,
        };

        let body = json!({
            "prompt": request.prompt,
            "timezone": "UTC",
            "attachments": [],
            "files": [],
            "model": request.model,
        });

        let response = self
            .http
            .post(format!("{}/{}/completion", self.conversations_url(), conversation))
            .header(ACCEPT, "text/event-stream")
            .json(&body)
            .send()
            .await
            .map_err(|e| transport(Provider::Claude, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(status_error(Provider::Claude, status, &body));
        }

        let mut stream = response.bytes_stream();
        let mut lines = LineSplitter::default();
        let mut reply = ReplyAccumulator::default();

        while let Some(chunk) = stream.next().await {
            let bytes = chunk.map_err(|e| transport(Provider::Claude, e))?;
            for line in lines.push(&bytes) {
                reply.feed_line(line.trim())?;
            }
        }
        reply.feed_line(lines.finish().trim())?;

        let text = reply.finish()?;
        Ok(Generation {
            text,
            continuation: Some(conversation),
        })
    }
}

/// Splits a byte stream into lines. Bytes are held until a full line has
/// arrived, so multi-byte characters split across chunks decode intact.
#[derive(Debug, Default)]
pub struct LineSplitter {
    buf: Vec<u8>,
}

impl LineSplitter {
    /// Complete lines ending in `chunk`, without their terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(end) = self.buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buf.drain(..=end).collect();
            lines.push(String::from_utf8_lossy(&line[..end]).into_owned());
        }
        lines
    }

    /// Whatever followed the last newline.
    pub fn finish(self) -> String {
        String::from_utf8_lossy(&self.buf).into_owned()
    }
}

/// Collects reply text from completion SSE lines.
#[derive(Debug, Default)]
pub struct ReplyAccumulator {
    text: String,
}

impl ReplyAccumulator {
    pub fn feed_line(&mut self, line: &str) -> Result<()> {
        let Some(data) = line.strip_prefix("data:") else {
            return Ok(());
        };
        let Ok(event) = serde_json::from_str::<Value>(data.trim()) else {
            return Ok(());
        };

        if let Some(completion) = event["completion"].as_str() {
            self.text.push_str(completion);
            return Ok(());
        }
        match event["type"].as_str() {
            Some("content_block_delta") => {
                if let Some(text) = event["delta"]["text"].as_str() {
                    self.text.push_str(text);
                }
            }
            Some("error") => {
                let msg = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown error");
                return Err(Error::Transport(format!("Claude stream error: {}", msg)));
            }
            _ => {}
        }
        Ok(())
    }

    pub fn finish(self) -> Result<String> {
        if self.text.is_empty() {
            return Err(Error::Transport("Claude returned an empty reply".into()));
        }
        Ok(self.text)
    }
}
