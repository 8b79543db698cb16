//! Gemini consumer web UI client.
//!
//! Authenticates with the `__Secure-1PSID`/`__Secure-1PSIDTS` cookies, scrapes
//! the per-page access token and talks to the `StreamGenerate` batch endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, info};
use webai_core::{Error, Provider, Result};

use super::{check_status, transport, GenerateRequest, Generation, ProviderSession};

const STREAM_GENERATE_PATH: &str =
    "/_/BardChatUi/data/assistant.lamda.BardFrontendService/StreamGenerate";
const BUILD_LABEL: &str = "boq_assistant-bard-web-server_20240403.10_p0";
const MODEL_HEADER: &str = "x-goog-ext-525001261-jspb";

static ACCESS_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r#""SNlM0e":"(.*?)""#).unwrap());

/// Model selector header value, for models the web UI knows by id.
pub fn model_header(model: &str) -> Option<&'static str> {
    match model {
        "gemini-2.5-flash" => Some(r#"[1,null,null,null,"71c2d248d3b102ff",null,null,0,[4]]"#),
        "gemini-2.5-pro" => Some(r#"[1,null,null,null,"4af6c7f5da75d65d",null,null,0,[4]]"#),
        _ => None,
    }
}

pub struct GeminiSession {
    http: Client,
    base_url: String,
    access_token: String,
    reqid: AtomicU64,
}

impl GeminiSession {
    /// Load the app page and pull the access token out of it.
    pub async fn open(http: Client, base_url: String) -> Result<Self> {
        let resp = http
            .get(format!("{}/app", base_url))
            .send()
            .await
            .map_err(|e| transport(Provider::Gemini, e))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| transport(Provider::Gemini, e))?;
        check_status(Provider::Gemini, status, &body)?;

        let access_token = extract_access_token(&body).ok_or_else(|| {
            Error::AuthExpired(
                "Gemini page carried no access token; the session cookies are likely expired"
                    .into(),
            )
        })?;
        info!("Gemini session opened");

        let seed = (uuid::Uuid::new_v4().as_u128() % 9000) as u64 + 1000;
        Ok(Self {
            http,
            base_url,
            access_token,
            reqid: AtomicU64::new(seed),
        })
    }
}

#[async_trait]
impl ProviderSession for GeminiSession {
    async fn generate(&self, request: GenerateRequest) -> Result<Generation> {
        let ids = decode_continuation(request.continuation.as_deref());
        let inner = json!([[request.prompt], null, ids]).to_string();
        let f_req = json!([null, inner]).to_string();
        let reqid = self.reqid.fetch_add(100_000, Ordering::Relaxed).to_string();

        let mut builder = self
            .http
            .post(format!("{}{}", self.base_url, STREAM_GENERATE_PATH))
            .query(&[("bl", BUILD_LABEL), ("_reqid", reqid.as_str()), ("rt", "c")])
            .header("X-Same-Domain", "1")
            .header("Origin", self.base_url.as_str())
            .header("Referer", format!("{}/", self.base_url))
            .form(&[("f.req", f_req.as_str()), ("at", self.access_token.as_str())]);
        if let Some(selector) = model_header(&request.model) {
            builder = builder.header(MODEL_HEADER, selector);
        }

        debug!("Gemini generate with model {}", request.model);
        let resp = builder
            .send()
            .await
            .map_err(|e| transport(Provider::Gemini, e))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| transport(Provider::Gemini, e))?;
        check_status(Provider::Gemini, status, &body)?;

        parse_reply(&body)
    }
}

pub fn extract_access_token(page: &str) -> Option<String> {
    ACCESS_TOKEN
        .captures(page)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .filter(|t| !t.is_empty())
}

/// `[cid, rid, rcid]`, empty strings for a new conversation.
fn decode_continuation(token: Option<&str>) -> [String; 3] {
    token
        .and_then(|t| serde_json::from_str::<[String; 3]>(t).ok())
        .unwrap_or_default()
}

fn encode_continuation(cid: &str, rid: &str, rcid: &str) -> Option<String> {
    if cid.is_empty() {
        return None;
    }
    Some(json!([cid, rid, rcid]).to_string())
}

/// Pull the first candidate out of a `StreamGenerate` response.
///
/// The payload is a `)]}'` guard followed by length-prefixed JSON frames. Each
/// frame is a list of parts; the reply lives in a part whose third element is
/// itself a JSON document with a non-empty candidate list at index 4.
pub fn parse_reply(payload: &str) -> Result<Generation> {
    for line in payload.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(")]}'") {
            continue;
        }
        let Ok(Value::Array(parts)) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        for part in &parts {
            let Some(inner) = part.get(2).and_then(Value::as_str) else {
                continue;
            };
            let Ok(body) = serde_json::from_str::<Value>(inner) else {
                continue;
            };
            let Some(candidate) = body
                .get(4)
                .and_then(Value::as_array)
                .and_then(|c| c.first())
            else {
                continue;
            };
            let Some(text) = candidate
                .get(1)
                .and_then(|t| t.get(0))
                .and_then(Value::as_str)
            else {
                continue;
            };

            let field = |v: Option<&Value>| v.and_then(Value::as_str).unwrap_or_default().to_string();
            let rcid = field(candidate.get(0));
            let cid = field(body.get(1).and_then(|m| m.get(0)));
            let rid = field(body.get(1).and_then(|m| m.get(1)));

            return Ok(Generation {
                text: text.to_string(),
                continuation: encode_continuation(&cid, &rid, &rcid),
            });
        }
    }
    Err(Error::Transport(
        "Gemini response carried no reply candidates".into(),
    ))
}
