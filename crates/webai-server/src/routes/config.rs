//! Config view and update: `GET /config`, `PUT /config`.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;
use webai_browser::Browser;
use webai_core::{Error, Provider};

use crate::error::ApiResult;
use crate::state::AppState;

/// Fields a client may change. Cookies are edited in the file only.
#[derive(Debug, Default, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default)]
    pub default_ai: Option<String>,
    /// Provider name to default model.
    #[serde(default)]
    pub default_models: BTreeMap<String, String>,
    /// Provider name to enabled flag.
    #[serde(default)]
    pub enabled: BTreeMap<String, bool>,
    #[serde(default)]
    pub browser: Option<String>,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/config", get(get_config).put(update_config))
}

fn view(state: &AppState) -> serde_json::Value {
    json!({
        "path": state.config.path().display().to_string(),
        "sections": state.config.snapshot(),
    })
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(view(&state))
}

fn provider(name: &str) -> Result<Provider, Error> {
    Provider::from_name(name)
        .ok_or_else(|| Error::Validation(format!("unknown AI service '{}'", name)))
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<ConfigUpdate>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(update) = payload?;

    // Validate everything before touching the store.
    let default_ai = update.default_ai.as_deref().map(provider).transpose()?;
    let models = update
        .default_models
        .iter()
        .map(|(name, model)| {
            let model = model.trim();
            if model.is_empty() {
                return Err(Error::Validation(format!("empty model for '{}'", name)));
            }
            Ok((provider(name)?, model.to_string()))
        })
        .collect::<Result<Vec<_>, Error>>()?;
    let enabled = update
        .enabled
        .iter()
        .map(|(name, on)| Ok((provider(name)?, *on)))
        .collect::<Result<Vec<_>, Error>>()?;
    let browser = update
        .browser
        .as_deref()
        .map(Browser::parse)
        .transpose()
        .map_err(|e| Error::Validation(e.to_string()))?;

    let mut changes: Vec<(&str, &str, String)> = Vec::new();
    if let Some(p) = default_ai {
        changes.push(("AI", "default_ai", p.name().to_string()));
    }
    for (p, model) in models {
        changes.push(("AI", p.default_model_key(), model));
    }
    for (p, on) in enabled {
        changes.push(("EnabledAI", p.name(), on.to_string()));
    }
    if let Some(b) = browser {
        changes.push(("Browser", "name", b.name().to_string()));
    }

    state.config.update(&changes)?;
    state.reload_settings();
    info!("Configuration updated");

    Ok(Json(view(&state)))
}
