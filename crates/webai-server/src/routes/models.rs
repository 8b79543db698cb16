use std::sync::Arc;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use webai_chat::{ModelInfo, ModelList};
use webai_core::{Provider, Settings};

use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/v1/models", get(list_models))
}

async fn list_models(State(state): State<Arc<AppState>>) -> Json<ModelList> {
    Json(model_list(&state.settings()))
}

/// Known models of every enabled provider, configured defaults included.
pub fn model_list(settings: &Settings) -> ModelList {
    let created = chrono::Utc::now().timestamp();
    let mut data = Vec::new();
    for provider in Provider::all() {
        if !settings.is_enabled(*provider) {
            continue;
        }
        let mut ids: Vec<String> = provider.models().iter().map(|m| m.to_string()).collect();
        let default = settings.default_model(*provider);
        if !ids.contains(&default) {
            ids.insert(0, default);
        }
        data.extend(ids.into_iter().map(|id| ModelInfo {
            id,
            object: "model".into(),
            created,
            owned_by: provider.name().to_string(),
        }));
    }
    ModelList {
        object: "list".into(),
        data,
    }
}
