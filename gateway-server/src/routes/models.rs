//! `GET /v1/models`, `GET /v1/models/:id`: enumerates the union of enabled
//! providers' `supportedModels`, annotated with `owned_by` (the provider id)
//! in OpenAI's model-list shape.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::app::AppState;

#[derive(Serialize)]
struct ModelObject {
    id: String,
    object: &'static str,
    created: i64,
    owned_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    context_length: Option<u32>,
}

#[derive(Serialize)]
struct ModelList {
    object: &'static str,
    data: Vec<ModelObject>,
}

async fn all_models(state: &Arc<AppState>) -> Result<Vec<ModelObject>, gateway_store::StoreError> {
    let providers = state.store.list_providers().await?;
    let mut out = Vec::new();
    for provider in providers.into_iter().filter(|p| p.enabled) {
        for model in &provider.supported_models {
            out.push(ModelObject {
                id: model.clone(),
                object: "model",
                created: 0,
                owned_by: provider.id.clone(),
                context_length: state.model_catalog.resolve_cached(&provider.id, model).map(|s| s.context_limit),
            });
        }
        for public_name in provider.model_mapping.keys() {
            if !out.iter().any(|m| &m.id == public_name) {
                out.push(ModelObject {
                    id: public_name.clone(),
                    object: "model",
                    created: 0,
                    owned_by: provider.id.clone(),
                    context_length: None,
                });
            }
        }
    }
    Ok(out)
}

pub async fn list_models(State(state): State<Arc<AppState>>) -> Response {
    match all_models(&state).await {
        Ok(data) => Json(ModelList { object: "list", data }).into_response(),
        Err(e) => {
            tracing::error!("store error listing models: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub async fn get_model(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Response {
    match all_models(&state).await {
        Ok(data) => match data.into_iter().find(|m| m.id == id) {
            Some(model) => Json(model).into_response(),
            None => {
                let body = serde_json::json!({"error": {"message": format!("model '{id}' not found"), "type": "invalid_request_error", "code": "model_not_found"}});
                (StatusCode::NOT_FOUND, Json(body)).into_response()
            }
        },
        Err(e) => {
            tracing::error!("store error getting model: {e}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
