use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::state::AppState;

// GET /api/health
pub async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "last_checked": chrono::Utc::now().to_rfc3339(),
    }))
}

#[derive(Deserialize)]
pub struct CommandBody {
    #[serde(default)]
    pub user_input: String,
}

// POST /api/command
pub async fn command(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CommandBody>,
) -> Result<Json<Value>, StatusCode> {
    let user_input = body.user_input.trim();
    if user_input.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    info!(user_input, "Command received");

    let cancel = state.shutdown.child_token();
    match state.pipeline.run(user_input, &cancel).await {
        Ok(output) => Ok(Json(json!({
            "intent": output.intent,
            "plan": output.plan,
            "result": output.result,
            "status": "ok",
        }))),
        Err(e) => {
            warn!(error = %e, "Command could not be planned");
            Ok(Json(json!({
                "plan": null,
                "result": {"error": e.to_string()},
                "status": "error",
            })))
        }
    }
}

// GET /api/templates
pub async fn list_templates(State(state): State<Arc<AppState>>) -> Json<Value> {
    let templates: Vec<Value> = state
        .pipeline
        .planner()
        .templates()
        .templates()
        .map(|t| json!({"name": t.name(), "params": t.params()}))
        .collect();
    Json(json!({ "templates": templates }))
}
