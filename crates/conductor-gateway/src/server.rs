use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::info;

use conductor_core::config::GatewayConfig;
use conductor_engine::Pipeline;

use crate::routes;
use crate::state::AppState;

/// HTTP gateway that runs commands through the pipeline.
pub struct GatewayServer {
    config: GatewayConfig,
    pipeline: Arc<Pipeline>,
}

impl GatewayServer {
    pub fn new(config: GatewayConfig, pipeline: Arc<Pipeline>) -> Self {
        Self { config, pipeline }
    }

    /// Run the gateway server until the cancellation token is triggered.
    ///
    /// In-flight runs are cancelled along with the server.
    pub async fn run(&self, shutdown: CancellationToken) -> anyhow::Result<()> {
        let app = router(self.pipeline.clone(), shutdown.clone());

        let listener = TcpListener::bind(&self.config.bind).await?;
        info!(bind = %self.config.bind, "Gateway listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await?;

        info!("Gateway shut down");
        Ok(())
    }
}

fn router(pipeline: Arc<Pipeline>, shutdown: CancellationToken) -> Router {
    let state = Arc::new(AppState { pipeline, shutdown });

    Router::new()
        .route("/api/health", get(routes::health))
        .route("/api/command", post(routes::command))
        .route("/api/templates", get(routes::list_templates))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use conductor_core::config::EngineConfig;
    use conductor_core::types::{ControllerResponse, Intent};
    use conductor_engine::{CapabilityRegistry, Engine, Planner, TemplateRegistry};
    use conductor_test_utils::{action_set, FixedClassifier, MockController, MockEvaluator};
    use serde_json::{json, Value};

    async fn spawn_gateway(intent: Intent, controller: Arc<MockController>) -> String {
        let capabilities = Arc::new(CapabilityRegistry::with_builtins(HashMap::new()));
        let planner = Planner::new(
            Arc::new(TemplateRegistry::with_builtins()),
            capabilities.clone(),
            Arc::new(FixedClassifier::new(intent)),
            0.3,
        );
        let engine = Engine::new(
            controller,
            Arc::new(MockEvaluator::new()),
            capabilities,
            EngineConfig::default(),
            Duration::from_secs(5),
        );
        let pipeline = Arc::new(Pipeline::new(
            Arc::new(planner),
            Arc::new(engine),
            action_set(&["volume"]),
        ));

        let app = router(pipeline, CancellationToken::new());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_health() {
        let base = spawn_gateway(Intent::new("volume"), Arc::new(MockController::new())).await;
        let body: Value = reqwest::get(format!("{base}/api/health"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert!(body["last_checked"].is_string());
    }

    #[tokio::test]
    async fn test_command_runs_pipeline() {
        let controller = Arc::new(MockController::new());
        controller.push("volume", ControllerResponse::success(Some(json!({"level": 30}))));
        let base = spawn_gateway(Intent::new("volume").with_param("value", 30), controller).await;

        let body: Value = reqwest::Client::new()
            .post(format!("{base}/api/command"))
            .json(&json!({"user_input": "volume to 30"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["plan"]["mode"], "direct");
        assert_eq!(body["result"]["status"], "success");
        assert_eq!(body["result"]["executed_nodes"], json!(["volume"]));
    }

    #[tokio::test]
    async fn test_command_planning_error() {
        let base = spawn_gateway(Intent::new("make_coffee"), Arc::new(MockController::new())).await;
        let body: Value = reqwest::Client::new()
            .post(format!("{base}/api/command"))
            .json(&json!({"user_input": "make coffee"}))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(body["status"], "error");
        assert!(body["plan"].is_null());
        assert_eq!(body["result"]["error"], "Planner cannot handle intent: make_coffee");
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let base = spawn_gateway(Intent::new("volume"), Arc::new(MockController::new())).await;
        let response = reqwest::Client::new()
            .post(format!("{base}/api/command"))
            .json(&json!({"user_input": "   "}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_list_templates() {
        let base = spawn_gateway(Intent::new("volume"), Arc::new(MockController::new())).await;
        let body: Value = reqwest::get(format!("{base}/api/templates"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        let templates = body["templates"].as_array().unwrap();
        assert_eq!(templates.len(), 6);
        assert_eq!(templates[0]["name"], "open_copied_path");
        assert!(templates
            .iter()
            .any(|t| t["name"] == "setup_video_player" && t["params"] == json!(["folder_name"])));
    }
}
