use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use conductor_core::error::Result;
use conductor_core::types::{ActionSet, ExecutionResult, Intent, Plan};

use crate::executor::Engine;
use crate::planner::Planner;

/// Everything one request produced, in order.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineOutput {
    pub intent: Intent,
    pub plan: Plan,
    pub result: ExecutionResult,
}

/// Classification, planning and execution wired together for one action set.
pub struct Pipeline {
    planner: Arc<Planner>,
    engine: Arc<Engine>,
    available_actions: Arc<ActionSet>,
}

impl Pipeline {
    pub fn new(planner: Arc<Planner>, engine: Arc<Engine>, available_actions: ActionSet) -> Self {
        Self {
            planner,
            engine,
            available_actions: Arc::new(available_actions),
        }
    }

    pub fn planner(&self) -> &Planner {
        &self.planner
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn available_actions(&self) -> &ActionSet {
        &self.available_actions
    }

    /// Classify and plan without executing.
    pub fn prepare(&self, user_input: &str) -> Result<(Intent, Plan)> {
        let intent = self.planner.classify(user_input);
        info!(action = %intent.action, confidence = intent.confidence, "Input classified");
        let plan = self.planner.plan_intent(&intent, &self.available_actions)?;
        Ok((intent, plan))
    }

    /// Run a request end to end. Planning errors are returned; execution
    /// failures are reported inside the result.
    pub async fn run(&self, user_input: &str, cancel: &CancellationToken) -> Result<PipelineOutput> {
        let (intent, plan) = self.prepare(user_input)?;
        let result = self.engine.execute(user_input, &plan, cancel).await;
        Ok(PipelineOutput {
            intent,
            plan,
            result,
        })
    }

    /// Plan and run a named intent, skipping classification.
    pub async fn run_intent(
        &self,
        intent: Intent,
        user_input: &str,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutput> {
        let plan = self.planner.plan_intent(&intent, &self.available_actions)?;
        let result = self.engine.execute(user_input, &plan, cancel).await;
        Ok(PipelineOutput {
            intent,
            plan,
            result,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::time::Duration;

    use conductor_core::config::EngineConfig;
    use std::sync::Mutex;

    use conductor_core::error::ConductorError;
    use conductor_core::traits::Capability;
    use conductor_core::types::{Args, ControllerResponse, RunStatus};
    use conductor_test_utils::{action_set, FixedClassifier, MockController, MockEvaluator};
    use serde_json::json;

    use crate::capabilities::{BuildPath, CapabilityRegistry};
    use crate::registry::TemplateRegistry;

    /// `fuzzy_select` stand-in that records its arguments and picks the first choice.
    #[derive(Default)]
    struct RecordingSelect {
        seen: Arc<Mutex<Vec<Args>>>,
    }

    impl Capability for RecordingSelect {
        fn name(&self) -> &str {
            "fuzzy_select"
        }

        fn invoke(&self, args: &Args) -> conductor_core::error::Result<serde_json::Value> {
            self.seen.lock().unwrap().push(args.clone());
            Ok(args["choices"][0].clone())
        }
    }

    fn project_files() -> HashMap<String, String> {
        let mut files = HashMap::new();
        files.insert("projects".to_string(), "/mnt/c/projects".to_string());
        files
    }

    fn pipeline(intent: Intent, controller: Arc<MockController>, evaluator: MockEvaluator) -> Pipeline {
        let capabilities = CapabilityRegistry::with_builtins(project_files());
        pipeline_with(intent, controller, evaluator, capabilities)
    }

    fn pipeline_with(
        intent: Intent,
        controller: Arc<MockController>,
        evaluator: MockEvaluator,
        capabilities: CapabilityRegistry,
    ) -> Pipeline {
        let capabilities = Arc::new(capabilities);
        let planner = Planner::new(
            Arc::new(TemplateRegistry::with_builtins()),
            capabilities.clone(),
            Arc::new(FixedClassifier::new(intent)),
            0.3,
        );
        let engine = Engine::new(
            controller,
            Arc::new(evaluator),
            capabilities,
            EngineConfig::default(),
            Duration::from_secs(5),
        );
        Pipeline::new(
            Arc::new(planner),
            Arc::new(engine),
            action_set(&[
                "list_folder_contents",
                "focus_app",
                "open_explorer",
                "open_folder",
                "open_focus_app",
                "open_app",
                "launch_app",
                "volume",
            ]),
        )
    }

    #[tokio::test]
    async fn test_start_project_end_to_end() {
        let controller = Arc::new(MockController::new());
        controller.push(
            "list_folder_contents",
            ControllerResponse::success(Some(json!({"folders": ["atlas", "zeus"]}))),
        );
        controller.push("focus_app", ControllerResponse::failure("no window"));
        controller.set_default(ControllerResponse::success(None));

        let pipeline = pipeline(Intent::new("start_project"), controller.clone(), MockEvaluator::new());
        let output = pipeline
            .run("atlas", &CancellationToken::new())
            .await
            .unwrap();

        let result = output.result;
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.context.get("project_folders"), Some(&json!(["atlas", "zeus"])));
        assert_eq!(result.context.get("project_name"), Some(&json!("atlas")));
        assert_eq!(
            result.context.get("project_path"),
            Some(&json!("/mnt/c/projects/atlas"))
        );
        assert!(result.executed_nodes.contains(&"open_explorer".to_string()));
        assert!(matches!(output.plan, Plan::Graph(ref g) if g.id == "start_project"));
        assert_eq!(controller.calls_for("focus_app"), 1);
    }

    #[tokio::test]
    async fn test_listed_folders_reach_fuzzy_select() {
        let controller = Arc::new(MockController::new());
        controller.push(
            "list_folder_contents",
            ControllerResponse::success(Some(json!({"folders": ["p1", "p2"]}))),
        );
        controller.set_default(ControllerResponse::success(None));

        let select = RecordingSelect::default();
        let seen = select.seen.clone();
        let mut capabilities = CapabilityRegistry::new();
        capabilities.register(select);
        capabilities.register(BuildPath::new(project_files()));

        let pipeline = pipeline_with(
            Intent::new("start_project"),
            controller.clone(),
            MockEvaluator::new(),
            capabilities,
        );
        let output = pipeline
            .run("setup project p2", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.result.status, RunStatus::Success);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["choices"], json!(["p1", "p2"]));
        assert_eq!(seen[0]["query"], json!("setup project p2"));

        let list_call = &controller.calls()[0];
        assert_eq!(list_call.action, "list_folder_contents");
        assert_eq!(list_call.params.get("folder_name"), Some(&json!("projects")));
    }

    #[tokio::test]
    async fn test_planning_error_propagates() {
        let pipeline = pipeline(
            Intent::new("make_coffee"),
            Arc::new(MockController::new()),
            MockEvaluator::new(),
        );
        let err = pipeline
            .run("make coffee", &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ConductorError::UnknownIntent(_)));
    }

    #[tokio::test]
    async fn test_direct_intent_output_serializes() {
        let controller = Arc::new(MockController::new());
        controller.push("volume", ControllerResponse::success(Some(json!({"level": 10}))));
        let pipeline = pipeline(
            Intent::new("volume").with_param("value", 10).with_param("mode", "dec"),
            controller,
            MockEvaluator::new(),
        );
        let output = pipeline
            .run("volume down by 10", &CancellationToken::new())
            .await
            .unwrap();
        let body = serde_json::to_value(&output).unwrap();
        assert_eq!(body["plan"]["mode"], "direct");
        assert_eq!(body["result"]["status"], "success");
        assert_eq!(body["result"]["context"]["response"]["level"], 10);
    }
}
