use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use conductor_core::config::EngineConfig;
use conductor_core::context::{is_truthy, ExecutionContext};
use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::{ActionController, StateEvaluator};
use conductor_core::types::{
    ActionNode, Args, ControllerResponse, DecisionNode, ExecutionResult, FunctionNode, Intent,
    Node, NodeId, Plan, RunStatus, TaskGraph,
};

use crate::capabilities::CapabilityRegistry;
use crate::resolver;

/// Context key holding the data of a successful direct-intent response.
pub const RESPONSE_KEY: &str = "response";

/// Context key holding the error of the most recent action that exhausted its
/// attempts. Cleared again when a later action succeeds.
pub const LAST_ERROR_KEY: &str = "last_error";

/// Slack on top of the per-attempt timeout before the engine gives up on a
/// controller that ignores its own deadline.
const ATTEMPT_GRACE: Duration = Duration::from_millis(500);

const MAX_BACKOFF_MS: u64 = 30_000;

/// What a node visit decided.
enum Step {
    Next(NodeId),
    Succeeded,
    Aborted(String),
}

/// Accumulated state of one graph run.
struct RunState {
    graph_id: String,
    executed: Vec<NodeId>,
    context: ExecutionContext,
}

impl RunState {
    fn new(graph_id: &str, user_input: &str) -> Self {
        Self {
            graph_id: graph_id.to_string(),
            executed: Vec::new(),
            context: ExecutionContext::seeded(user_input),
        }
    }

    fn success(self) -> ExecutionResult {
        ExecutionResult {
            graph_id: self.graph_id,
            status: RunStatus::Success,
            executed_nodes: self.executed,
            failed_node: None,
            error: None,
            context: self.context,
            response: None,
        }
    }

    fn failure(self, node: NodeId, error: String) -> ExecutionResult {
        ExecutionResult {
            graph_id: self.graph_id,
            status: RunStatus::Failure,
            executed_nodes: self.executed,
            failed_node: Some(node),
            error: Some(error),
            context: self.context,
            response: None,
        }
    }
}

/// Walks task graphs (or runs a single direct action) against the injected collaborators.
///
/// The engine holds no per-run state; any number of runs may share one
/// instance concurrently, each with its own context.
pub struct Engine {
    controller: Arc<dyn ActionController>,
    evaluator: Arc<dyn StateEvaluator>,
    capabilities: Arc<CapabilityRegistry>,
    config: EngineConfig,
    attempt_timeout: Duration,
}

impl Engine {
    pub fn new(
        controller: Arc<dyn ActionController>,
        evaluator: Arc<dyn StateEvaluator>,
        capabilities: Arc<CapabilityRegistry>,
        config: EngineConfig,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            controller,
            evaluator,
            capabilities,
            config,
            attempt_timeout,
        }
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    /// Execute a plan. Run-time failures are reported in the result, never as a panic or `Err`.
    pub async fn execute(
        &self,
        user_input: &str,
        plan: &Plan,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        info!(%run_id, plan = %plan.id(), "Run started");

        let result = match plan {
            Plan::Graph(graph) => self.execute_graph(user_input, graph, cancel).await,
            Plan::Direct(intent) => self.execute_intent(user_input, intent, cancel).await,
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        match result.status {
            RunStatus::Success => info!(
                %run_id,
                nodes = result.executed_nodes.len(),
                elapsed_ms,
                "Run succeeded"
            ),
            RunStatus::Failure => warn!(
                %run_id,
                failed_node = result.failed_node.as_deref().unwrap_or_default(),
                error = result.error.as_deref().unwrap_or_default(),
                elapsed_ms,
                "Run failed"
            ),
        }
        result
    }

    /// One controller call for a direct intent; the raw response is the result.
    async fn execute_intent(
        &self,
        user_input: &str,
        intent: &Intent,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let mut run = RunState::new(&intent.action, user_input);
        run.executed.push(intent.action.clone());

        let response = match self
            .attempt(&intent.action, intent.params.clone(), cancel)
            .await
        {
            Ok(response) => response,
            Err(e) => return run.failure(intent.action.clone(), e.to_string()),
        };

        let mut result = if response.is_success() {
            if let Some(data) = response.data() {
                run.context.set(RESPONSE_KEY, data.clone());
            }
            run.success()
        } else {
            let error = response.error_message().unwrap_or_default();
            run.failure(intent.action.clone(), error)
        };
        result.response = Some(response);
        result
    }

    async fn execute_graph(
        &self,
        user_input: &str,
        graph: &TaskGraph,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let mut run = RunState::new(&graph.id, user_input);
        let mut current = graph.entry.clone();

        loop {
            if cancel.is_cancelled() {
                return run.failure(current, ConductorError::Cancelled.to_string());
            }

            let Some(node) = graph.node(&current) else {
                error!(node_id = %current, "Node not found in graph");
                let error = ConductorError::UnknownNode(current.clone()).to_string();
                return run.failure(current, error);
            };

            run.executed.push(current.clone());
            if run.executed.len() > self.config.max_node_visits {
                let error =
                    ConductorError::StepLimitExceeded(self.config.max_node_visits).to_string();
                return run.failure(current, error);
            }
            debug!(node_id = %current, kind = node.kind(), "Entering node");

            match self
                .visit(node, &mut run.context, user_input, cancel)
                .await
            {
                Ok(Step::Next(next)) => current = next,
                Ok(Step::Succeeded) => return run.success(),
                Ok(Step::Aborted(reason)) => {
                    let error = match run.context.get_str(LAST_ERROR_KEY) {
                        Some(last) => format!("{reason}: {last}"),
                        None => reason,
                    };
                    return run.failure(current, error);
                }
                Err(e) => {
                    error!(node_id = %current, error = %e, "Node failed");
                    return run.failure(current, e.to_string());
                }
            }
        }
    }

    async fn visit(
        &self,
        node: &Node,
        context: &mut ExecutionContext,
        user_input: &str,
        cancel: &CancellationToken,
    ) -> Result<Step> {
        match node {
            Node::Noop => Ok(Step::Succeeded),
            Node::Abort { reason } => Ok(Step::Aborted(
                reason.clone().unwrap_or_else(|| "Aborted".to_string()),
            )),
            Node::Decision(decision) => self.run_decision(decision, context, cancel).await,
            Node::Action(action) => self.run_action(action, context, user_input, cancel).await,
            Node::Function(function) => self.run_function(function, context, user_input),
        }
    }

    async fn run_decision(
        &self,
        node: &DecisionNode,
        context: &ExecutionContext,
        cancel: &CancellationToken,
    ) -> Result<Step> {
        let outcome = tokio::select! {
            result = self.evaluator.evaluate(&node.condition, context) => result?,
            _ = cancel.cancelled() => return Err(ConductorError::Cancelled),
        };
        let next = if outcome { &node.on_true } else { &node.on_false };
        debug!(condition = %node.condition, outcome, next = %next, "Decision taken");
        Ok(Step::Next(next.clone()))
    }

    async fn run_action(
        &self,
        node: &ActionNode,
        context: &mut ExecutionContext,
        user_input: &str,
        cancel: &CancellationToken,
    ) -> Result<Step> {
        let args = resolver::resolve(&node.args, context, user_input)?;
        let attempts = node.retries.saturating_add(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            let response = self.attempt(&node.controller, args.clone(), cancel).await?;
            if response.is_success() {
                debug!(controller = %node.controller, attempt, "Action succeeded");
                context.remove(LAST_ERROR_KEY);
                store_output(node.output.as_deref(), node.fetch.as_deref(), &response, context);
                return Ok(Step::Next(node.on_success.clone()));
            }

            let error = response.error_message().unwrap_or_default();
            warn!(
                controller = %node.controller,
                attempt,
                attempts,
                error = %error,
                "Action attempt failed"
            );
            last_error = Some(error);

            if attempt < attempts {
                self.backoff(attempt, cancel).await?;
            }
        }

        if let Some(fallback) = &node.fallback_action {
            let args = resolver::resolve(&fallback.args, context, user_input)?;
            info!(
                controller = %node.controller,
                fallback = %fallback.controller,
                "Primary action exhausted, trying fallback"
            );
            let response = self.attempt(&fallback.controller, args, cancel).await?;
            if response.is_success() {
                context.remove(LAST_ERROR_KEY);
                store_output(node.output.as_deref(), node.fetch.as_deref(), &response, context);
                return Ok(Step::Next(node.on_success.clone()));
            }
            last_error = response.error_message();
        }

        let last_error = last_error.unwrap_or_else(|| "controller reported failure".to_string());
        warn!(
            controller = %node.controller,
            last_error = %last_error,
            "Action failed, following on_failure"
        );
        context.set(LAST_ERROR_KEY, Value::String(last_error));
        Ok(Step::Next(node.on_failure.clone()))
    }

    fn run_function(
        &self,
        node: &FunctionNode,
        context: &mut ExecutionContext,
        user_input: &str,
    ) -> Result<Step> {
        let args = resolver::resolve(&node.args, context, user_input)?;
        if !self.capabilities.contains(&node.controller) {
            return Err(ConductorError::UnknownCapability(node.controller.clone()));
        }

        match self.capabilities.invoke(&node.controller, &args) {
            Ok(value) if is_truthy(&value) => {
                if let Some(key) = &node.output {
                    context.set(key.clone(), value);
                }
                Ok(Step::Next(node.on_success.clone()))
            }
            Ok(value) => {
                debug!(capability = %node.controller, %value, "Capability returned a falsy value");
                Ok(Step::Next(node.on_failure.clone()))
            }
            Err(e) => {
                warn!(capability = %node.controller, error = %e, "Capability failed");
                Ok(Step::Next(node.on_failure.clone()))
            }
        }
    }

    /// One controller call. Only cancellation is an `Err`; timeouts become transport errors.
    async fn attempt(
        &self,
        action: &str,
        args: Args,
        cancel: &CancellationToken,
    ) -> Result<ControllerResponse> {
        let call = tokio::time::timeout(
            self.attempt_timeout + ATTEMPT_GRACE,
            self.controller.trigger(action, args, self.attempt_timeout),
        );
        tokio::select! {
            result = call => Ok(result.unwrap_or_else(|_| {
                ControllerResponse::transport(format!(
                    "Request timed out after {}s",
                    self.attempt_timeout.as_secs_f64()
                ))
            })),
            _ = cancel.cancelled() => Err(ConductorError::Cancelled),
        }
    }

    async fn backoff(&self, attempt: u32, cancel: &CancellationToken) -> Result<()> {
        if self.config.retry_backoff_ms == 0 {
            return Ok(());
        }
        let delay = calculate_backoff(attempt - 1, self.config.retry_backoff_ms);
        tokio::select! {
            _ = tokio::time::sleep(delay) => Ok(()),
            _ = cancel.cancelled() => Err(ConductorError::Cancelled),
        }
    }
}

/// Store `data[fetch]` (or the whole `data`) under `output`, if an output key is set.
fn store_output(
    output: Option<&str>,
    fetch: Option<&str>,
    response: &ControllerResponse,
    context: &mut ExecutionContext,
) {
    let Some(key) = output else {
        return;
    };
    let data = response.data();
    let value = match fetch {
        Some(field) => data.and_then(|d| d.get(field)).cloned(),
        None => data.cloned(),
    };
    context.set(key, value.unwrap_or(Value::Null));
}

fn calculate_backoff(attempt: u32, base_ms: u64) -> Duration {
    let ms = base_ms
        .saturating_mul(2u64.saturating_pow(attempt))
        .min(MAX_BACKOFF_MS);
    // Add jitter: 0.8x to 1.2x
    let jitter = 0.8 + rand::random::<f64>() * 0.4;
    Duration::from_millis((ms as f64 * jitter) as u64)
}
