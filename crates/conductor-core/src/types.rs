use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::context::ExecutionContext;

/// Node identifier within a task graph.
pub type NodeId = String;

/// Named arguments passed to controllers and capabilities.
pub type Args = Map<String, Value>;

/// Action names the remote controller advertises as implemented.
pub type ActionSet = BTreeSet<String>;

/// A validated, named directed graph of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    pub id: String,
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub entry: NodeId,
    pub nodes: BTreeMap<NodeId, Node>,
}

impl TaskGraph {
    pub fn new(id: impl Into<String>, goal: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            goal: goal.into(),
            description: None,
            entry: entry.into(),
            nodes: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add a node under the given id (replaces an existing node with the same id).
    pub fn with_node(mut self, id: impl Into<String>, node: impl Into<Node>) -> Self {
        self.nodes.insert(id.into(), node.into());
        self
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }
}

/// One step in a task graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Node {
    /// Terminal success.
    Noop,
    /// Terminal failure.
    Abort {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    Decision(DecisionNode),
    Action(ActionNode),
    Function(FunctionNode),
}

impl Node {
    pub fn abort(reason: impl Into<String>) -> Self {
        Node::Abort {
            reason: Some(reason.into()),
        }
    }

    /// Lowercase variant name, as it appears in the `type` field.
    pub fn kind(&self) -> &'static str {
        match self {
            Node::Noop => "noop",
            Node::Abort { .. } => "abort",
            Node::Decision(_) => "decision",
            Node::Action(_) => "action",
            Node::Function(_) => "function",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Node::Noop | Node::Abort { .. })
    }

    /// Outgoing transitions as `(field, target)` pairs.
    pub fn transitions(&self) -> Vec<(&'static str, &str)> {
        match self {
            Node::Noop | Node::Abort { .. } => vec![],
            Node::Decision(d) => vec![
                ("on_true", d.on_true.as_str()),
                ("on_false", d.on_false.as_str()),
            ],
            Node::Action(a) => vec![
                ("on_success", a.on_success.as_str()),
                ("on_failure", a.on_failure.as_str()),
            ],
            Node::Function(f) => vec![
                ("on_success", f.on_success.as_str()),
                ("on_failure", f.on_failure.as_str()),
            ],
        }
    }
}

/// Branches on an externally evaluated condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionNode {
    pub condition: String,
    pub on_true: NodeId,
    pub on_false: NodeId,
}

impl DecisionNode {
    pub fn new(
        condition: impl Into<String>,
        on_true: impl Into<String>,
        on_false: impl Into<String>,
    ) -> Self {
        Self {
            condition: condition.into(),
            on_true: on_true.into(),
            on_false: on_false.into(),
        }
    }
}

impl From<DecisionNode> for Node {
    fn from(node: DecisionNode) -> Self {
        Node::Decision(node)
    }
}

/// Invokes a remote action through the action controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionNode {
    pub controller: String,
    #[serde(default)]
    pub args: Args,
    /// Extra attempts after the first one.
    #[serde(default)]
    pub retries: u32,
    /// Context key the response data is stored under.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    /// Sub-field of the response data to store instead of the whole payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fallback_action: Option<FallbackAction>,
    pub on_success: NodeId,
    pub on_failure: NodeId,
}

impl ActionNode {
    pub fn new(
        controller: impl Into<String>,
        on_success: impl Into<String>,
        on_failure: impl Into<String>,
    ) -> Self {
        Self {
            controller: controller.into(),
            args: Args::new(),
            retries: 0,
            output: None,
            fetch: None,
            fallback_action: None,
            on_success: on_success.into(),
            on_failure: on_failure.into(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_fetch(mut self, fetch: impl Into<String>) -> Self {
        self.fetch = Some(fetch.into());
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackAction) -> Self {
        self.fallback_action = Some(fallback);
        self
    }
}

impl From<ActionNode> for Node {
    fn from(node: ActionNode) -> Self {
        Node::Action(node)
    }
}

/// A single alternate action tried once after the primary attempts are exhausted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FallbackAction {
    pub controller: String,
    #[serde(default)]
    pub args: Args,
}

impl FallbackAction {
    pub fn new(controller: impl Into<String>) -> Self {
        Self {
            controller: controller.into(),
            args: Args::new(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }
}

/// Invokes a locally registered capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionNode {
    pub controller: String,
    #[serde(default)]
    pub args: Args,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub on_success: NodeId,
    pub on_failure: NodeId,
}

impl FunctionNode {
    pub fn new(
        controller: impl Into<String>,
        on_success: impl Into<String>,
        on_failure: impl Into<String>,
    ) -> Self {
        Self {
            controller: controller.into(),
            args: Args::new(),
            output: None,
            on_success: on_success.into(),
            on_failure: on_failure.into(),
        }
    }

    pub fn with_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.args.insert(key.into(), value.into());
        self
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }
}

impl From<FunctionNode> for Node {
    fn from(node: FunctionNode) -> Self {
        Node::Function(node)
    }
}

/// A classified request: an intent name with slot parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub action: String,
    #[serde(default)]
    pub params: Args,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

impl Intent {
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            params: Args::new(),
            confidence: default_confidence(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Planner output: either a full task graph or a single direct action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "plan", rename_all = "snake_case")]
pub enum Plan {
    Graph(TaskGraph),
    Direct(Intent),
}

impl Plan {
    /// Graph id, or the action name for a direct plan.
    pub fn id(&self) -> &str {
        match self {
            Plan::Graph(g) => &g.id,
            Plan::Direct(i) => &i.action,
        }
    }
}

/// What an action controller returned for one invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControllerResponse {
    /// The remote side ran the action and reported an outcome.
    Completed {
        success: bool,
        #[serde(default, deserialize_with = "null_as_empty")]
        message: String,
        #[serde(default)]
        data: Option<Value>,
    },
    /// The request never produced a well-formed outcome (timeout, connection, bad body).
    TransportError { error: String },
}

/// Listeners send `"message": null` when they have nothing to say.
fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

impl ControllerResponse {
    pub fn success(data: Option<Value>) -> Self {
        ControllerResponse::Completed {
            success: true,
            message: String::new(),
            data,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        ControllerResponse::Completed {
            success: false,
            message: message.into(),
            data: None,
        }
    }

    pub fn transport(error: impl Into<String>) -> Self {
        ControllerResponse::TransportError {
            error: error.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ControllerResponse::Completed { success: true, .. })
    }

    pub fn data(&self) -> Option<&Value> {
        match self {
            ControllerResponse::Completed { data, .. } => data.as_ref(),
            ControllerResponse::TransportError { .. } => None,
        }
    }

    /// Human-readable reason for a non-success response.
    pub fn error_message(&self) -> Option<String> {
        match self {
            ControllerResponse::Completed { success: true, .. } => None,
            ControllerResponse::Completed { message, .. } if message.is_empty() => {
                Some("controller reported failure".to_string())
            }
            ControllerResponse::Completed { message, .. } => Some(message.clone()),
            ControllerResponse::TransportError { error } => Some(error.clone()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Failure,
}

/// The outcome of one engine run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub graph_id: String,
    pub status: RunStatus,
    /// Nodes entered, in order, once per visit.
    pub executed_nodes: Vec<NodeId>,
    pub failed_node: Option<NodeId>,
    pub error: Option<String>,
    pub context: ExecutionContext,
    /// Raw controller response, set only for direct-intent runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<ControllerResponse>,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_schema_deserialization() {
        let graph: TaskGraph = serde_json::from_value(json!({
            "id": "open_copied_path",
            "goal": "Open copied file or folder",
            "entry": "get_copied_path",
            "nodes": {
                "get_copied_path": {
                    "type": "action",
                    "controller": "get_copied_value",
                    "args": {"_as": "path"},
                    "output": "file_path",
                    "on_success": "check",
                    "on_failure": "abort"
                },
                "check": {
                    "type": "decision",
                    "condition": "clipboard_has_path",
                    "on_true": "done",
                    "on_false": "abort"
                },
                "pick": {
                    "type": "function",
                    "controller": "fuzzy_select",
                    "on_success": "done",
                    "on_failure": "abort"
                },
                "done": {"type": "noop"},
                "abort": {"type": "abort", "reason": "Invalid copied path"}
            }
        }))
        .unwrap();

        assert_eq!(graph.nodes.len(), 5);
        match graph.node("get_copied_path").unwrap() {
            Node::Action(a) => {
                assert_eq!(a.controller, "get_copied_value");
                assert_eq!(a.retries, 0);
                assert_eq!(a.output.as_deref(), Some("file_path"));
                assert!(a.fetch.is_none());
            }
            other => panic!("expected action, got {}", other.kind()),
        }
        assert!(graph.node("done").unwrap().is_terminal());
        assert_eq!(
            graph.node("abort"),
            Some(&Node::abort("Invalid copied path"))
        );
        assert!(matches!(graph.node("pick"), Some(Node::Function(f)) if f.args.is_empty()));
    }

    #[test]
    fn test_action_requires_transitions() {
        let bad = serde_json::from_value::<Node>(json!({
            "type": "action",
            "controller": "open_folder",
            "on_success": "done"
        }));
        assert!(bad.is_err());
    }

    #[test]
    fn test_unknown_node_type_rejected() {
        let bad = serde_json::from_value::<Node>(json!({"type": "loop"}));
        assert!(bad.is_err());
    }

    #[test]
    fn test_transitions() {
        let node: Node = ActionNode::new("launch_app", "done", "abort").into();
        assert_eq!(
            node.transitions(),
            vec![("on_success", "done"), ("on_failure", "abort")]
        );
        assert!(Node::Noop.transitions().is_empty());
    }

    #[test]
    fn test_controller_response_shapes() {
        let ok: ControllerResponse =
            serde_json::from_value(json!({"success": true, "message": "ok", "data": {"folders": []}}))
                .unwrap();
        assert!(ok.is_success());
        assert_eq!(ok.data(), Some(&json!({"folders": []})));

        let transport: ControllerResponse =
            serde_json::from_value(json!({"error": "Cannot connect"})).unwrap();
        assert!(!transport.is_success());
        assert_eq!(transport.error_message().as_deref(), Some("Cannot connect"));

        let failed = ControllerResponse::failure("");
        assert_eq!(
            failed.error_message().as_deref(),
            Some("controller reported failure")
        );
    }

    #[test]
    fn test_null_message_is_empty() {
        let ok: ControllerResponse =
            serde_json::from_value(json!({"success": true, "message": null, "data": null}))
                .unwrap();
        assert_eq!(ok, ControllerResponse::success(None));

        let failed: ControllerResponse =
            serde_json::from_value(json!({"success": false, "message": null})).unwrap();
        assert_eq!(failed, ControllerResponse::failure(""));
    }

    #[test]
    fn test_plan_id() {
        let plan = Plan::Direct(Intent::new("volume").with_param("value", 40));
        assert_eq!(plan.id(), "volume");
        let plan = Plan::Graph(TaskGraph::new("g1", "goal", "done").with_node("done", Node::Noop));
        assert_eq!(plan.id(), "g1");
    }
}
