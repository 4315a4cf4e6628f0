use std::fmt;

use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConductorError {
    // Planning errors
    #[error("Plan validation failed: {}", format_violations(.0))]
    PlanValidation(Vec<Violation>),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Template {template} requires parameter: {param}")]
    MissingTemplateParam { template: String, param: String },

    #[error("Planner cannot handle intent: {0}")]
    UnknownIntent(String),

    // Resolution errors
    #[error("Context value not found: {0}")]
    UnresolvedVariable(String),

    #[error("Cannot access a field on non-mapping context value: {0}")]
    InvalidReference(String),

    // Controller errors
    #[error("Controller transport error: {0}")]
    ControllerTransport(String),

    // Evaluation errors
    #[error("Unknown condition: {0}")]
    UnknownCondition(String),

    #[error("Condition probe failed: {condition}: {message}")]
    ConditionProbe { condition: String, message: String },

    // Engine errors
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    #[error("Unknown capability: {0}")]
    UnknownCapability(String),

    #[error("Capability {name} failed: {message}")]
    Capability { name: String, message: String },

    #[error("Run exceeded the node visit limit ({0})")]
    StepLimitExceeded(usize),

    #[error("Run cancelled")]
    Cancelled,

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // Transport setup errors
    #[error("HTTP error: {0}")]
    Http(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ConductorError>;

/// A single structural defect found by the graph validator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// The node the defect was found on (the entry id for `MissingEntry`).
    pub node: String,
    pub kind: ViolationKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    /// The graph's entry id is not a key of `nodes`.
    MissingEntry,
    /// A transition field points at a node id that does not exist.
    DanglingTarget { field: String, target: String },
    /// An action node names a controller action the remote side does not advertise.
    UnknownController { controller: String },
    /// A function node names a capability that is not registered.
    UnknownCapability { capability: String },
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ViolationKind::MissingEntry => {
                write!(f, "entry node '{}' is not defined", self.node)
            }
            ViolationKind::DanglingTarget { field, target } => write!(
                f,
                "node '{}' {} references unknown node '{}'",
                self.node, field, target
            ),
            ViolationKind::UnknownController { controller } => write!(
                f,
                "node '{}' uses unknown controller '{}'",
                self.node, controller
            ),
            ViolationKind::UnknownCapability { capability } => write!(
                f,
                "node '{}' uses unknown capability '{}'",
                self.node, capability
            ),
        }
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_validation_message_names_nodes() {
        let err = ConductorError::PlanValidation(vec![
            Violation {
                node: "start".into(),
                kind: ViolationKind::MissingEntry,
            },
            Violation {
                node: "open".into(),
                kind: ViolationKind::DanglingTarget {
                    field: "on_failure".into(),
                    target: "nowhere".into(),
                },
            },
        ]);
        let msg = err.to_string();
        assert!(msg.contains("entry node 'start'"));
        assert!(msg.contains("node 'open' on_failure references unknown node 'nowhere'"));
    }

    #[test]
    fn test_unresolved_variable_names_key() {
        let err = ConductorError::UnresolvedVariable("project_path".into());
        assert_eq!(err.to_string(), "Context value not found: project_path");
    }
}
