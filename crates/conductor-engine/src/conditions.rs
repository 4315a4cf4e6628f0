use std::collections::BTreeMap;

use futures::future::BoxFuture;
use tracing::debug;

use conductor_core::context::{is_truthy, ExecutionContext};
use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::StateEvaluator;

/// How a named condition is answered.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Always the given value.
    Constant(bool),
    /// Truthiness of a context entry; false when the key is absent.
    ContextFlag(String),
    /// Whether a process with exactly this name is running (`pgrep -x`).
    ProcessRunning(String),
}

/// State evaluator backed by a table of named conditions.
#[derive(Debug, Clone, Default)]
pub struct ConditionRegistry {
    conditions: BTreeMap<String, Condition>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, condition: Condition) {
        self.conditions.insert(name.into(), condition);
    }

    pub fn get(&self, name: &str) -> Option<&Condition> {
        self.conditions.get(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.conditions.keys().map(|s| s.as_str()).collect()
    }

    /// Conditions used by the built-in templates.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("player_ready", Condition::ProcessRunning("vlc".into()));
        registry.register("workspace_ready", Condition::ProcessRunning("code".into()));
        registry.register("clipboard_has_path", Condition::Constant(true));
        registry
    }

    /// Register constants, replacing built-ins of the same name.
    pub fn with_constants(mut self, constants: &BTreeMap<String, bool>) -> Self {
        for (name, value) in constants {
            self.register(name.clone(), Condition::Constant(*value));
        }
        self
    }
}

/// `pgrep` on the exact process name; `code` must not match `vscode-server`.
fn pgrep(process_name: &str) -> tokio::process::Command {
    let mut command = tokio::process::Command::new("pgrep");
    command
        .arg("-x")
        .arg(process_name)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    command
}

async fn process_running(condition: &str, process_name: &str) -> Result<bool> {
    let status = pgrep(process_name)
        .status()
        .await
        .map_err(|e| ConductorError::ConditionProbe {
            condition: condition.to_string(),
            message: e.to_string(),
        })?;
    // pgrep exits 0 when something matched, 1 when nothing did.
    match status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(ConductorError::ConditionProbe {
            condition: condition.to_string(),
            message: format!("pgrep exited with {status}"),
        }),
    }
}

impl StateEvaluator for ConditionRegistry {
    fn evaluate<'a>(
        &'a self,
        condition: &'a str,
        context: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let rule = self
                .conditions
                .get(condition)
                .ok_or_else(|| ConductorError::UnknownCondition(condition.to_string()))?;

            let result = match rule {
                Condition::Constant(value) => *value,
                Condition::ContextFlag(key) => context.get(key).is_some_and(is_truthy),
                Condition::ProcessRunning(name) => process_running(condition, name).await?,
            };
            debug!(condition, result, "Condition evaluated");
            Ok(result)
        })
    }
}
