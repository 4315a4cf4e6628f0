use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConductorError, Result};

/// Top-level Conductor configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub controller: ControllerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    /// Named base paths used by `build_path`. Merged over the remote registry's entries.
    #[serde(default)]
    pub file_registry: HashMap<String, String>,
    /// Constant conditions for decision nodes.
    #[serde(default)]
    pub conditions: BTreeMap<String, bool>,
}

/// Remote action controller connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Base URL of the remote listener. When unset the host is detected or defaults to localhost.
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_controller_port")]
    pub port: u16,
    /// Per-attempt timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Use the default gateway from `ip route` as the remote host (WSL2 → Windows).
    #[serde(default)]
    pub detect_wsl_host: bool,
    /// Actions assumed available when the remote registry cannot be loaded.
    #[serde(default)]
    pub actions: Vec<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            port: default_controller_port(),
            timeout_secs: default_timeout_secs(),
            detect_wsl_host: false,
            actions: Vec::new(),
        }
    }
}

impl ControllerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Upper bound on node visits per run; guards against cyclic templates.
    #[serde(default = "default_max_node_visits")]
    pub max_node_visits: usize,
    /// Base delay between retry attempts (0 = retry immediately).
    #[serde(default)]
    pub retry_backoff_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_node_visits: default_max_node_visits(),
            retry_backoff_ms: 0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    /// Classifications below this confidence become the `fallback` intent.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_controller_port() -> u16 {
    6001
}

fn default_timeout_secs() -> u64 {
    5
}

fn default_max_node_visits() -> usize {
    64
}

fn default_confidence_threshold() -> f64 {
    0.3
}

fn default_bind() -> String {
    "0.0.0.0:6000".to_string()
}

impl AppConfig {
    /// Load config from a TOML file, with env var expansion.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|_| ConductorError::ConfigNotFound(path.display().to_string()))?;
        Self::parse(&content)
    }

    /// Load config from a file, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Parse TOML text, expanding `${ENV_VAR}` references first.
    pub fn parse(content: &str) -> Result<Self> {
        let expanded = expand_env_vars(content);
        toml::from_str(&expanded).map_err(|e| ConductorError::Config(e.to_string()))
    }
}

/// Expand `${ENV_VAR}` patterns in a string.
fn expand_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next(); // consume '{'
            let mut var_name = String::new();
            for c in chars.by_ref() {
                if c == '}' {
                    break;
                }
                var_name.push(c);
            }
            match std::env::var(&var_name) {
                Ok(val) => result.push_str(&val),
                // Keep original if env var not set
                Err(_) => result.push_str(&format!("${{{}}}", var_name)),
            }
        } else {
            result.push(c);
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_vars() {
        std::env::set_var("TEST_CONDUCTOR_VAR", "hello");
        let result = expand_env_vars("key = \"${TEST_CONDUCTOR_VAR}\"");
        assert_eq!(result, "key = \"hello\"");
        std::env::remove_var("TEST_CONDUCTOR_VAR");
    }

    #[test]
    fn test_expand_env_vars_missing() {
        let result = expand_env_vars("key = \"${NONEXISTENT_CONDUCTOR_VAR}\"");
        assert_eq!(result, "key = \"${NONEXISTENT_CONDUCTOR_VAR}\"");
    }

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.controller.port, 6001);
        assert_eq!(config.controller.timeout(), Duration::from_secs(5));
        assert!(config.controller.base_url.is_none());
        assert_eq!(config.engine.max_node_visits, 64);
        assert_eq!(config.engine.retry_backoff_ms, 0);
        assert!((config.planner.confidence_threshold - 0.3).abs() < f64::EPSILON);
        assert_eq!(config.gateway.bind, "0.0.0.0:6000");
        assert!(config.file_registry.is_empty());
    }

    #[test]
    fn test_partial_sections() {
        let config = AppConfig::parse(
            r#"
[controller]
base_url = "http://10.0.0.2:6001"
actions = ["open_folder", "launch_app"]

[engine]
max_node_visits = 8

[file_registry]
projects = "C:\\Users\\me\\projects"

[conditions]
workspace_ready = true
"#,
        )
        .unwrap();
        assert_eq!(config.controller.base_url.as_deref(), Some("http://10.0.0.2:6001"));
        assert_eq!(config.controller.timeout_secs, 5);
        assert_eq!(config.controller.actions.len(), 2);
        assert_eq!(config.engine.max_node_visits, 8);
        assert_eq!(
            config.file_registry.get("projects").map(String::as_str),
            Some("C:\\Users\\me\\projects")
        );
        assert_eq!(config.conditions.get("workspace_ready"), Some(&true));
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = AppConfig::parse("[engine\nmax_node_visits = 3").unwrap_err();
        assert!(matches!(err, ConductorError::Config(_)));
    }
}
