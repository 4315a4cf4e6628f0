use std::collections::HashMap;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use conductor_core::config::ControllerConfig;
use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::ActionController;
use conductor_core::types::{ActionSet, Args, ControllerResponse};

/// What the remote listener advertises on `GET /registry`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RemoteRegistry {
    pub actions: ActionSet,
    pub file_registry: HashMap<String, String>,
}

#[derive(Deserialize)]
struct RegistryBody {
    #[serde(default)]
    modules: Map<String, Value>,
    #[serde(default)]
    file_registry: HashMap<String, String>,
}

/// Action controller that posts to a remote listener over HTTP.
///
/// One pooled client is shared by every call; the timeout is applied per request.
pub struct HttpActionController {
    http: Client,
    base_url: String,
}

impl HttpActionController {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .build()
            .map_err(|e| ConductorError::Http(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Build from config, detecting the host from the default route when asked.
    pub async fn from_config(config: &ControllerConfig) -> Result<Self> {
        let base_url = match &config.base_url {
            Some(url) => url.clone(),
            None if config.detect_wsl_host => {
                let host = detect_wsl_host().await?;
                format!("http://{}:{}", host, config.port)
            }
            None => format!("http://127.0.0.1:{}", config.port),
        };
        info!(base_url = %base_url, "Using remote listener");
        Self::new(base_url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the advertised actions and named base paths.
    pub async fn load_registry(&self, timeout: Duration) -> Result<RemoteRegistry> {
        let url = format!("{}/registry", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| ConductorError::ControllerTransport(transport_message(&e, timeout)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(ConductorError::ControllerTransport(format!(
                "HTTP {}: {}",
                status, body
            )));
        }

        let body: RegistryBody = response
            .json()
            .await
            .map_err(|e| ConductorError::ControllerTransport(e.to_string()))?;
        let registry = parse_registry(body);
        info!(
            actions = registry.actions.len(),
            base_paths = registry.file_registry.len(),
            "Loaded action registry"
        );
        Ok(registry)
    }
}

impl ActionController for HttpActionController {
    fn trigger(
        &self,
        action: &str,
        params: Args,
        timeout: Duration,
    ) -> BoxFuture<'_, ControllerResponse> {
        let url = format!("{}/action/{}", self.base_url, action);
        Box::pin(async move {
            debug!(url = %url, "Triggering remote action");
            let response = match self
                .http
                .post(&url)
                .json(&params)
                .timeout(timeout)
                .send()
                .await
                .and_then(|r| r.error_for_status())
            {
                Ok(response) => response,
                Err(e) => {
                    warn!(url = %url, error = %e, "Remote action request failed");
                    return ControllerResponse::transport(transport_message(&e, timeout));
                }
            };

            match response.json::<Value>().await {
                Ok(body) => parse_action_body(body),
                Err(e) => ControllerResponse::transport(transport_message(&e, timeout)),
            }
        })
    }
}

fn transport_message(e: &reqwest::Error, timeout: Duration) -> String {
    if e.is_timeout() {
        format!(
            "Request timed out after {}s. Remote listener may be offline.",
            timeout.as_secs_f64()
        )
    } else if e.is_connect() {
        "Cannot connect to remote listener. Is it running?".to_string()
    } else {
        format!("Request failed: {e}")
    }
}

/// Interpret a listener reply: `{"result": {...}}`, a bare `{success, ...}`, or `{"error": ...}`.
pub fn parse_action_body(body: Value) -> ControllerResponse {
    let body = match body {
        Value::Object(mut map) => match map.remove("result") {
            Some(result) => result,
            None => Value::Object(map),
        },
        other => other,
    };

    // Some listeners report a failure reason under `error` instead of `message`.
    let error = body.get("error").and_then(Value::as_str).map(str::to_string);
    match serde_json::from_value::<ControllerResponse>(body.clone()) {
        Ok(ControllerResponse::Completed {
            success: false,
            message,
            data,
        }) if message.is_empty() && error.is_some() => ControllerResponse::Completed {
            success: false,
            message: error.unwrap_or_default(),
            data,
        },
        Ok(response) => response,
        Err(_) => ControllerResponse::transport(format!("Malformed listener response: {body}")),
    }
}

fn parse_registry(body: RegistryBody) -> RemoteRegistry {
    let mut actions = ActionSet::new();
    for (module, entries) in body.modules {
        match entries {
            Value::Array(names) => {
                actions.extend(names.iter().filter_map(Value::as_str).map(str::to_string))
            }
            Value::Object(map) => actions.extend(map.keys().cloned()),
            other => debug!(module = %module, value = %other, "Skipping unrecognized registry module"),
        }
    }
    RemoteRegistry {
        actions,
        file_registry: body.file_registry,
    }
}

/// Default gateway from `ip route` output, which on WSL2 is the Windows host.
pub fn parse_default_gateway(ip_route: &str) -> Option<String> {
    ip_route
        .lines()
        .find(|line| line.starts_with("default"))
        .and_then(|line| line.split_whitespace().nth(2))
        .map(str::to_string)
}

async fn detect_wsl_host() -> Result<String> {
    let output = tokio::process::Command::new("ip")
        .arg("route")
        .output()
        .await?;
    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_default_gateway(&stdout).ok_or_else(|| {
        ConductorError::Config("Unable to detect remote host from the default route".to_string())
    })
}
