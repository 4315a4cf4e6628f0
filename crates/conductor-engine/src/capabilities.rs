use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use similar::TextDiff;
use tracing::debug;

use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::Capability;
use conductor_core::types::Args;

/// Registry of local capabilities available to `function` nodes.
pub struct CapabilityRegistry {
    capabilities: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            capabilities: HashMap::new(),
        }
    }

    /// Register a capability.
    pub fn register(&mut self, capability: impl Capability) {
        let name = capability.name().to_string();
        self.capabilities.insert(name, Arc::new(capability));
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.capabilities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.capabilities.contains_key(name)
    }

    /// Registered capability names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.capabilities.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Invoke a capability by name.
    pub fn invoke(&self, name: &str, args: &Args) -> Result<Value> {
        let capability = self
            .get(name)
            .ok_or_else(|| ConductorError::UnknownCapability(name.to_string()))?;
        debug!(capability = %name, "Invoking capability");
        capability.invoke(args)
    }

    /// Create a registry with all built-in capabilities registered.
    ///
    /// `file_registry` maps names such as `projects` to base paths for `build_path`.
    pub fn with_builtins(file_registry: HashMap<String, String>) -> Self {
        let mut registry = Self::new();
        registry.register(FuzzySelect);
        registry.register(BuildPath::new(file_registry));
        registry.register(FindInstance);
        registry
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn capability_error(name: &str, message: impl Into<String>) -> ConductorError {
    ConductorError::Capability {
        name: name.to_string(),
        message: message.into(),
    }
}

/// Optional string argument; `null` counts as absent.
fn opt_str<'a>(capability: &str, args: &'a Args, key: &str) -> Result<Option<&'a str>> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(other) => Err(capability_error(
            capability,
            format!("argument '{key}' must be a string, got {other}"),
        )),
    }
}

fn required_str<'a>(capability: &str, args: &'a Args, key: &str) -> Result<&'a str> {
    opt_str(capability, args, key)?
        .ok_or_else(|| capability_error(capability, format!("missing argument '{key}'")))
}

fn required_array<'a>(capability: &str, args: &'a Args, key: &str) -> Result<&'a Vec<Value>> {
    args.get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| capability_error(capability, format!("argument '{key}' must be a list")))
}

// ── FuzzySelect ─────────────────────────────────────────────────

/// Pick the choice that best matches a free-text query.
pub struct FuzzySelect;

impl FuzzySelect {
    fn score(query: &str, choice: &str) -> f64 {
        if choice.is_empty() {
            return 0.0;
        }
        // A choice spelled out inside the query beats any partial similarity;
        // among those, the longer one is the more specific match.
        if query.contains(choice) {
            return 1.0 + choice.chars().count() as f64 / (query.chars().count() as f64 + 1.0);
        }
        TextDiff::from_chars(query, choice).ratio() as f64
    }
}

impl Capability for FuzzySelect {
    fn name(&self) -> &str {
        "fuzzy_select"
    }

    fn invoke(&self, args: &Args) -> Result<Value> {
        let query = required_str(self.name(), args, "query")?.to_lowercase();
        let choices = required_array(self.name(), args, "choices")?;

        let mut best: Option<(&Value, f64)> = None;
        for choice in choices {
            let text = match choice {
                Value::String(s) => s.to_lowercase(),
                other => other.to_string().to_lowercase(),
            };
            let score = Self::score(&query, &text);
            if best.map_or(true, |(_, top)| score > top) {
                best = Some((choice, score));
            }
        }

        let (choice, score) =
            best.ok_or_else(|| capability_error(self.name(), "no choices to select from"))?;
        debug!(choice = %choice, score, "Fuzzy selection");
        Ok(choice.clone())
    }
}

// ── BuildPath ───────────────────────────────────────────────────

/// Build a filesystem path from a named base location and a folder name.
pub struct BuildPath {
    file_registry: HashMap<String, String>,
}

impl BuildPath {
    pub fn new(file_registry: HashMap<String, String>) -> Self {
        Self { file_registry }
    }

    fn base(&self, parent_name: &str) -> Result<&str> {
        self.file_registry
            .get(parent_name)
            .map(String::as_str)
            .filter(|b| !b.is_empty())
            .ok_or_else(|| {
                capability_error("build_path", format!("No base path found for: {parent_name}"))
            })
    }

    fn explicit(path: &str) -> String {
        let path = path.trim();
        if is_windows_path(path) {
            let wsl = to_wsl_path(path);
            if Path::new(&wsl).exists() {
                return wsl;
            }
        }
        path.to_string()
    }

    fn join(base: &str, folder: &str) -> Result<String> {
        // WSL mount: /mnt/c/projects
        if base.starts_with("/mnt/") {
            return Ok(format!("{}/{}", base.trim_end_matches('/'), folder));
        }
        // UNC path into the WSL filesystem: \\wsl$\Ubuntu\home\...
        if base.to_lowercase().starts_with("\\\\wsl$") {
            return Ok(format!("{}\\{}", base.trim_end_matches('\\'), folder));
        }
        // Windows drive path: C:\projects
        if is_windows_path(base) {
            let converted = to_wsl_path(base);
            return Ok(format!("{}/{}", converted.trim_end_matches('/'), folder));
        }
        Err(capability_error(
            "build_path",
            format!("Unrecognized path format: {base}"),
        ))
    }
}

impl Capability for BuildPath {
    fn name(&self) -> &str {
        "build_path"
    }

    fn invoke(&self, args: &Args) -> Result<Value> {
        let parent_name = opt_str(self.name(), args, "parent_name")?;
        let folder = opt_str(self.name(), args, "folder")?;
        let path = opt_str(self.name(), args, "path")?;

        let built = match (path, parent_name, folder) {
            (Some(path), _, _) => Self::explicit(path),
            (None, Some(parent), None) => self.base(parent)?.to_string(),
            (None, Some(parent), Some(folder)) => Self::join(self.base(parent)?, folder)?,
            (None, None, _) => {
                return Err(capability_error(self.name(), "Invalid path arguments"));
            }
        };
        Ok(Value::String(built))
    }
}

/// `C:\...` or `C:/...`
fn is_windows_path(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':'
}

/// Convert `C:\Users\me` to `/mnt/c/Users/me`.
pub fn to_wsl_path(windows_path: &str) -> String {
    if !is_windows_path(windows_path) {
        return windows_path.to_string();
    }
    let drive = windows_path[..1].to_lowercase();
    let tail = windows_path[2..].replace('\\', "/");
    format!("/mnt/{drive}{tail}")
}

// ── FindInstance ────────────────────────────────────────────────

/// Find the first window/app instance whose `key` field contains the query.
pub struct FindInstance;

impl Capability for FindInstance {
    fn name(&self) -> &str {
        "find_instance"
    }

    fn invoke(&self, args: &Args) -> Result<Value> {
        let instances = required_array(self.name(), args, "instances")?;
        let query = required_str(self.name(), args, "query")?;
        let key = opt_str(self.name(), args, "key")?;

        let found = instances.iter().find(|instance| {
            let candidate = match key {
                Some(key) => instance.get(key).and_then(Value::as_str),
                None => instance.as_str(),
            };
            candidate.is_some_and(|value| value.contains(query))
        });
        Ok(found.cloned().unwrap_or(Value::Null))
    }
}
