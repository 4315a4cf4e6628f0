use std::collections::BTreeMap;
use std::sync::Arc;

use conductor_core::error::{ConductorError, Result};
use conductor_core::types::{Args, TaskGraph};

/// Builds a fresh task graph from named slot parameters.
pub type TemplateFactory = Arc<dyn Fn(&Args) -> Result<TaskGraph> + Send + Sync>;

/// A registered template: a factory plus the parameters it requires.
#[derive(Clone)]
pub struct Template {
    name: String,
    params: Vec<String>,
    factory: TemplateFactory,
}

impl Template {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[String] {
        &self.params
    }

    /// Build a new graph. Every declared parameter must be present in `params`.
    pub fn instantiate(&self, params: &Args) -> Result<TaskGraph> {
        if let Some(missing) = self.params.iter().find(|p| !params.contains_key(*p)) {
            return Err(ConductorError::MissingTemplateParam {
                template: self.name.clone(),
                param: missing.clone(),
            });
        }
        (self.factory)(params)
    }
}

impl std::fmt::Debug for Template {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Registry of task-graph templates, keyed by intent name.
///
/// Populated once at startup and shared read-only (behind `Arc`) afterwards.
#[derive(Debug, Default)]
pub struct TemplateRegistry {
    templates: BTreeMap<String, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template. A later registration under the same name replaces the earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F, params: &[&str])
    where
        F: Fn(&Args) -> Result<TaskGraph> + Send + Sync + 'static,
    {
        let name = name.into();
        self.templates.insert(
            name.clone(),
            Template {
                name,
                params: params.iter().map(|p| p.to_string()).collect(),
                factory: Arc::new(factory),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&Template> {
        self.templates.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.contains_key(name)
    }

    /// Instantiate the named template.
    pub fn instantiate(&self, name: &str, params: &Args) -> Result<TaskGraph> {
        self.get(name)
            .ok_or_else(|| ConductorError::TemplateNotFound(name.to_string()))?
            .instantiate(params)
    }

    /// Registered template names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.templates.keys().map(|s| s.as_str()).collect()
    }

    pub fn templates(&self) -> impl Iterator<Item = &Template> {
        self.templates.values()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Create a registry with all built-in templates registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::templates::register_builtins(&mut registry);
        registry
    }
}
