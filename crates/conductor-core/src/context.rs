use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Reserved context key holding the original request text.
pub const USER_INPUT_KEY: &str = "user_input";

/// Per-run variable store passed between graph nodes.
///
/// Keys keep their insertion order so a serialized snapshot reads in the
/// order the run produced values. A context belongs to exactly one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionContext {
    data: Map<String, Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a context seeded with `user_input`.
    pub fn seeded(user_input: &str) -> Self {
        let mut ctx = Self::new();
        ctx.set(USER_INPUT_KEY, Value::String(user_input.to_string()));
        ctx
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    /// Set a value. Overwriting keeps the key's original position.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    /// Remove a value, keeping the order of the remaining keys.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.shift_remove(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(|k| k.as_str())
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

/// Truthiness of a JSON value: `null`, `false`, `0`, `""`, `[]` and `{}` are falsy.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}
