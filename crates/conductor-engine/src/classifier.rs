use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use conductor_core::traits::Classifier;
use conductor_core::types::Intent;

use crate::capabilities::to_wsl_path;

/// Intent name produced when nothing matches.
pub const FALLBACK_INTENT: &str = "fallback";

const EXECUTABLE_SUFFIXES: [&str; 5] = ["exe", "com", "bat", "cmd", "msi"];

/// Rule-based classifier over lower-cased keywords.
///
/// Matches carry confidence 1.0; anything unmatched becomes the `fallback`
/// intent with confidence 0.0.
pub struct KeywordClassifier {
    number: Regex,
    /// File registry entries, longest key first.
    file_registry: Vec<(String, String)>,
}

impl KeywordClassifier {
    pub fn new() -> Self {
        Self {
            // "by 10", "to 40"
            number: Regex::new(r"\b(?:by|to)\s+(\d+)\b").expect("static regex is valid"),
            file_registry: Vec::new(),
        }
    }

    /// Route `open <name>` requests through the file registry.
    pub fn with_file_registry(mut self, file_registry: HashMap<String, String>) -> Self {
        let mut entries: Vec<(String, String)> = file_registry.into_iter().collect();
        entries.sort_by(|(a, _), (b, _)| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        self.file_registry = entries;
        self
    }

    /// `open_app`, `open_folder` or `open_file` for the registry entry named in `text`.
    fn open_registry_entry(&self, text: &str) -> Option<Intent> {
        let (key, path) = self
            .file_registry
            .iter()
            .find(|(key, _)| text.contains(&key.to_lowercase()))?;

        if path.starts_with("http://") || path.starts_with("https://") {
            return Some(Intent::new("open_app").with_param("app_name", key.as_str()));
        }

        let local = to_wsl_path(path);
        let local = Path::new(&local);
        if local.is_dir() {
            return Some(Intent::new("open_folder").with_param("folder_name", key.as_str()));
        }
        if local.is_file() {
            let executable = local
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| EXECUTABLE_SUFFIXES.contains(&ext.to_lowercase().as_str()));
            return Some(if executable {
                Intent::new("open_app").with_param("app_name", key.as_str())
            } else {
                Intent::new("open_file").with_param("file_name", key.as_str())
            });
        }

        debug!(key = %key, path = %path, "Registry entry is neither a URL nor an existing path");
        None
    }

    fn extract_number(&self, text: &str) -> Option<i64> {
        self.number
            .captures(text)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok())
    }

    /// `(value, mode)` for volume/brightness requests.
    fn slider_params(&self, text: &str) -> (Option<i64>, Option<&'static str>) {
        let has = |words: &[&str]| words.iter().any(|w| text.contains(w));
        let value = self.extract_number(text);

        if has(&["mute", "silent"]) {
            return (Some(0), Some("set"));
        }
        if has(&["max", "full"]) {
            return (Some(100), Some("set"));
        }
        if has(&["half", "medium"]) {
            return (Some(50), Some("set"));
        }
        if has(&["decrease", "lower", "down"]) {
            return (value, Some("dec"));
        }
        if has(&["increase", "raise", "up"]) {
            return (value, Some("inc"));
        }
        if has(&["set", "change"]) || value.is_some() {
            return (value, Some("set"));
        }
        (None, None)
    }
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Classifier for KeywordClassifier {
    fn classify(&self, text: &str) -> Intent {
        let text = text.to_lowercase();
        let has = |word: &str| text.contains(word);

        if has("setup") && has("project") {
            return Intent::new("start_project");
        }
        if has("open copied path") {
            return Intent::new("open_copied_path");
        }
        if has("open") && has("project") {
            return Intent::new("open_project");
        }
        if has("prepare") && has("work") {
            return Intent::new("prepare_work_environment");
        }
        if has("terminal") {
            return Intent::new("open_terminal_here");
        }
        if has("organize") || has("organise") {
            let target = text.split_whitespace().last().unwrap_or_default().to_string();
            return Intent::new("organize_folder").with_param("target_folder", target);
        }
        if has("open") {
            if let Some(intent) = self.open_registry_entry(&text) {
                return intent;
            }
        }
        for slider in ["volume", "brightness"] {
            if has(slider) {
                let (value, mode) = self.slider_params(&text);
                return Intent::new(slider)
                    .with_param("value", value.map_or(Value::Null, Value::from))
                    .with_param("mode", mode.map_or(Value::Null, Value::from));
            }
        }

        Intent::new(FALLBACK_INTENT).with_confidence(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_template_intents() {
        let c = KeywordClassifier::new();
        assert_eq!(c.classify("Setup project atlas").action, "start_project");
        assert_eq!(c.classify("please prepare my work stuff").action, "prepare_work_environment");
        assert_eq!(c.classify("open copied path").action, "open_copied_path");
        assert_eq!(c.classify("open the atlas project").action, "open_project");
        assert_eq!(c.classify("terminal here").action, "open_terminal_here");
    }

    #[test]
    fn test_organize_target() {
        let intent = KeywordClassifier::new().classify("organize Downloads");
        assert_eq!(intent.action, "organize_folder");
        assert_eq!(intent.params.get("target_folder"), Some(&json!("downloads")));
    }

    #[test]
    fn test_slider_params() {
        let c = KeywordClassifier::new();
        let intent = c.classify("turn the volume down by 10");
        assert_eq!(intent.action, "volume");
        assert_eq!(intent.params.get("value"), Some(&json!(10)));
        assert_eq!(intent.params.get("mode"), Some(&json!("dec")));

        let intent = c.classify("mute volume");
        assert_eq!(intent.params.get("value"), Some(&json!(0)));
        assert_eq!(intent.params.get("mode"), Some(&json!("set")));

        let intent = c.classify("brightness to 70");
        assert_eq!(intent.action, "brightness");
        assert_eq!(intent.params.get("value"), Some(&json!(70)));
        assert_eq!(intent.params.get("mode"), Some(&json!("set")));

        let intent = c.classify("what is the volume");
        assert_eq!(intent.params.get("value"), Some(&Value::Null));
        assert_eq!(intent.params.get("mode"), Some(&Value::Null));
    }

    #[test]
    fn test_fallback() {
        let intent = KeywordClassifier::new().classify("sing me a song");
        assert_eq!(intent.action, FALLBACK_INTENT);
        assert_eq!(intent.confidence, 0.0);
    }

    #[test]
    fn test_open_registry_entry() {
        let dir = tempfile::tempdir().unwrap();
        let notes = dir.path().join("notes");
        std::fs::create_dir(&notes).unwrap();
        let report = dir.path().join("report.pdf");
        std::fs::write(&report, b"%PDF").unwrap();
        let tool = dir.path().join("Tool.EXE");
        std::fs::write(&tool, b"MZ").unwrap();

        let mut files = HashMap::new();
        for (key, path) in [("notes", &notes), ("report", &report), ("tool", &tool)] {
            files.insert(key.to_string(), path.display().to_string());
        }
        files.insert("docs".to_string(), "https://docs.rs".to_string());
        files.insert("ghost".to_string(), "/no/such/place".to_string());
        let c = KeywordClassifier::new().with_file_registry(files);

        let intent = c.classify("open Notes");
        assert_eq!(intent.action, "open_folder");
        assert_eq!(intent.params.get("folder_name"), Some(&json!("notes")));

        let intent = c.classify("open the report");
        assert_eq!(intent.action, "open_file");
        assert_eq!(intent.params.get("file_name"), Some(&json!("report")));

        let intent = c.classify("open tool");
        assert_eq!(intent.action, "open_app");
        assert_eq!(intent.params.get("app_name"), Some(&json!("tool")));

        assert_eq!(c.classify("open docs").action, "open_app");
        assert_eq!(c.classify("open ghost").action, FALLBACK_INTENT);
        assert_eq!(c.classify("open the atlas project").action, "open_project");
    }

    #[test]
    fn test_longest_registry_key_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut files = HashMap::new();
        files.insert("code".to_string(), "https://example.com/code".to_string());
        files.insert(
            "code samples".to_string(),
            dir.path().display().to_string(),
        );
        let c = KeywordClassifier::new().with_file_registry(files);

        let intent = c.classify("open code samples");
        assert_eq!(intent.action, "open_folder");
        assert_eq!(intent.params.get("folder_name"), Some(&json!("code samples")));
    }
}
