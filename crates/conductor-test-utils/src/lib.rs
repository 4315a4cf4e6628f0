//! Mocks and fixtures shared by the Conductor test suites.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;

use conductor_core::context::ExecutionContext;
use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::{ActionController, Classifier, StateEvaluator};
use conductor_core::types::{ActionSet, Args, ControllerResponse, Intent};

/// Build an [`ActionSet`] from string literals.
pub fn action_set(names: &[&str]) -> ActionSet {
    names.iter().map(|s| s.to_string()).collect()
}

/// One recorded controller invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub action: String,
    pub params: Args,
}

#[derive(Default)]
struct MockState {
    scripted: HashMap<String, VecDeque<ControllerResponse>>,
    default: Option<ControllerResponse>,
    hanging: HashSet<String>,
    calls: Vec<RecordedCall>,
}

/// Action controller with scripted per-action responses.
///
/// Responses pushed for an action are returned in order; once they run out
/// the default response is used (a bare success unless set). Actions marked
/// with [`MockController::hang`] never complete.
#[derive(Default)]
pub struct MockController {
    state: Mutex<MockState>,
}

impl MockController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response for the next call to `action`.
    pub fn push(&self, action: &str, response: ControllerResponse) {
        self.lock()
            .scripted
            .entry(action.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn set_default(&self, response: ControllerResponse) {
        self.lock().default = Some(response);
    }

    /// Make every call to `action` wait forever.
    pub fn hang(&self, action: &str) {
        self.lock().hanging.insert(action.to_string());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.lock().calls.len()
    }

    pub fn calls_for(&self, action: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.action == action)
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl ActionController for MockController {
    fn trigger(
        &self,
        action: &str,
        params: Args,
        _timeout: Duration,
    ) -> BoxFuture<'_, ControllerResponse> {
        let action = action.to_string();
        Box::pin(async move {
            let (hangs, response) = {
                let mut state = self.lock();
                state.calls.push(RecordedCall {
                    action: action.clone(),
                    params,
                });
                let scripted = state
                    .scripted
                    .get_mut(&action)
                    .and_then(|queue| queue.pop_front());
                let response = scripted
                    .or_else(|| state.default.clone())
                    .unwrap_or_else(|| ControllerResponse::success(None));
                (state.hanging.contains(&action), response)
            };
            if hangs {
                futures::future::pending::<()>().await;
            }
            response
        })
    }
}

/// State evaluator answering from a fixed table.
#[derive(Debug, Clone, Default)]
pub struct MockEvaluator {
    answers: BTreeMap<String, bool>,
}

impl MockEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, condition: &str, value: bool) -> Self {
        self.answers.insert(condition.to_string(), value);
        self
    }
}

impl StateEvaluator for MockEvaluator {
    fn evaluate<'a>(
        &'a self,
        condition: &'a str,
        _context: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            self.answers
                .get(condition)
                .copied()
                .ok_or_else(|| ConductorError::UnknownCondition(condition.to_string()))
        })
    }
}

/// Classifier that always returns the same intent.
#[derive(Debug, Clone)]
pub struct FixedClassifier {
    intent: Intent,
}

impl FixedClassifier {
    pub fn new(intent: Intent) -> Self {
        Self { intent }
    }
}

impl Classifier for FixedClassifier {
    fn classify(&self, _text: &str) -> Intent {
        self.intent.clone()
    }
}
