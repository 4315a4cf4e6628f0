use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;

use crate::context::ExecutionContext;
use crate::error::Result;
use crate::types::{Args, ControllerResponse, Intent};

/// Action controller: performs a named action on the remote machine.
///
/// The engine may call `trigger` several times for the same node when the
/// node has a retry budget. Implementations must either perform actions
/// idempotently or de-duplicate repeated requests themselves.
pub trait ActionController: Send + Sync + 'static {
    /// Perform `action` with `params`, giving up after `timeout`.
    ///
    /// Transport problems are reported as [`ControllerResponse::TransportError`]
    /// rather than as an `Err`, so the caller can retry them.
    fn trigger(
        &self,
        action: &str,
        params: Args,
        timeout: Duration,
    ) -> BoxFuture<'_, ControllerResponse>;
}

/// State evaluator: answers the named conditions used by decision nodes.
pub trait StateEvaluator: Send + Sync + 'static {
    /// Evaluate `condition`. Unrecognized names fail with `UnknownCondition`.
    fn evaluate<'a>(
        &'a self,
        condition: &'a str,
        context: &'a ExecutionContext,
    ) -> BoxFuture<'a, Result<bool>>;
}

/// Classifier: maps free text to an intent.
pub trait Classifier: Send + Sync + 'static {
    fn classify(&self, text: &str) -> Intent;
}

/// Capability: a local function invoked by `function` nodes.
pub trait Capability: Send + Sync + 'static {
    /// Name used in a function node's `controller` field.
    fn name(&self) -> &str;

    /// Run the capability once with resolved arguments.
    fn invoke(&self, args: &Args) -> Result<Value>;
}
