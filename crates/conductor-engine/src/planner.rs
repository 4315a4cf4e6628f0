use std::sync::Arc;

use tracing::{debug, info, warn};

use conductor_core::error::{ConductorError, Result};
use conductor_core::traits::Classifier;
use conductor_core::types::{ActionSet, Args, Intent, Plan};

use crate::capabilities::CapabilityRegistry;
use crate::classifier::FALLBACK_INTENT;
use crate::registry::TemplateRegistry;
use crate::validator;

/// Turns intents into validated plans.
pub struct Planner {
    templates: Arc<TemplateRegistry>,
    capabilities: Arc<CapabilityRegistry>,
    classifier: Arc<dyn Classifier>,
    confidence_threshold: f64,
}

impl Planner {
    pub fn new(
        templates: Arc<TemplateRegistry>,
        capabilities: Arc<CapabilityRegistry>,
        classifier: Arc<dyn Classifier>,
        confidence_threshold: f64,
    ) -> Self {
        Self {
            templates,
            capabilities,
            classifier,
            confidence_threshold,
        }
    }

    pub fn templates(&self) -> &TemplateRegistry {
        &self.templates
    }

    /// Plan a named intent.
    ///
    /// Templates win over direct actions of the same name. An intent that is
    /// neither is an error, never a silent default.
    pub fn plan(
        &self,
        intent_name: &str,
        slot_params: &Args,
        available_actions: &ActionSet,
    ) -> Result<Plan> {
        if self.templates.contains(intent_name) {
            let graph = self.templates.instantiate(intent_name, slot_params)?;
            validator::validate_with_capabilities(&graph, available_actions, &self.capabilities)
                .map_err(|violations| {
                    warn!(
                        template = intent_name,
                        violations = violations.len(),
                        "Template produced an invalid graph"
                    );
                    ConductorError::PlanValidation(violations)
                })?;
            info!(
                template = intent_name,
                graph_id = %graph.id,
                nodes = graph.nodes.len(),
                "Planned task graph"
            );
            return Ok(Plan::Graph(graph));
        }

        if available_actions.contains(intent_name) {
            info!(action = intent_name, "Planned direct action");
            return Ok(Plan::Direct(Intent {
                action: intent_name.to_string(),
                params: slot_params.clone(),
                confidence: 1.0,
            }));
        }

        Err(ConductorError::UnknownIntent(intent_name.to_string()))
    }

    /// Classify raw input into an intent, degrading low-confidence matches to `fallback`.
    pub fn classify(&self, user_input: &str) -> Intent {
        let intent = self.classifier.classify(user_input);
        if intent.confidence < self.confidence_threshold && intent.action != FALLBACK_INTENT {
            debug!(
                action = %intent.action,
                confidence = intent.confidence,
                threshold = self.confidence_threshold,
                "Confidence below threshold, using fallback"
            );
            return Intent::new(FALLBACK_INTENT).with_confidence(intent.confidence);
        }
        intent
    }

    /// Plan an already classified intent. A direct plan keeps the intent's confidence.
    pub fn plan_intent(&self, intent: &Intent, available_actions: &ActionSet) -> Result<Plan> {
        let plan = self.plan(&intent.action, &intent.params, available_actions)?;
        Ok(match plan {
            Plan::Direct(direct) => Plan::Direct(direct.with_confidence(intent.confidence)),
            graph => graph,
        })
    }

    /// Classify, then plan.
    pub fn plan_input(&self, user_input: &str, available_actions: &ActionSet) -> Result<Plan> {
        let intent = self.classify(user_input);
        self.plan_intent(&intent, available_actions)
    }
}
