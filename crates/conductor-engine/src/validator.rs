//! Structural and referential checks on a task graph, run at plan time.

use conductor_core::error::{Violation, ViolationKind};
use conductor_core::types::{ActionSet, Node, TaskGraph};

use crate::capabilities::CapabilityRegistry;

/// Check entry, transition targets, and action controller names.
///
/// Returns every violation found, entry first and then nodes in id order.
pub fn validate(graph: &TaskGraph, available_actions: &ActionSet) -> Result<(), Vec<Violation>> {
    into_result(collect(graph, available_actions, None))
}

/// Like [`validate`], additionally checking that every function node names a
/// registered capability.
pub fn validate_with_capabilities(
    graph: &TaskGraph,
    available_actions: &ActionSet,
    capabilities: &CapabilityRegistry,
) -> Result<(), Vec<Violation>> {
    into_result(collect(graph, available_actions, Some(capabilities)))
}

fn into_result(violations: Vec<Violation>) -> Result<(), Vec<Violation>> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

fn collect(
    graph: &TaskGraph,
    available_actions: &ActionSet,
    capabilities: Option<&CapabilityRegistry>,
) -> Vec<Violation> {
    let mut violations = Vec::new();

    if !graph.nodes.contains_key(&graph.entry) {
        violations.push(Violation {
            node: graph.entry.clone(),
            kind: ViolationKind::MissingEntry,
        });
    }

    for (id, node) in &graph.nodes {
        for (field, target) in node.transitions() {
            if !graph.nodes.contains_key(target) {
                violations.push(Violation {
                    node: id.clone(),
                    kind: ViolationKind::DanglingTarget {
                        field: field.to_string(),
                        target: target.to_string(),
                    },
                });
            }
        }

        match node {
            Node::Action(action) => {
                let fallback = action.fallback_action.as_ref().map(|f| &f.controller);
                for controller in std::iter::once(&action.controller).chain(fallback) {
                    if !available_actions.contains(controller) {
                        violations.push(Violation {
                            node: id.clone(),
                            kind: ViolationKind::UnknownController {
                                controller: controller.clone(),
                            },
                        });
                    }
                }
            }
            Node::Function(function) => {
                if let Some(caps) = capabilities {
                    if !caps.contains(&function.controller) {
                        violations.push(Violation {
                            node: id.clone(),
                            kind: ViolationKind::UnknownCapability {
                                capability: function.controller.clone(),
                            },
                        });
                    }
                }
            }
            Node::Noop | Node::Abort { .. } | Node::Decision(_) => {}
        }
    }

    violations
}
