//! Handoff router.
//!
//! A finite-state coordinator over role names. Each turn performs exactly one
//! transition: classify once, validate the edge against the registry, and
//! fall back to the coordinator when the edge is not allowed. A resolved role
//! that still lacks a needed tool is reported as a capability gap rather than
//! handed off again.

use std::sync::Arc;

use tracing::{debug, warn};

use tabula_core::types::{RoleName, Session, ToolName};

use crate::classifier::{Decision, IntentClassifier};
use crate::error::RoutingError;
use crate::registry::RoleRegistry;

/// Outcome of routing one utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteDecision {
    pub resolved: RoleName,
    pub handoff_occurred: bool,
    /// The role control was taken from, when a handoff occurred.
    pub handoff_from: Option<RoleName>,
    pub inferred_tools: Vec<ToolName>,
    /// Inferred tools the resolved role cannot run.
    pub capability_gap: Vec<ToolName>,
    /// Routing error that was recovered by falling back to the coordinator.
    pub recovered: Option<RoutingError>,
}

#[derive(Debug, Clone)]
pub struct HandoffRouter {
    registry: Arc<RoleRegistry>,
    classifier: IntentClassifier,
}

impl HandoffRouter {
    pub fn new(registry: Arc<RoleRegistry>, classifier: IntentClassifier) -> Self {
        Self {
            registry,
            classifier,
        }
    }

    /// Pure transition function: where does `utterance` go from `active`?
    pub fn transition(&self, active: RoleName, utterance: &str) -> RouteDecision {
        let coordinator = self.registry.coordinator();
        let classification = self.classifier.classify(utterance, active);

        let (resolved, recovered) = match classification.decision {
            Decision::Stay => match self.registry.get(active) {
                Ok(_) => (active, None),
                Err(e) => (coordinator, Some(e)),
            },
            Decision::Handoff(target) => match self.registry.handoff_targets(active) {
                Ok(targets) if targets.contains(&target) => (target, None),
                Ok(_) => (
                    coordinator,
                    Some(RoutingError::InvalidHandoffTarget {
                        from: active,
                        to: target,
                    }),
                ),
                Err(e) => (coordinator, Some(e)),
            },
        };

        if let Some(ref err) = recovered {
            warn!(from = %active, error = %err, "Routing fell back to coordinator");
        }

        let handoff_occurred = resolved != active;
        let capability_gap: Vec<ToolName> = classification
            .inferred_tools
            .iter()
            .copied()
            .filter(|tool| !self.registry.can_invoke(resolved, *tool))
            .collect();

        debug!(
            from = %active,
            to = %resolved,
            handoff = handoff_occurred,
            inferred = ?classification.inferred_tools,
            "Routed utterance"
        );

        RouteDecision {
            resolved,
            handoff_occurred,
            handoff_from: handoff_occurred.then_some(active),
            inferred_tools: classification.inferred_tools,
            capability_gap,
            recovered,
        }
    }

    /// Apply one transition to the session's active role.
    pub fn route(&self, session: &mut Session, utterance: &str) -> RouteDecision {
        let decision = self.transition(session.active_role, utterance);
        session.active_role = decision.resolved;
        decision
    }
}
