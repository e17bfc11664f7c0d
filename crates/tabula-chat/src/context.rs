//! Conversation context management.
//!
//! Builds the rolling context window handed to the inference service and
//! resolves follow-up utterances ("what about the median?") against the
//! columns used in prior turns.

use std::sync::LazyLock;

use regex::Regex;

use tabula_core::types::{DatasetRef, Session, ToolName, Turn};

use crate::inference::InferenceRequest;
use crate::registry::Role;

// =============================================================================
// ConversationManager
// =============================================================================

/// Assembles inference requests from session state.
#[derive(Debug, Clone)]
pub struct ConversationManager {
    /// Maximum number of recent turns to pass as context.
    pub context_turns: usize,
}

impl ConversationManager {
    pub fn new(context_turns: usize) -> Self {
        Self { context_turns }
    }

    /// Request for `role` answering `utterance` verbatim.
    pub fn build_request(
        &self,
        session: &Session,
        role: &Role,
        utterance: &str,
        inferred_tools: &[ToolName],
    ) -> InferenceRequest {
        InferenceRequest {
            role: role.name,
            persona: role.persona.clone(),
            capabilities: role.capabilities.iter().copied().collect(),
            utterance: utterance.to_string(),
            history: session.recent_turns(self.context_turns).to_vec(),
            dataset: session.dataset.clone(),
            inferred_tools: inferred_tools.to_vec(),
        }
    }
}

// =============================================================================
// FollowUpResolver
// =============================================================================

static FOLLOW_UP_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:and\s+|ok(?:ay)?,?\s+|now\s+)?(?:what\s+about|how\s+about|and)\b")
        .expect("Invalid follow-up regex")
});

/// Column-bearing argument names, in preference order.
const COLUMN_ARGS: &[&str] = &["column", "agg_column"];

/// Resolves context-dependent references in an utterance.
#[derive(Debug, Clone, Copy, Default)]
pub struct FollowUpResolver;

impl FollowUpResolver {
    /// Whether the utterance reads as a continuation of the previous turn.
    pub fn is_follow_up(&self, utterance: &str) -> bool {
        FOLLOW_UP_RE.is_match(utterance)
    }

    /// The column most recently operated on successfully, searching the
    /// newest turns first.
    pub fn implied_column(&self, history: &[Turn], dataset: Option<&DatasetRef>) -> Option<String> {
        for turn in history.iter().rev() {
            for inv in turn.tool_invocations.iter().rev() {
                if inv.outcome.is_err() {
                    continue;
                }
                let column = COLUMN_ARGS.iter().find_map(|key| inv.arg_str(key));
                if let Some(column) = column {
                    let still_present = dataset
                        .map(|ds| ds.column_type(column).is_some())
                        .unwrap_or(true);
                    if still_present {
                        return Some(column.to_string());
                    }
                }
            }
        }
        None
    }
}

// =============================================================================
// Tests
// =============================================================================
