//! Intent classifier.
//!
//! Maps `(utterance, active role)` to STAY or a handoff target using two
//! keyword tables: a tool table that infers which tools the utterance needs,
//! and each role's trigger table from the registry. Pure and deterministic.

use std::sync::{Arc, LazyLock};

use regex::Regex;

use tabula_core::config::RoutingConfig;
use tabula_core::types::{RoleName, ToolName};

use crate::registry::RoleRegistry;

// =============================================================================
// Tool keyword table (compiled once, reused across calls)
// =============================================================================

/// Utterance fragments that imply a tool, in tool-priority order.
static TOOL_KEYWORDS: LazyLock<Vec<(ToolName, Regex)>> = LazyLock::new(|| {
    let mk = |tool: ToolName, pat: &str| -> (ToolName, Regex) {
        (tool, Regex::new(pat).expect("Invalid tool keyword regex"))
    };

    vec![
        mk(
            ToolName::LoadDataset,
            r"(?i)\bload(?:ing)?\b|\bimport\b|\bopen\b|[\w-]+\.csv\b",
        ),
        mk(
            ToolName::ListDatasets,
            r"(?i)\bavailable\b|\blist\b.*\b(?:datasets|files)\b|\b(?:which|what)\s+(?:datasets|files)\b",
        ),
        mk(
            ToolName::DescribeDataset,
            r"(?i)\bcolumns\b|\bschema\b|\bdescribe\b|\bstructure\b|\bfields\b",
        ),
        mk(
            ToolName::ColumnInfo,
            r"(?i)\bcolumn\s+info|\bdata\s+types?\b|\bunique\s+values\b|\bprofile\b",
        ),
        mk(ToolName::Mean, r"(?i)\baverage\b|\bmean\b|\bavg\b"),
        mk(ToolName::Median, r"(?i)\bmedian\b"),
        mk(
            ToolName::Min,
            r"(?i)\bminimum\b|\blowest\b|\bsmallest\b|\bmin\b",
        ),
        mk(
            ToolName::Max,
            r"(?i)\bmaximum\b|\bhighest\b|\blargest\b|\bbiggest\b|\bmax\b",
        ),
        mk(
            ToolName::StdDev,
            r"(?i)\bstandard\s+deviation\b|\bstd\b|\bstdev\b|\bspread\b|\bvariab",
        ),
        mk(
            ToolName::CountWhere,
            r"(?i)\bhow\s+many\b|\bcount\b|\bnumber\s+of\b",
        ),
        mk(ToolName::CorrelationMatrix, r"(?i)\bcorrelat|\brelationship"),
        mk(ToolName::DetectOutliers, r"(?i)\boutliers?\b|\banomal|\bunusual\b"),
        mk(
            ToolName::GroupBy,
            r"(?i)\bgroup(?:ed)?\b|\bbreak\s*down\b|\bper\s+\w|\bfor\s+each\b|\bby\s+(?:the\s+)?[a-z_]",
        ),
        mk(
            ToolName::SuggestQuestions,
            r"(?i)\bsuggest|\bwhat\s+(?:can|should)\s+i\s+ask\b|\bwhat\s+questions\b",
        ),
    ]
});

/// Tools an utterance appears to need, in tool-priority order.
pub fn infer_tools(utterance: &str) -> Vec<ToolName> {
    TOOL_KEYWORDS
        .iter()
        .filter(|(_, re)| re.is_match(utterance))
        .map(|(tool, _)| *tool)
        .collect()
}

/// Keyword pattern that infers `tool`.
pub(crate) fn tool_keyword(tool: ToolName) -> Option<&'static Regex> {
    TOOL_KEYWORDS
        .iter()
        .find(|(t, _)| *t == tool)
        .map(|(_, re)| re)
}

// =============================================================================
// Classification
// =============================================================================

/// Routing verdict for one utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Stay,
    Handoff(RoleName),
}

/// Classifier output: the verdict plus the tools that drove it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub decision: Decision,
    pub inferred_tools: Vec<ToolName>,
}

/// Keyword-table intent classifier.
#[derive(Debug, Clone)]
pub struct IntentClassifier {
    registry: Arc<RoleRegistry>,
    routing: RoutingConfig,
}

impl IntentClassifier {
    pub fn new(registry: Arc<RoleRegistry>, routing: RoutingConfig) -> Self {
        Self { registry, routing }
    }

    /// Classify an utterance for the given active role.
    ///
    /// STAY when the active role owns the primary inferred tool (the first in
    /// tool-priority order, so a load outranks whatever follows it), or when
    /// nothing matches at all. Otherwise the best-ranked role whose triggers
    /// match, falling back to the coordinator when no trigger matches.
    pub fn classify(&self, utterance: &str, active: RoleName) -> Classification {
        let inferred_tools = infer_tools(utterance);

        let owns_primary = inferred_tools
            .first()
            .is_some_and(|tool| self.registry.can_invoke(active, *tool));
        if owns_primary {
            return Classification {
                decision: Decision::Stay,
                inferred_tools,
            };
        }

        let best = self
            .registry
            .roles()
            .iter()
            .filter(|role| role.name != active && role.is_triggered_by(utterance))
            .min_by_key(|role| self.routing.rank(role.name))
            .map(|role| role.name);

        let decision = match best {
            Some(target) => Decision::Handoff(target),
            None if !inferred_tools.is_empty() => {
                let coordinator = self.registry.coordinator();
                if active == coordinator {
                    Decision::Stay
                } else {
                    Decision::Handoff(coordinator)
                }
            }
            None => Decision::Stay,
        };

        Classification {
            decision,
            inferred_tools,
        }
    }
}
