//! Role registry: the static table of conversational roles.
//!
//! Built once at startup and read-only afterwards. Capabilities and handoff
//! edges are plain set lookups.

use std::collections::BTreeSet;
use std::str::FromStr;

use regex::Regex;

use tabula_core::types::{RoleName, ToolName};

use crate::error::RoutingError;

/// Declarative description of one role, before trigger compilation.
#[derive(Debug, Clone)]
pub struct RoleSpec {
    pub name: RoleName,
    pub persona: String,
    /// Regex fragments matched case-insensitively against utterances.
    pub triggers: Vec<String>,
    pub capabilities: BTreeSet<ToolName>,
    pub handoff_targets: BTreeSet<RoleName>,
}

/// A registered role with compiled triggers.
#[derive(Debug, Clone)]
pub struct Role {
    pub name: RoleName,
    pub persona: String,
    triggers: Vec<Regex>,
    pub capabilities: BTreeSet<ToolName>,
    pub handoff_targets: BTreeSet<RoleName>,
}

impl Role {
    /// Whether any of this role's triggers occur in the utterance.
    pub fn is_triggered_by(&self, utterance: &str) -> bool {
        self.triggers.iter().any(|re| re.is_match(utterance))
    }

    pub fn can_invoke(&self, tool: ToolName) -> bool {
        self.capabilities.contains(&tool)
    }
}

/// Immutable registry of roles.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
    roles: Vec<Role>,
    coordinator: RoleName,
}

impl RoleRegistry {
    /// Build a registry from specs, validating coordinator presence, role
    /// uniqueness, handoff edges and trigger syntax.
    pub fn new(specs: Vec<RoleSpec>, coordinator: RoleName) -> Result<Self, RoutingError> {
        let names: Vec<RoleName> = specs.iter().map(|s| s.name).collect();
        if !names.contains(&coordinator) {
            return Err(RoutingError::UnknownRole(coordinator.to_string()));
        }

        let mut roles = Vec::with_capacity(specs.len());
        for (i, spec) in specs.into_iter().enumerate() {
            if names[..i].contains(&spec.name) {
                return Err(RoutingError::DuplicateRole(spec.name));
            }
            if let Some(missing) = spec.handoff_targets.iter().find(|t| !names.contains(t)) {
                return Err(RoutingError::UnknownRole(missing.to_string()));
            }

            let triggers = spec
                .triggers
                .iter()
                .map(|t| {
                    Regex::new(&format!("(?i){}", t)).map_err(|e| RoutingError::InvalidTrigger {
                        role: spec.name,
                        message: e.to_string(),
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;

            roles.push(Role {
                name: spec.name,
                persona: spec.persona,
                triggers,
                capabilities: spec.capabilities,
                handoff_targets: spec.handoff_targets,
            });
        }

        Ok(Self { roles, coordinator })
    }

    /// The default four-role table.
    pub fn builtin() -> Self {
        Self::new(builtin_specs(), RoleName::Coordinator).expect("Invalid builtin role table")
    }

    /// Look up a role by its wire name.
    pub fn resolve(&self, name: &str) -> Result<&Role, RoutingError> {
        let role = RoleName::from_str(name).map_err(|_| RoutingError::UnknownRole(name.to_string()))?;
        self.get(role)
    }

    pub fn get(&self, name: RoleName) -> Result<&Role, RoutingError> {
        self.roles
            .iter()
            .find(|r| r.name == name)
            .ok_or_else(|| RoutingError::UnknownRole(name.to_string()))
    }

    pub fn capability_set(&self, name: RoleName) -> Result<&BTreeSet<ToolName>, RoutingError> {
        self.get(name).map(|r| &r.capabilities)
    }

    pub fn handoff_targets(&self, name: RoleName) -> Result<&BTreeSet<RoleName>, RoutingError> {
        self.get(name).map(|r| &r.handoff_targets)
    }

    /// Whether `role` may call `tool`. Unregistered roles may call nothing.
    pub fn can_invoke(&self, role: RoleName, tool: ToolName) -> bool {
        self.get(role).map(|r| r.can_invoke(tool)).unwrap_or(false)
    }

    pub fn coordinator(&self) -> RoleName {
        self.coordinator
    }

    /// Registered role names in registration order.
    pub fn list_roles(&self) -> Vec<RoleName> {
        self.roles.iter().map(|r| r.name).collect()
    }

    pub fn roles(&self) -> &[Role] {
        &self.roles
    }
}

impl Default for RoleRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

fn others(of: RoleName) -> BTreeSet<RoleName> {
    RoleName::ALL.into_iter().filter(|r| *r != of).collect()
}

fn fragments(pats: &[&str]) -> Vec<String> {
    pats.iter().map(|p| p.to_string()).collect()
}

/// Specs for the builtin roles. Every role may hand off to every other.
pub fn builtin_specs() -> Vec<RoleSpec> {
    use ToolName::*;

    vec![
        RoleSpec {
            name: RoleName::Coordinator,
            persona: "You are the coordinator. Greet the user, explain what the team can do, \
                      and send data questions to the right specialist."
                .to_string(),
            triggers: fragments(&[
                r"\bstart\s+over\b",
                r"\bcoordinator\b",
                r"\bwhat\s+can\s+you\s+do\b",
                r"\bmain\s+menu\b",
            ]),
            capabilities: [ListDatasets, DescribeDataset, SuggestQuestions].into(),
            handoff_targets: others(RoleName::Coordinator),
        },
        RoleSpec {
            name: RoleName::DataLoader,
            persona: "You are the data loader. You find, load and describe CSV files."
                .to_string(),
            triggers: fragments(&[
                r"\bload",
                r"\bimport",
                r"\bfiles?\b",
                r"\bdatasets?\b",
                r"\bcsv\b",
                r"\bavailable\b",
            ]),
            capabilities: [ListDatasets, LoadDataset, DescribeDataset, ColumnInfo].into(),
            handoff_targets: others(RoleName::DataLoader),
        },
        RoleSpec {
            name: RoleName::Analytics,
            persona: "You are the analytics specialist. You run statistics on the loaded \
                      dataset and report exact numbers."
                .to_string(),
            triggers: fragments(&[
                r"\baverage\b",
                r"\bmean\b",
                r"\bmedian\b",
                r"\b(?:minimum|lowest|smallest)\b",
                r"\b(?:maximum|highest|largest|biggest)\b",
                r"\bstandard\s+deviation\b",
                r"\bcorrelat",
                r"\boutliers?\b",
                r"\banomal",
                r"\bgroup",
                r"\bhow\s+many\b",
                r"\bcount\b",
                r"\bstatistic",
                r"\banaly[sz]",
                r"\bcalculat",
                r"\btotal\b",
            ]),
            capabilities: [
                DescribeDataset,
                ColumnInfo,
                Mean,
                Median,
                Min,
                Max,
                StdDev,
                CountWhere,
                CorrelationMatrix,
                DetectOutliers,
                GroupBy,
                SuggestQuestions,
            ]
            .into(),
            handoff_targets: others(RoleName::Analytics),
        },
        RoleSpec {
            name: RoleName::Communication,
            persona: "You are the communication specialist. You explain results in plain \
                      language and suggest useful next questions."
                .to_string(),
            triggers: fragments(&[
                r"\bexplain",
                r"\bguid",
                r"\bsuggest",
                r"\binterpret",
                r"\bhelp\b",
                r"\bunderstand",
                r"\bclarify",
                r"\bwhat\s+(?:can|should)\s+i\s+ask\b",
                r"\bwhat\s+does\s+(?:that|this|it)\s+mean\b",
            ]),
            capabilities: [DescribeDataset, ColumnInfo, SuggestQuestions].into(),
            handoff_targets: others(RoleName::Communication),
        },
    ]
}
