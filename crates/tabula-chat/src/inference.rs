//! Seam to the external generation service.
//!
//! The orchestrator treats the service as opaque: it proposes tool calls for
//! a role and later turns tool results into prose. Every call is bounded by a
//! timeout on the orchestrator side.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use tabula_core::types::{DatasetRef, RoleName, ToolInvocation, ToolName, Turn};

use crate::dispatcher::ToolCall;
use crate::error::ChatError;

/// Everything the service sees for one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub role: RoleName,
    pub persona: String,
    /// Tools the role may call. Proposals outside this list are rejected.
    pub capabilities: Vec<ToolName>,
    /// The user's text, unmodified.
    pub utterance: String,
    /// Most recent turns, oldest first.
    pub history: Vec<Turn>,
    pub dataset: Option<DatasetRef>,
    /// Tools the classifier inferred from the utterance.
    pub inferred_tools: Vec<ToolName>,
}

/// What the service wants to do with a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum InferencePlan {
    /// Reply directly without tools.
    Answer(String),
    /// Run these calls in order, then synthesize.
    UseTools(Vec<ToolCall>),
}

#[async_trait]
pub trait InferenceService: Send + Sync {
    async fn plan(&self, request: &InferenceRequest) -> Result<InferencePlan, ChatError>;

    async fn synthesize(
        &self,
        request: &InferenceRequest,
        invocations: &[ToolInvocation],
    ) -> Result<String, ChatError>;
}
