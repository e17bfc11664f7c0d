//! Conversational engine for Tabula.
//!
//! Routes each utterance to one of a fixed set of roles, validates and
//! dispatches the tools that role proposes against the session's dataset,
//! and records every turn in session memory.

pub mod classifier;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod inference;
pub mod keyword;
pub mod orchestrator;
pub mod registry;
pub mod response;
pub mod router;

pub use classifier::{infer_tools, Classification, Decision, IntentClassifier};
pub use context::{ConversationManager, FollowUpResolver};
pub use dispatcher::{ToolCall, ToolDispatcher, ToolOutput};
pub use error::{ChatError, RoutingError};
pub use inference::{InferencePlan, InferenceRequest, InferenceService};
pub use keyword::KeywordInference;
pub use orchestrator::{ChatOrchestrator, TurnReply};
pub use registry::{builtin_specs, Role, RoleRegistry, RoleSpec};
pub use response::ResponseGenerator;
pub use router::{HandoffRouter, RouteDecision};
