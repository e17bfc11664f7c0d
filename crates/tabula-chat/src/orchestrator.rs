//! Chat orchestrator: central coordinator wiring router, dispatcher,
//! inference and session memory.
//!
//! One turn runs `read session -> route -> plan -> dispatch -> synthesize ->
//! compose -> append` under a per-session async lock. Different sessions
//! proceed in parallel.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tabula_analysis::TabularLibrary;
use tabula_core::config::{ChatConfig, TabulaConfig};
use tabula_core::error::TabulaError;
use tabula_core::types::{
    DatasetRef, RoleName, Session, SessionId, SessionSummary, Timestamp, ToolErrorKind,
    ToolInvocation, Turn,
};
use tabula_storage::SessionStore;

use crate::classifier::IntentClassifier;
use crate::context::ConversationManager;
use crate::dispatcher::{ToolCall, ToolDispatcher};
use crate::error::ChatError;
use crate::inference::{InferencePlan, InferenceService};
use crate::registry::{Role, RoleRegistry};
use crate::response::{ResponseGenerator, TurnSummary, PERSISTENCE_WARNING};
use crate::router::HandoffRouter;

/// Result of one submitted turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnReply {
    pub session_id: SessionId,
    pub answer: String,
    /// Role that produced the answer.
    pub role: RoleName,
    pub handoff_from: Option<RoleName>,
    pub tool_invocations: Vec<ToolInvocation>,
    /// False when the turn could not be written after retries.
    pub persisted: bool,
}

/// Central chat orchestrator.
pub struct ChatOrchestrator {
    config: ChatConfig,
    registry: Arc<RoleRegistry>,
    router: HandoffRouter,
    dispatcher: ToolDispatcher,
    library: Arc<dyn TabularLibrary>,
    conversation: ConversationManager,
    responses: ResponseGenerator,
    store: Arc<dyn SessionStore>,
    inference: Arc<dyn InferenceService>,
    inference_timeout: Duration,
    locks: Mutex<HashMap<SessionId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChatOrchestrator {
    pub fn new(
        config: &TabulaConfig,
        registry: Arc<RoleRegistry>,
        store: Arc<dyn SessionStore>,
        library: Arc<dyn TabularLibrary>,
        inference: Arc<dyn InferenceService>,
    ) -> Self {
        let classifier = IntentClassifier::new(Arc::clone(&registry), config.routing.clone());
        let router = HandoffRouter::new(Arc::clone(&registry), classifier);
        let dispatcher = ToolDispatcher::new(Arc::clone(&registry), Arc::clone(&library));

        Self {
            config: config.chat.clone(),
            registry,
            router,
            dispatcher,
            library,
            conversation: ConversationManager::new(config.inference.context_turns),
            responses: ResponseGenerator::default(),
            store,
            inference,
            inference_timeout: Duration::from_millis(config.inference.timeout_ms),
            locks: Mutex::new(HashMap::new()),
        }
    }

    // =========================================================================
    // Sessions
    // =========================================================================

    /// Start a fresh session on the coordinator with no dataset.
    pub async fn open_session(&self) -> Result<SessionId, ChatError> {
        let session = Session::new(Uuid::new_v4(), self.registry.coordinator());
        self.store.create(&session).await?;
        info!(session_id = %session.id, "Opened session");
        Ok(session.id)
    }

    /// Current durable state of a session.
    pub async fn session(&self, session_id: SessionId) -> Result<Session, ChatError> {
        self.store
            .read(session_id)
            .await?
            .ok_or(ChatError::SessionNotFound(session_id))
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ChatError> {
        Ok(self.store.list().await?)
    }

    /// Evict a session and everything recorded for it.
    pub async fn end_session(&self, session_id: SessionId) -> Result<(), ChatError> {
        let lock = self.session_lock(session_id)?;
        let _guard = lock.lock().await;

        let removed = self.store.evict(session_id).await?;
        if let Ok(mut locks) = self.locks.lock() {
            locks.remove(&session_id);
        }
        if !removed {
            return Err(ChatError::SessionNotFound(session_id));
        }
        info!(session_id = %session_id, "Ended session");
        Ok(())
    }

    // =========================================================================
    // Roles and datasets
    // =========================================================================

    pub fn list_roles(&self) -> Vec<RoleName> {
        self.registry.list_roles()
    }

    /// Registered roles with personas and capabilities.
    pub fn roles(&self) -> &[Role] {
        self.registry.roles()
    }

    /// CSV files available in the data directory.
    pub fn available_datasets(&self) -> Result<Vec<String>, ChatError> {
        self.library
            .list_datasets()
            .map_err(|e| ChatError::Dataset(e.into()))
    }

    /// Load a dataset directly into a session, bypassing routing.
    ///
    /// On failure the session's dataset reference is left unchanged.
    pub async fn load_dataset(&self, session_id: SessionId, path: &Path) -> Result<DatasetRef, ChatError> {
        let lock = self.session_lock(session_id)?;
        let _guard = lock.lock().await;

        // Fail fast on unknown sessions before touching the file.
        self.session(session_id).await?;

        let output = self.dispatcher.load(path)?;
        let dataset = output
            .loaded
            .ok_or_else(|| ChatError::StorageError("load returned no dataset".to_string()))?;
        self.store.set_dataset(session_id, &dataset).await?;

        info!(
            session_id = %session_id,
            path = %dataset.path.display(),
            rows = dataset.row_count,
            columns = dataset.schema.len(),
            "Loaded dataset"
        );
        Ok(dataset)
    }

    // =========================================================================
    // Turns
    // =========================================================================

    /// Handle one user utterance end to end.
    pub async fn submit_turn(&self, session_id: SessionId, utterance: &str) -> Result<TurnReply, ChatError> {
        self.guard_input(utterance)?;

        let lock = self.session_lock(session_id)?;
        let _guard = lock.lock().await;

        let mut session = self.session(session_id).await?;
        let route = self.router.route(&mut session, utterance);
        let role = self
            .registry
            .get(route.resolved)
            .map_err(|_| ChatError::UnknownRole(route.resolved.to_string()))?;

        let mut request =
            self.conversation
                .build_request(&session, role, utterance, &route.inferred_tools);

        let plan = self.bounded("plan", self.inference.plan(&request)).await?;

        let mut invocations: Vec<ToolInvocation> = Vec::new();
        let body = match plan {
            InferencePlan::Answer(text) => text,
            InferencePlan::UseTools(calls) => {
                for call in calls {
                    invocations.push(self.run_tool(&mut session, call).await);
                }
                request.dataset = session.dataset.clone();
                self.bounded("synthesize", self.inference.synthesize(&request, &invocations))
                    .await?
            }
        };

        let mut answer = self.responses.compose(&TurnSummary {
            role: route.resolved,
            handoff: route.handoff_occurred,
            body: &body,
            invocations: &invocations,
            capability_gap: &route.capability_gap,
            dataset: session.dataset.as_ref(),
        });

        let recorded: Vec<ToolInvocation> = invocations
            .iter()
            .filter(|inv| !matches!(inv.outcome, Err(ToolErrorKind::CapabilityViolation { .. })))
            .cloned()
            .collect();

        let turn = Turn {
            index: session.next_index(),
            role: route.resolved,
            user_text: utterance.to_string(),
            assistant_text: answer.clone(),
            tool_invocations: recorded,
            handoff_from: route.handoff_from,
            created_at: Timestamp::now(),
        };

        let persisted = match self.store.append(session_id, &turn).await {
            Ok(()) => true,
            Err(TabulaError::SessionNotFound(id)) => return Err(ChatError::SessionNotFound(id)),
            Err(e) => {
                error!(session_id = %session_id, turn = turn.index, error = %e, "Failed to persist turn");
                answer.push_str("\n\n");
                answer.push_str(PERSISTENCE_WARNING);
                false
            }
        };

        debug!(
            session_id = %session_id,
            role = %route.resolved,
            handoff = route.handoff_occurred,
            tools = invocations.len(),
            persisted,
            "Turn complete"
        );

        Ok(TurnReply {
            session_id,
            answer,
            role: route.resolved,
            handoff_from: route.handoff_from,
            tool_invocations: invocations,
            persisted,
        })
    }

    // -- Private helpers --

    fn guard_input(&self, utterance: &str) -> Result<(), ChatError> {
        if !self.config.enabled {
            return Err(ChatError::Disabled);
        }
        if utterance.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if utterance.chars().count() > self.config.max_message_length {
            return Err(ChatError::MessageTooLong(self.config.max_message_length));
        }
        Ok(())
    }

    fn session_lock(&self, session_id: SessionId) -> Result<Arc<tokio::sync::Mutex<()>>, ChatError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| ChatError::StorageError(format!("session lock table poisoned: {}", e)))?;
        // Entries held only by the table belong to no in-flight call.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        Ok(Arc::clone(locks.entry(session_id).or_default()))
    }

    /// Run one proposed call and record its outcome. A successful load
    /// replaces the session's dataset, durably first.
    async fn run_tool(&self, session: &mut Session, call: ToolCall) -> ToolInvocation {
        let outcome = match self.dispatcher.invoke(session, &call) {
            Ok(output) => match output.loaded {
                Some(dataset) => match self.store.set_dataset(session.id, &dataset).await {
                    Ok(()) => {
                        session.dataset = Some(dataset);
                        Ok(output.value)
                    }
                    Err(e) => {
                        warn!(session_id = %session.id, error = %e, "Could not attach loaded dataset");
                        Err(ToolErrorKind::AnalysisFailed {
                            message: format!("the dataset could not be attached to this session ({})", e),
                        })
                    }
                },
                None => Ok(output.value),
            },
            Err(err @ ToolErrorKind::CapabilityViolation { .. }) => {
                error!(session_id = %session.id, error = %err, "Rejected tool call outside role capabilities");
                Err(err)
            }
            Err(err) => {
                debug!(session_id = %session.id, tool = %call.name, error = %err, "Tool call failed");
                Err(err)
            }
        };

        ToolInvocation {
            name: call.name,
            args: call.args,
            outcome,
        }
    }

    /// Bound an inference call by the configured timeout.
    async fn bounded<T>(
        &self,
        stage: &'static str,
        call: impl Future<Output = Result<T, ChatError>>,
    ) -> Result<T, ChatError> {
        match tokio::time::timeout(self.inference_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(ChatError::UpstreamInferenceFailure(reason))) => {
                warn!(stage, reason = %reason, "Inference failed");
                Err(ChatError::UpstreamInferenceFailure(reason))
            }
            Ok(Err(e)) => {
                warn!(stage, error = %e, "Inference failed");
                Err(ChatError::UpstreamInferenceFailure(e.to_string()))
            }
            Err(_) => {
                let ms = self.inference_timeout.as_millis();
                warn!(stage, timeout_ms = ms as u64, "Inference timed out");
                Err(ChatError::UpstreamInferenceFailure(format!(
                    "{} timed out after {} ms",
                    stage, ms
                )))
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
