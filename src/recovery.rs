use crate::api::{ApiError, FlowRecord, PlannerApi};
use crate::lifecycle::controller::LifecycleController;
use crate::phase::{derive_phase, FlowState, PhaseInputs, SessionPhase};
use crate::plan::tracker::{PlanSource, PlanTracker};
use crate::session::error::SessionError;
use crate::session::message::{Message, Notice};
use crate::session::transcript::Transcript;
use crate::shared::ids::ConversationId;
use crate::shared::logging::EventLog;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("failed to load conversation `{conversation_id}`: {source}")]
    Transcript {
        conversation_id: String,
        #[source]
        source: SessionError,
    },
}

impl RecoveryError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Transcript { source, .. } => source.user_message(),
        }
    }
}

pub fn load_messages(
    transcript: &Transcript,
    conversation_id: &ConversationId,
) -> Result<Vec<Message>, RecoveryError> {
    transcript
        .load(conversation_id)
        .map_err(|source| RecoveryError::Transcript {
            conversation_id: conversation_id.to_string(),
            source,
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverySource {
    /// No messages: any cached plan was discarded.
    Fresh,
    Cache,
    Messages,
    /// Messages exist but none carried a plan.
    NoPlan,
}

impl RecoverySource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::Cache => "cache",
            Self::Messages => "messages",
            Self::NoPlan => "no_plan",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlowLookup {
    Found(FlowRecord),
    NotFound,
    /// The lookup failed; locally known flow state was kept.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveredSession {
    pub conversation_id: ConversationId,
    pub source: RecoverySource,
    pub flow: FlowLookup,
    pub phase: SessionPhase,
    pub notices: Vec<Notice>,
}

/// Restores passive state for a conversation being (re)entered: plan from cache or
/// history, then flow id and active flag from the server. Never starts an interaction.
pub fn recover_session(
    conversation_id: &ConversationId,
    messages: &[Message],
    tracker: &mut PlanTracker,
    lifecycle: &mut LifecycleController,
    api: &dyn PlannerApi,
    log: &EventLog,
    now_millis: i64,
) -> RecoveredSession {
    lifecycle.reset();
    let source = match tracker.enter_conversation(conversation_id, messages) {
        _ if messages.is_empty() => RecoverySource::Fresh,
        Some(PlanSource::Cache) => RecoverySource::Cache,
        Some(PlanSource::Messages) => RecoverySource::Messages,
        None => RecoverySource::NoPlan,
    };
    let cached_flow_id = tracker.current().and_then(|tracked| tracked.flow_id.clone());
    if let Some(flow_id) = cached_flow_id.clone() {
        lifecycle.restore_flow_id(flow_id);
    }
    if let Some(marker) = tracker
        .current()
        .and_then(|tracked| tracked.last_execution.clone())
    {
        lifecycle.restore_execution(marker);
    }

    let mut notices = Vec::new();
    let flow = match api.flow_lookup_by_conversation(conversation_id) {
        Ok(Some(record)) => {
            lifecycle.reconcile(Some(&record));
            if cached_flow_id.as_ref() != Some(&record.flow_id) {
                tracker.record_flow_id(Some(record.flow_id.clone()), now_millis);
            }
            FlowLookup::Found(record)
        }
        Ok(None) => {
            lifecycle.reconcile(None);
            if cached_flow_id.is_some() {
                tracker.record_flow_id(None, now_millis);
            }
            FlowLookup::NotFound
        }
        Err(err) => {
            log.warn(
                "recovery.flow_lookup_failed",
                &[
                    ("conversation_id", json!(conversation_id.as_str())),
                    ("error", json!(err.to_string())),
                ],
            );
            notices.push(lookup_notice(&err));
            FlowLookup::Unavailable
        }
    };

    let flow_state = lifecycle.flow_id().map(|_| FlowState {
        is_active: *lifecycle.activation().confirmed(),
    });
    let phase = derive_phase(PhaseInputs {
        messages,
        plan: tracker.plan(),
        flow: flow_state,
        last_execution: lifecycle.last_execution(),
        turn_failed: false,
    });
    log.info(
        "recovery.completed",
        &[
            ("conversation_id", json!(conversation_id.as_str())),
            ("source", json!(source.as_str())),
            ("phase", json!(phase.label())),
        ],
    );
    RecoveredSession {
        conversation_id: conversation_id.clone(),
        source,
        flow,
        phase,
        notices,
    }
}

fn lookup_notice(err: &ApiError) -> Notice {
    Notice::error(
        format!(
            "Could not confirm the saved workflow state. {}",
            err.user_message()
        ),
        err.is_retryable(),
    )
}
