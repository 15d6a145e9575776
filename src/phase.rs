use crate::lifecycle::report::ExecutionMarker;
use crate::plan::types::ExecutionPlan;
use crate::session::message::{latest_qualifying_metadata, Message, TurnStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AwaitedInput {
    OAuth,
    Form,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Empty,
    AwaitingInput(AwaitedInput),
    ReadyForReview,
    Saved,
    Activated,
    Executed,
    Error,
}

impl SessionPhase {
    pub fn label(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::AwaitingInput(AwaitedInput::OAuth) => "awaiting authorization",
            Self::AwaitingInput(AwaitedInput::Form) => "awaiting parameters",
            Self::ReadyForReview => "ready for review",
            Self::Saved => "saved",
            Self::Activated => "activated",
            Self::Executed => "executed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The flow as the session knows it: server record, or the confirmed local state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowState {
    pub is_active: bool,
}

/// Everything phase depends on. Nothing else is consulted.
#[derive(Debug, Clone, Copy)]
pub struct PhaseInputs<'a> {
    pub messages: &'a [Message],
    pub plan: Option<&'a ExecutionPlan>,
    pub flow: Option<FlowState>,
    pub last_execution: Option<&'a ExecutionMarker>,
    pub turn_failed: bool,
}

pub fn derive_phase(inputs: PhaseInputs<'_>) -> SessionPhase {
    if inputs.messages.is_empty() {
        return SessionPhase::Empty;
    }
    if inputs.turn_failed {
        return SessionPhase::Error;
    }
    if let Some(metadata) = latest_qualifying_metadata(inputs.messages) {
        if metadata.status == Some(TurnStatus::Error) {
            return SessionPhase::Error;
        }
        if metadata.needs_authorization() {
            return SessionPhase::AwaitingInput(AwaitedInput::OAuth);
        }
        if metadata.needs_form() {
            return SessionPhase::AwaitingInput(AwaitedInput::Form);
        }
    }
    let Some(plan) = inputs.plan.filter(|plan| !plan.is_empty()) else {
        return SessionPhase::Empty;
    };
    // Required parameters still unset block review even without a form in the response.
    if plan.has_missing_parameters() {
        return SessionPhase::AwaitingInput(AwaitedInput::Form);
    }
    if inputs
        .last_execution
        .is_some_and(|marker| marker.plan_fingerprint == plan.fingerprint())
    {
        return SessionPhase::Executed;
    }
    match inputs.flow {
        Some(FlowState { is_active: true }) => SessionPhase::Activated,
        Some(FlowState { is_active: false }) => SessionPhase::Saved,
        None => SessionPhase::ReadyForReview,
    }
}
