pub mod error;
pub mod http;
pub mod types;

pub use error::ApiError;
pub use http::HttpPlannerApi;
pub use types::{
    ActivateRequest, ActivateResponse, Decision, DecisionRequest, DecisionResponse, FlowRecord,
    HistoryEntry, TurnRequest, TurnResponse,
};

use crate::shared::ids::{ConversationId, FlowId};

/// The remote planner service, as consumed by the session orchestrator.
pub trait PlannerApi {
    fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, ApiError>;

    fn lifecycle_decision(&self, request: &DecisionRequest) -> Result<DecisionResponse, ApiError>;

    fn flow_activate(&self, flow_id: &FlowId, is_active: bool) -> Result<ActivateResponse, ApiError>;

    /// `Ok(None)` when the conversation has no saved flow.
    fn flow_lookup_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<FlowRecord>, ApiError>;
}

impl<T: PlannerApi + ?Sized> PlannerApi for &T {
    fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, ApiError> {
        (**self).send_turn(request)
    }

    fn lifecycle_decision(&self, request: &DecisionRequest) -> Result<DecisionResponse, ApiError> {
        (**self).lifecycle_decision(request)
    }

    fn flow_activate(&self, flow_id: &FlowId, is_active: bool) -> Result<ActivateResponse, ApiError> {
        (**self).flow_activate(flow_id, is_active)
    }

    fn flow_lookup_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<FlowRecord>, ApiError> {
        (**self).flow_lookup_by_conversation(conversation_id)
    }
}
