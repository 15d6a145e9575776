use super::optimistic::Optimistic;
use super::report::{ExecutionMarker, ExecutionReport};
use crate::api::{
    ActivateResponse, ApiError, Decision, DecisionRequest, DecisionResponse, FlowRecord,
    PlannerApi,
};
use crate::plan::types::ExecutionPlan;
use crate::shared::ids::{ConversationId, FlowId};
use crate::shared::logging::EventLog;
use serde_json::json;
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LifecycleAction {
    Save,
    /// Both activation and deactivation.
    Activate,
    Execute,
}

impl LifecycleAction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Activate => "activate",
            Self::Execute => "execute",
        }
    }
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("cannot {action}: there is no execution plan yet")]
    EmptyPlan { action: LifecycleAction },
    #[error("cannot {action}: no conversation is active")]
    NoConversation { action: LifecycleAction },
    #[error("cannot change activation: the workflow has not been saved")]
    NotSaved,
    #[error("a {0} request is already in progress")]
    AlreadyInFlight(LifecycleAction),
    #[error("save response did not include a flow id")]
    MissingFlowId,
    #[error("{action} request failed: {source}")]
    Api {
        action: LifecycleAction,
        #[source]
        source: ApiError,
    },
}

impl LifecycleError {
    /// Validation failures are decided locally and never reach the network.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::EmptyPlan { .. }
                | Self::NoConversation { .. }
                | Self::NotSaved
                | Self::AlreadyInFlight(_)
        )
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Api { source, .. } => source.is_retryable(),
            _ => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::EmptyPlan { action } => {
                format!("There is no workflow plan to {action} yet. Describe the automation first.")
            }
            Self::NoConversation { action } => {
                format!("Start a conversation before trying to {action} a workflow.")
            }
            Self::NotSaved => "Save the workflow before activating it.".to_string(),
            Self::AlreadyInFlight(action) => {
                format!("The previous {action} request is still running.")
            }
            Self::MissingFlowId => {
                "The workflow service did not confirm the save. Try saving again.".to_string()
            }
            Self::Api { source, .. } => source.user_message(),
        }
    }
}

/// Which lifecycle buttons are enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ActionAvailability {
    pub save: bool,
    pub activate: bool,
    pub execute: bool,
}

impl ActionAvailability {
    pub fn all_enabled(&self) -> bool {
        self.save && self.activate && self.execute
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleSnapshot {
    pub flow_id: Option<FlowId>,
    /// Shown activation state, including an unconfirmed request.
    pub active: bool,
    pub activation_pending: bool,
    pub in_flight: Vec<LifecycleAction>,
    pub last_execution: Option<ExecutionMarker>,
}

/// Save, activate and execute against the current plan. Each operation is split into
/// `prepare_*` (guards, optimistic effects) and `settle_*` (server result); settle always
/// releases the in-flight slot taken by prepare.
#[derive(Debug)]
pub struct LifecycleController {
    flow_id: Option<FlowId>,
    active: Optimistic<bool>,
    in_flight: BTreeSet<LifecycleAction>,
    pending_execution: Option<String>,
    last_execution: Option<ExecutionMarker>,
    log: EventLog,
}

impl LifecycleController {
    pub fn new(log: EventLog) -> Self {
        Self {
            flow_id: None,
            active: Optimistic::new(false),
            in_flight: BTreeSet::new(),
            pending_execution: None,
            last_execution: None,
            log,
        }
    }

    pub fn flow_id(&self) -> Option<&FlowId> {
        self.flow_id.as_ref()
    }

    pub fn is_active(&self) -> bool {
        *self.active.shown()
    }

    pub fn activation(&self) -> &Optimistic<bool> {
        &self.active
    }

    pub fn last_execution(&self) -> Option<&ExecutionMarker> {
        self.last_execution.as_ref()
    }

    pub fn is_in_flight(&self, action: LifecycleAction) -> bool {
        self.in_flight.contains(&action)
    }

    pub fn availability(&self, plan: Option<&ExecutionPlan>) -> ActionAvailability {
        let has_plan = plan.is_some_and(|plan| !plan.is_empty());
        ActionAvailability {
            save: has_plan && !self.is_in_flight(LifecycleAction::Save),
            activate: has_plan && !self.is_in_flight(LifecycleAction::Activate),
            execute: has_plan && !self.is_in_flight(LifecycleAction::Execute),
        }
    }

    pub fn snapshot(&self) -> LifecycleSnapshot {
        LifecycleSnapshot {
            flow_id: self.flow_id.clone(),
            active: *self.active.shown(),
            activation_pending: self.active.is_pending(),
            in_flight: self.in_flight.iter().copied().collect(),
            last_execution: self.last_execution.clone(),
        }
    }

    /// Forgets everything; used when switching conversations.
    pub fn reset(&mut self) {
        self.flow_id = None;
        self.active.reset(false);
        self.in_flight.clear();
        self.pending_execution = None;
        self.last_execution = None;
    }

    /// Adopts a flow id known from the local cache, before the server confirms it.
    pub fn restore_flow_id(&mut self, flow_id: FlowId) {
        self.flow_id = Some(flow_id);
    }

    /// Adopts the last run recorded for this conversation's plan.
    pub fn restore_execution(&mut self, marker: ExecutionMarker) {
        self.last_execution = Some(marker);
    }

    /// Applies the authoritative flow record. `None` means the server has no flow for the
    /// conversation, which overrides any locally remembered id.
    pub fn reconcile(&mut self, record: Option<&FlowRecord>) {
        match record {
            Some(record) => {
                self.flow_id = Some(record.flow_id.clone());
                self.active.reset(record.is_active);
            }
            None => {
                self.flow_id = None;
                self.active.reset(false);
            }
        }
    }

    pub fn prepare_save(
        &mut self,
        conversation_id: Option<&ConversationId>,
        plan: Option<&ExecutionPlan>,
    ) -> Result<DecisionRequest, LifecycleError> {
        let request =
            self.decision_request(LifecycleAction::Save, Decision::Save, conversation_id, plan)?;
        self.take_slot(LifecycleAction::Save)?;
        Ok(request)
    }

    pub fn settle_save(
        &mut self,
        result: Result<DecisionResponse, ApiError>,
    ) -> Result<FlowId, LifecycleError> {
        self.in_flight.remove(&LifecycleAction::Save);
        let response = result.map_err(|source| self.failed(LifecycleAction::Save, source))?;
        let flow_id = match (response.flow_id, self.flow_id.clone()) {
            (Some(flow_id), _) => flow_id,
            (None, Some(known)) => known,
            (None, None) => {
                self.log.error("lifecycle.save.missing_flow_id", &[]);
                return Err(LifecycleError::MissingFlowId);
            }
        };
        if let Some(previous) = self.flow_id.as_ref().filter(|known| **known != flow_id) {
            self.log.warn(
                "lifecycle.save.flow_changed",
                &[
                    ("previous", json!(previous.as_str())),
                    ("flow_id", json!(flow_id.as_str())),
                ],
            );
        }
        if let Some(is_active) = response.is_active {
            self.active.reset(is_active);
        }
        self.flow_id = Some(flow_id.clone());
        self.log.info(
            "lifecycle.save.committed",
            &[("flow_id", json!(flow_id.as_str()))],
        );
        Ok(flow_id)
    }

    /// Flips the shown activation state before the request is sent.
    pub fn prepare_activate(&mut self, desired: bool) -> Result<FlowId, LifecycleError> {
        if self.is_in_flight(LifecycleAction::Activate) {
            return Err(LifecycleError::AlreadyInFlight(LifecycleAction::Activate));
        }
        let Some(flow_id) = self.flow_id.clone() else {
            self.log.warn("lifecycle.activate.rejected", &[("reason", json!("not_saved"))]);
            return Err(LifecycleError::NotSaved);
        };
        self.active
            .begin(desired)
            .map_err(|_| LifecycleError::AlreadyInFlight(LifecycleAction::Activate))?;
        self.in_flight.insert(LifecycleAction::Activate);
        self.log.info(
            "lifecycle.activate.started",
            &[
                ("flow_id", json!(flow_id.as_str())),
                ("desired", json!(desired)),
            ],
        );
        Ok(flow_id)
    }

    pub fn settle_activate(
        &mut self,
        result: Result<ActivateResponse, ApiError>,
    ) -> Result<bool, LifecycleError> {
        self.in_flight.remove(&LifecycleAction::Activate);
        match result {
            Ok(response) => {
                if response.is_active != *self.active.shown() {
                    self.log.warn(
                        "lifecycle.activate.normalized",
                        &[
                            ("requested", json!(*self.active.shown())),
                            ("confirmed", json!(response.is_active)),
                        ],
                    );
                }
                self.active.commit(response.is_active);
                self.log.info(
                    "lifecycle.activate.committed",
                    &[("is_active", json!(response.is_active))],
                );
                Ok(response.is_active)
            }
            Err(source) => {
                self.active.roll_back();
                self.log.warn(
                    "lifecycle.activate.rolled_back",
                    &[("restored", json!(*self.active.shown()))],
                );
                Err(self.failed(LifecycleAction::Activate, source))
            }
        }
    }

    /// Execution does not require a saved flow.
    pub fn prepare_execute(
        &mut self,
        conversation_id: Option<&ConversationId>,
        plan: Option<&ExecutionPlan>,
    ) -> Result<DecisionRequest, LifecycleError> {
        let request = self.decision_request(
            LifecycleAction::Execute,
            Decision::Execute,
            conversation_id,
            plan,
        )?;
        self.take_slot(LifecycleAction::Execute)?;
        self.pending_execution = Some(request.execution_plan.fingerprint());
        Ok(request)
    }

    pub fn settle_execute(
        &mut self,
        result: Result<DecisionResponse, ApiError>,
        now_millis: i64,
    ) -> Result<ExecutionReport, LifecycleError> {
        self.in_flight.remove(&LifecycleAction::Execute);
        let fingerprint = self.pending_execution.take();
        let response = result.map_err(|source| self.failed(LifecycleAction::Execute, source))?;
        let report = ExecutionReport::from_steps(response.steps.unwrap_or_default());
        if let Some(plan_fingerprint) = fingerprint {
            self.last_execution = Some(ExecutionMarker {
                plan_fingerprint,
                outcome: report.outcome,
                finished_at: now_millis,
            });
        }
        self.log.info(
            "lifecycle.execute.finished",
            &[
                ("outcome", json!(report.outcome)),
                ("steps", json!(report.steps.len())),
                ("succeeded", json!(report.succeeded())),
            ],
        );
        Ok(report)
    }

    pub fn save(
        &mut self,
        api: &dyn PlannerApi,
        conversation_id: Option<&ConversationId>,
        plan: Option<&ExecutionPlan>,
    ) -> Result<FlowId, LifecycleError> {
        let request = self.prepare_save(conversation_id, plan)?;
        let result = api.lifecycle_decision(&request);
        self.settle_save(result)
    }

    pub fn set_active(
        &mut self,
        api: &dyn PlannerApi,
        desired: bool,
    ) -> Result<bool, LifecycleError> {
        let flow_id = self.prepare_activate(desired)?;
        let result = api.flow_activate(&flow_id, desired);
        self.settle_activate(result)
    }

    pub fn activate(&mut self, api: &dyn PlannerApi) -> Result<bool, LifecycleError> {
        self.set_active(api, true)
    }

    pub fn deactivate(&mut self, api: &dyn PlannerApi) -> Result<bool, LifecycleError> {
        self.set_active(api, false)
    }

    pub fn execute(
        &mut self,
        api: &dyn PlannerApi,
        conversation_id: Option<&ConversationId>,
        plan: Option<&ExecutionPlan>,
        now_millis: i64,
    ) -> Result<ExecutionReport, LifecycleError> {
        let request = self.prepare_execute(conversation_id, plan)?;
        let result = api.lifecycle_decision(&request);
        self.settle_execute(result, now_millis)
    }

    fn decision_request(
        &self,
        action: LifecycleAction,
        decision: Decision,
        conversation_id: Option<&ConversationId>,
        plan: Option<&ExecutionPlan>,
    ) -> Result<DecisionRequest, LifecycleError> {
        if self.is_in_flight(action) {
            return Err(LifecycleError::AlreadyInFlight(action));
        }
        let Some(plan) = plan.filter(|plan| !plan.is_empty()) else {
            self.log.warn(
                "lifecycle.rejected",
                &[("action", json!(action.as_str())), ("reason", json!("empty_plan"))],
            );
            return Err(LifecycleError::EmptyPlan { action });
        };
        let Some(conversation_id) = conversation_id else {
            return Err(LifecycleError::NoConversation { action });
        };
        Ok(DecisionRequest {
            decision,
            conversation_id: conversation_id.clone(),
            execution_plan: plan.clone(),
        })
    }

    fn take_slot(&mut self, action: LifecycleAction) -> Result<(), LifecycleError> {
        if !self.in_flight.insert(action) {
            return Err(LifecycleError::AlreadyInFlight(action));
        }
        self.log.info("lifecycle.started", &[("action", json!(action.as_str()))]);
        Ok(())
    }

    fn failed(&self, action: LifecycleAction, source: ApiError) -> LifecycleError {
        self.log.error(
            "lifecycle.failed",
            &[
                ("action", json!(action.as_str())),
                ("error", json!(source.to_string())),
            ],
        );
        LifecycleError::Api { action, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::report::{ExecutionOutcome, StepResult, StepStatus};
    use crate::plan::types::fixtures::two_step_plan;

    fn conversation() -> ConversationId {
        ConversationId::parse("conv-1").expect("id")
    }

    fn controller() -> LifecycleController {
        LifecycleController::new(EventLog::disabled())
    }

    fn step_result(status: StepStatus) -> StepResult {
        StepResult {
            step_id: None,
            node_id: None,
            action_id: None,
            name: None,
            status,
            output: None,
            error: None,
            duration_ms: Some(10),
        }
    }

    #[test]
    fn availability_requires_a_plan_and_a_free_slot() {
        let mut lifecycle = controller();
        assert_eq!(lifecycle.availability(None), ActionAvailability::default());

        let plan = two_step_plan();
        assert!(lifecycle.availability(Some(&plan)).all_enabled());

        let conv = conversation();
        lifecycle
            .prepare_save(Some(&conv), Some(&plan))
            .expect("prepare save");
        let availability = lifecycle.availability(Some(&plan));
        assert!(!availability.save);
        assert!(availability.activate && availability.execute);
        assert!(matches!(
            lifecycle.prepare_save(Some(&conv), Some(&plan)),
            Err(LifecycleError::AlreadyInFlight(LifecycleAction::Save))
        ));

        lifecycle
            .settle_save(Err(ApiError::Transport("reset".to_string())))
            .expect_err("transport failure");
        assert!(lifecycle.availability(Some(&plan)).save);
    }

    #[test]
    fn empty_plan_is_rejected_before_the_network() {
        let mut lifecycle = controller();
        let err = lifecycle
            .prepare_execute(Some(&conversation()), Some(&ExecutionPlan::default()))
            .expect_err("empty");
        assert!(err.is_validation());
        assert!(lifecycle.snapshot().in_flight.is_empty());
    }

    #[test]
    fn activate_without_flow_id_is_rejected() {
        let mut lifecycle = controller();
        let err = lifecycle.prepare_activate(true).expect_err("not saved");
        assert!(matches!(err, LifecycleError::NotSaved));
        assert!(!lifecycle.is_active());
    }

    #[test]
    fn failed_activation_rolls_back_the_optimistic_flip() {
        let mut lifecycle = controller();
        lifecycle.restore_flow_id(FlowId::parse("flow-9").expect("flow"));
        lifecycle.prepare_activate(true).expect("prepare");
        assert!(lifecycle.is_active());
        assert!(lifecycle.snapshot().activation_pending);

        let err = lifecycle
            .settle_activate(Err(ApiError::Status {
                status: 503,
                body: String::new(),
            }))
            .expect_err("server error");
        assert!(err.is_retryable());
        assert!(!lifecycle.is_active());
        assert_eq!(lifecycle.activation(), &Optimistic::RolledBack(false));
    }

    #[test]
    fn activation_commits_the_server_value() {
        let mut lifecycle = controller();
        lifecycle.restore_flow_id(FlowId::parse("flow-9").expect("flow"));
        lifecycle.prepare_activate(true).expect("prepare");
        let confirmed = lifecycle
            .settle_activate(Ok(ActivateResponse { is_active: false }))
            .expect("settled");
        assert!(!confirmed);
        assert_eq!(lifecycle.activation(), &Optimistic::Committed(false));
    }

    #[test]
    fn save_keeps_known_flow_id_when_response_omits_it() {
        let mut lifecycle = controller();
        lifecycle.restore_flow_id(FlowId::parse("flow-1").expect("flow"));
        let plan = two_step_plan();
        lifecycle
            .prepare_save(Some(&conversation()), Some(&plan))
            .expect("prepare");
        let flow_id = lifecycle
            .settle_save(Ok(DecisionResponse::default()))
            .expect("save");
        assert_eq!(flow_id.as_str(), "flow-1");
    }

    #[test]
    fn execute_records_partial_outcome_against_plan_fingerprint() {
        let mut lifecycle = controller();
        let plan = two_step_plan();
        let request = lifecycle
            .prepare_execute(Some(&conversation()), Some(&plan))
            .expect("prepare");
        assert_eq!(request.decision, Decision::Execute);

        let report = lifecycle
            .settle_execute(
                Ok(DecisionResponse {
                    flow_id: None,
                    is_active: None,
                    steps: Some(vec![
                        step_result(StepStatus::Success),
                        step_result(StepStatus::Failed),
                    ]),
                }),
                1_000,
            )
            .expect("report");
        assert_eq!(report.outcome, ExecutionOutcome::Partial);
        let marker = lifecycle.last_execution().expect("marker");
        assert_eq!(marker.plan_fingerprint, plan.fingerprint());
        assert_eq!(marker.finished_at, 1_000);
    }

    #[test]
    fn reconcile_with_missing_record_clears_flow_state() {
        let mut lifecycle = controller();
        lifecycle.restore_flow_id(FlowId::parse("flow-1").expect("flow"));
        lifecycle.reconcile(None);
        assert!(lifecycle.flow_id().is_none());

        lifecycle.reconcile(Some(&FlowRecord {
            flow_id: FlowId::parse("flow-2").expect("flow"),
            is_active: true,
            conversation_id: Some(conversation()),
        }));
        assert_eq!(lifecycle.flow_id().map(FlowId::as_str), Some("flow-2"));
        assert!(lifecycle.is_active());
    }
}
