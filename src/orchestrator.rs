use crate::api::{ApiError, PlannerApi, TurnRequest, TurnResponse};
use crate::config::{bootstrap_state_root, ConfigError, Settings, StatePaths};
use crate::interaction::{
    CoordinatorState, InteractionCoordinator, InteractionHost, InteractionKind, OAuthSettings,
    ObserveReport,
};
use crate::lifecycle::{
    ActionAvailability, ExecutionOutcome, ExecutionReport, LifecycleController, LifecycleError,
    LifecycleSnapshot,
};
use crate::phase::{derive_phase, FlowState, PhaseInputs, SessionPhase};
use crate::plan::{AdoptReport, ExecutionPlan, PlanCache, PlanTracker};
use crate::recovery::{load_messages, recover_session, RecoveredSession, RecoveryError};
use crate::session::{
    latest_qualifying_metadata, Message, MessageKind, Notice, SessionError, SessionStore,
    StoreLimits, Transcript,
};
use crate::shared::clock::{Clock, SystemClock};
use crate::shared::ids::{ConversationId, FlowId};
use crate::shared::logging::EventLog;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

/// Upper bound on interactions handled by one `drive_interactions` call.
const MAX_INTERACTION_ROUNDS: usize = 8;

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub state_root: PathBuf,
    pub limits: StoreLimits,
    pub oauth: OAuthSettings,
}

impl SessionOptions {
    pub fn from_settings(settings: &Settings) -> Result<Self, ConfigError> {
        let paths = settings.state_paths()?;
        Ok(Self {
            state_root: paths.root,
            limits: StoreLimits {
                duplicate_window_ms: settings.duplicate_window().as_millis() as i64,
                history_limit: settings.session.planner_history_limit,
            },
            oauth: OAuthSettings::from(&settings.oauth),
        })
    }
}

/// Result of one planner turn.
#[derive(Debug, Clone, PartialEq)]
pub struct TurnOutcome {
    pub reply: Message,
    pub plan: Option<AdoptReport>,
    pub queued: Vec<InteractionKind>,
    /// Services the planner asked for again right after authorization.
    pub repeated_authorization: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriveReport {
    pub turns: Vec<TurnOutcome>,
    pub notices: Vec<Notice>,
    /// Set when a continuation could not be delivered; it is not retried automatically.
    pub failed: Option<Notice>,
}

/// One workflow-authoring session. All call sites go through this type; it owns the
/// message store, the plan tracker, the interaction coordinator and the lifecycle
/// controller for whichever conversation is active.
pub struct WorkflowSession<A: PlannerApi> {
    api: A,
    clock: Arc<dyn Clock>,
    store: SessionStore,
    tracker: PlanTracker,
    coordinator: InteractionCoordinator,
    lifecycle: LifecycleController,
    transcript: Transcript,
    log: EventLog,
}

impl<A: PlannerApi> WorkflowSession<A> {
    pub fn new(api: A, options: SessionOptions, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let paths = StatePaths::new(options.state_root);
        bootstrap_state_root(&paths)?;
        let log = EventLog::new(paths.session_log_path());
        Ok(Self {
            api,
            clock,
            store: SessionStore::new(options.limits, log.clone()),
            tracker: PlanTracker::new(
                PlanCache::new(paths.plans_dir(), log.clone()),
                log.clone(),
            ),
            coordinator: InteractionCoordinator::new(options.oauth, log.clone()),
            lifecycle: LifecycleController::new(log.clone()),
            transcript: Transcript::new(paths.conversations_dir()),
            log,
        })
    }

    pub fn from_settings(api: A, settings: &Settings) -> Result<Self, ConfigError> {
        Self::new(api, SessionOptions::from_settings(settings)?, Arc::new(SystemClock))
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.store.active_conversation()
    }

    pub fn messages(&self) -> &[Message] {
        self.store.messages()
    }

    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.tracker.plan()
    }

    pub fn flow_id(&self) -> Option<&FlowId> {
        self.lifecycle.flow_id()
    }

    pub fn is_loading(&self) -> bool {
        self.store.is_loading()
    }

    pub fn last_error(&self) -> Option<&Notice> {
        self.store.last_error()
    }

    pub fn interaction_state(&self) -> CoordinatorState {
        self.coordinator.state()
    }

    pub fn pending_interactions(&self) -> usize {
        self.coordinator.pending()
    }

    pub fn lifecycle(&self) -> LifecycleSnapshot {
        self.lifecycle.snapshot()
    }

    pub fn availability(&self) -> ActionAvailability {
        self.lifecycle.availability(self.tracker.plan())
    }

    pub fn phase(&self) -> SessionPhase {
        let flow = self.lifecycle.flow_id().map(|_| FlowState {
            is_active: *self.lifecycle.activation().confirmed(),
        });
        derive_phase(PhaseInputs {
            messages: self.store.messages(),
            plan: self.tracker.plan(),
            flow,
            last_execution: self.lifecycle.last_execution(),
            turn_failed: self.store.failed_turn().is_some(),
        })
    }

    /// Opens a stored conversation and restores its passive state.
    pub fn enter_conversation(
        &mut self,
        conversation_id: &ConversationId,
    ) -> Result<RecoveredSession, RecoveryError> {
        let messages = match self.store.messages_for(conversation_id) {
            Some(messages) => messages.to_vec(),
            None => load_messages(&self.transcript, conversation_id)?,
        };
        self.store.open(conversation_id, messages);
        self.coordinator.reset();
        let mut recovered = recover_session(
            conversation_id,
            self.store.messages(),
            &mut self.tracker,
            &mut self.lifecycle,
            &self.api,
            &self.log,
            self.clock.now_millis(),
        );
        // A turn left unanswered when the transcript was written reads as an error.
        recovered.phase = self.phase();
        Ok(recovered)
    }

    pub fn start_new_conversation(&mut self) {
        self.store.start_new();
        self.tracker.clear();
        self.coordinator.reset();
        self.lifecycle.reset();
    }

    pub fn send_user_message(&mut self, text: &str) -> Result<TurnOutcome, SessionError> {
        self.send_turn(text, MessageKind::Chat)
    }

    /// Resends the last failed turn once. Never called automatically.
    pub fn retry_last_turn(&mut self) -> Result<TurnOutcome, SessionError> {
        let request = self.store.begin_retry()?;
        self.dispatch(request)
    }

    /// Runs queued out-of-band interactions one at a time, sending each continuation as a
    /// turn. Stops when nothing is queued, the user backs out, or a continuation fails.
    pub fn drive_interactions(&mut self, host: &mut dyn InteractionHost) -> DriveReport {
        let mut report = DriveReport::default();
        for _ in 0..MAX_INTERACTION_ROUNDS {
            let Some(conversation_id) = self.store.active_conversation().cloned() else {
                break;
            };
            let Some(interaction) = self.coordinator.next_interaction() else {
                break;
            };
            let result = self.coordinator.run(&conversation_id, &interaction, host);
            for notice in result.notices {
                self.store.push_feedback(notice.clone(), self.clock.now_millis());
                report.notices.push(notice);
            }
            self.persist();
            let Some(continuation) = result.continuation else {
                break;
            };
            match self.send_turn(&continuation.text, continuation.message_kind) {
                Ok(outcome) => report.turns.push(outcome),
                Err(err) => {
                    self.coordinator.reset();
                    self.log.warn(
                        "interaction.resubmit_failed",
                        &[("error", json!(err.to_string()))],
                    );
                    report.failed = Some(
                        self.store
                            .last_error()
                            .cloned()
                            .unwrap_or_else(|| Notice::error(err.user_message(), err.is_retryable())),
                    );
                    break;
                }
            }
        }
        report
    }

    /// Explicit user request to reopen whatever the latest response is blocked on.
    pub fn resume_pending_interaction(&mut self) -> ObserveReport {
        match latest_qualifying_metadata(self.store.messages()) {
            Some(metadata) => {
                let metadata = metadata.clone();
                self.coordinator.resume_from(&metadata)
            }
            None => ObserveReport::default(),
        }
    }

    pub fn save(&mut self) -> Result<FlowId, LifecycleError> {
        let result = self.lifecycle.save(
            &self.api,
            self.store.active_conversation(),
            self.tracker.plan(),
        );
        match result {
            Ok(flow_id) => {
                self.tracker
                    .record_flow_id(Some(flow_id.clone()), self.clock.now_millis());
                Ok(flow_id)
            }
            Err(err) => Err(self.surface(err)),
        }
    }

    pub fn activate(&mut self) -> Result<bool, LifecycleError> {
        let result = self.lifecycle.activate(&self.api);
        result.map_err(|err| self.surface(err))
    }

    pub fn deactivate(&mut self) -> Result<bool, LifecycleError> {
        let result = self.lifecycle.deactivate(&self.api);
        result.map_err(|err| self.surface(err))
    }

    /// Runs the current plan, saved or not. Partial success is returned as a report.
    pub fn execute(&mut self) -> Result<ExecutionReport, LifecycleError> {
        let now = self.clock.now_millis();
        let result = self.lifecycle.execute(
            &self.api,
            self.store.active_conversation(),
            self.tracker.plan(),
            now,
        );
        match result {
            Ok(report) => {
                if let Some(marker) = self.lifecycle.last_execution().cloned() {
                    self.tracker.record_execution(marker, now);
                }
                let notice = match report.outcome {
                    ExecutionOutcome::Succeeded => Notice::info(report.summary()),
                    ExecutionOutcome::Partial
                    | ExecutionOutcome::Skipped
                    | ExecutionOutcome::NoSteps => Notice::warning(report.summary()),
                    ExecutionOutcome::Failed => Notice::error(report.summary(), false),
                };
                self.store.push_feedback(notice, now);
                self.persist();
                Ok(report)
            }
            Err(err) => Err(self.surface(err)),
        }
    }

    fn send_turn(&mut self, text: &str, kind: MessageKind) -> Result<TurnOutcome, SessionError> {
        let request = self
            .store
            .begin_user_turn(text, kind, self.clock.now_millis())?;
        self.dispatch(request)
    }

    fn dispatch(&mut self, request: TurnRequest) -> Result<TurnOutcome, SessionError> {
        let result = self.api.send_turn(&request);
        self.settle_turn(result)
    }

    fn settle_turn(
        &mut self,
        result: Result<TurnResponse, ApiError>,
    ) -> Result<TurnOutcome, SessionError> {
        let now = self.clock.now_millis();
        let response = match result {
            Ok(response) => response,
            Err(api_err) => {
                let err = SessionError::Api(api_err);
                self.store.fail_turn(&err, now);
                self.persist();
                return Err(err);
            }
        };
        let reply = self.store.complete_turn(response, now)?;
        if let Some(conversation_id) = self.store.active_conversation() {
            self.tracker.attach(conversation_id);
        }
        let plan = self.tracker.observe(&reply, now);
        let observed = reply
            .qualifying_metadata()
            .map(|metadata| self.coordinator.observe(metadata))
            .unwrap_or_default();
        self.persist();
        Ok(TurnOutcome {
            reply,
            plan,
            queued: observed.queued,
            repeated_authorization: observed.repeated_authorization,
        })
    }

    /// Converts a lifecycle failure into a visible notice and hands the error back.
    fn surface(&mut self, err: LifecycleError) -> LifecycleError {
        let notice = if err.is_validation() {
            Notice::warning(err.user_message())
        } else {
            Notice::error(err.user_message(), err.is_retryable())
        };
        self.store.push_feedback(notice, self.clock.now_millis());
        self.persist();
        err
    }

    fn persist(&self) {
        let Some(conversation_id) = self.store.active_conversation() else {
            return;
        };
        if let Err(err) = self
            .transcript
            .write_all(conversation_id, self.store.messages())
        {
            self.log.warn(
                "transcript.write_failed",
                &[
                    ("conversation_id", json!(conversation_id.as_str())),
                    ("error", json!(err.to_string())),
                ],
            );
        }
    }
}
