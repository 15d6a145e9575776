use flowsmith::api::{
    ActivateResponse, ApiError, Decision, DecisionRequest, DecisionResponse, FlowRecord,
    PlannerApi, TurnRequest, TurnResponse,
};
use flowsmith::config::StatePaths;
use flowsmith::interaction::{
    AuthWindow, CoordinatorState, FieldError, FormOutcome, InteractionHost, InteractionKind,
    MessagePort, OAuthRequirement, OAuthSettings, PopupBlocked, SmartFormSchema, WindowMessage,
};
use flowsmith::lifecycle::{ExecutionOutcome, LifecycleError, StepResult};
use flowsmith::orchestrator::{SessionOptions, WorkflowSession};
use flowsmith::phase::{AwaitedInput, SessionPhase};
use flowsmith::plan::{PlanCache, PlanCacheEntry};
use flowsmith::session::{MessageKind, MessageMetadata, NoticeLevel, Role, SessionError, StoreLimits};
use flowsmith::shared::clock::{Clock, ManualClock};
use flowsmith::shared::ids::{ConversationId, FlowId};
use flowsmith::shared::logging::EventLog;
use serde_json::{json, Value};
use std::collections::{BTreeMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::tempdir;

const APP_ORIGIN: &str = "https://app.example.com";

#[derive(Default)]
struct PlannerState {
    replies: VecDeque<Result<TurnResponse, ApiError>>,
    turn_requests: Vec<TurnRequest>,
    decisions: Vec<DecisionRequest>,
    activations: Vec<(FlowId, bool)>,
    lookups: usize,
    flows: BTreeMap<ConversationId, FlowRecord>,
    execute_steps: Vec<StepResult>,
}

#[derive(Default)]
struct FakePlanner {
    state: Mutex<PlannerState>,
}

impl FakePlanner {
    fn script(&self, reply: Result<TurnResponse, ApiError>) {
        self.state.lock().expect("lock").replies.push_back(reply);
    }

    fn turn_requests(&self) -> Vec<TurnRequest> {
        self.state.lock().expect("lock").turn_requests.clone()
    }

    fn decisions(&self) -> Vec<DecisionRequest> {
        self.state.lock().expect("lock").decisions.clone()
    }

    fn activations(&self) -> Vec<(FlowId, bool)> {
        self.state.lock().expect("lock").activations.clone()
    }

    fn flow_count(&self) -> usize {
        self.state.lock().expect("lock").flows.len()
    }

    fn set_execute_steps(&self, steps: Value) {
        self.state.lock().expect("lock").execute_steps =
            serde_json::from_value(steps).expect("step results");
    }
}

impl PlannerApi for FakePlanner {
    fn send_turn(&self, request: &TurnRequest) -> Result<TurnResponse, ApiError> {
        let mut state = self.state.lock().expect("lock");
        state.turn_requests.push(request.clone());
        state
            .replies
            .pop_front()
            .unwrap_or_else(|| Err(ApiError::Transport("no scripted reply".to_string())))
    }

    fn lifecycle_decision(&self, request: &DecisionRequest) -> Result<DecisionResponse, ApiError> {
        let mut state = self.state.lock().expect("lock");
        state.decisions.push(request.clone());
        match request.decision {
            Decision::Save => {
                let next = state.flows.len() + 1;
                let record = state
                    .flows
                    .entry(request.conversation_id.clone())
                    .or_insert_with(|| FlowRecord {
                        flow_id: FlowId::parse(&format!("flow-{next}")).expect("flow id"),
                        is_active: false,
                        conversation_id: Some(request.conversation_id.clone()),
                    })
                    .clone();
                Ok(DecisionResponse {
                    flow_id: Some(record.flow_id),
                    is_active: Some(record.is_active),
                    steps: None,
                })
            }
            Decision::Execute => Ok(DecisionResponse {
                steps: Some(state.execute_steps.clone()),
                ..DecisionResponse::default()
            }),
        }
    }

    fn flow_activate(&self, flow_id: &FlowId, is_active: bool) -> Result<ActivateResponse, ApiError> {
        let mut state = self.state.lock().expect("lock");
        state.activations.push((flow_id.clone(), is_active));
        for record in state.flows.values_mut() {
            if record.flow_id == *flow_id {
                record.is_active = is_active;
            }
        }
        Ok(ActivateResponse { is_active })
    }

    fn flow_lookup_by_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> Result<Option<FlowRecord>, ApiError> {
        let mut state = self.state.lock().expect("lock");
        state.lookups += 1;
        Ok(state.flows.get(conversation_id).cloned())
    }
}

#[derive(Debug, Default)]
struct TestWindow {
    closed: AtomicBool,
}

impl AuthWindow for TestWindow {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

enum WindowScript {
    Approve,
    Close,
}

#[derive(Default)]
struct ScriptedHost {
    windows: VecDeque<WindowScript>,
    forms: VecDeque<FormOutcome>,
    opened_urls: Vec<String>,
    forms_presented: usize,
}

impl InteractionHost for ScriptedHost {
    fn open_authorization_window(
        &mut self,
        url: &str,
        _requirement: &OAuthRequirement,
        port: MessagePort,
    ) -> Result<Arc<dyn AuthWindow>, PopupBlocked> {
        self.opened_urls.push(url.to_string());
        let window = Arc::new(TestWindow::default());
        match self.windows.pop_front().unwrap_or(WindowScript::Close) {
            WindowScript::Approve => {
                port.post(WindowMessage {
                    origin: APP_ORIGIN.to_string(),
                    data: json!({"type": "OAUTH_SUCCESS", "state": port.expected_state(), "provider": "google"}),
                });
            }
            WindowScript::Close => window.closed.store(true, Ordering::SeqCst),
        }
        Ok(window)
    }

    fn present_form(&mut self, _schema: &SmartFormSchema, _errors: &[FieldError]) -> FormOutcome {
        self.forms_presented += 1;
        self.forms.pop_front().unwrap_or(FormOutcome::Cancelled)
    }
}

fn options(state_root: &Path) -> SessionOptions {
    SessionOptions {
        state_root: state_root.to_path_buf(),
        limits: StoreLimits::default(),
        oauth: OAuthSettings {
            initiation_url: Some("https://auth.example.com/oauth/start".to_string()),
            allowed_origins: vec![APP_ORIGIN.to_string()],
            poll_interval: Duration::from_millis(5),
            timeout: Duration::from_secs(2),
            treat_close_as_completion: false,
        },
    }
}

fn open_session(state_root: &Path, clock: &ManualClock) -> WorkflowSession<FakePlanner> {
    let clock: Arc<dyn Clock> = Arc::new(clock.clone());
    WorkflowSession::new(FakePlanner::default(), options(state_root), clock).expect("session")
}

fn reply(conversation_id: &str, content: &str, metadata: Value) -> Result<TurnResponse, ApiError> {
    Ok(serde_json::from_value(json!({
        "conversation_id": conversation_id,
        "content": content,
        "metadata": metadata,
    }))
    .expect("turn response"))
}

fn digest_plan() -> Value {
    json!([
        {
            "id": "tmp-a",
            "node_id": "schedule",
            "action_id": "cron",
            "node_name": "Schedule",
            "execution_step": 1,
            "parameters": {"cron": "0 9 * * *"},
            "parameter_metadata": [{"name": "cron", "type": "string", "required": true}]
        },
        {
            "id": "tmp-b",
            "node_id": "slack",
            "action_id": "post_message",
            "node_name": "Slack",
            "execution_step": 2,
            "parameters": {"channel": "#ops"},
            "parameter_metadata": [{"name": "channel", "type": "string", "required": true}]
        }
    ])
}

fn gmail_plan(email: Value) -> Value {
    json!([{
        "node_id": "gmail",
        "action_id": "send_email",
        "execution_step": 1,
        "parameters": {"email": email},
        "parameter_metadata": [{"name": "email", "type": "string", "required": true}]
    }])
}

fn gmail_form() -> Value {
    json!({
        "title": "Gmail: Send Email",
        "sections": [{"fields": [
            {"name": "email", "type": "email", "required": true}
        ]}]
    })
}

fn ready_session(state_root: &Path, clock: &ManualClock) -> WorkflowSession<FakePlanner> {
    let mut session = open_session(state_root, clock);
    session.api().script(reply(
        "conv-1",
        "Here is a two step plan.",
        json!({"execution_plan": digest_plan(), "status": "ready"}),
    ));
    session
        .send_user_message("Every morning post a digest to #ops")
        .expect("first turn");
    session
}

#[test]
fn two_step_plan_is_ready_for_review_and_cached() {
    let temp = tempdir().expect("tempdir");
    let clock = ManualClock::new(1_000);
    let session = ready_session(temp.path(), &clock);

    assert_eq!(
        session.conversation_id().map(ConversationId::as_str),
        Some("conv-1")
    );
    assert_eq!(session.phase(), SessionPhase::ReadyForReview);
    assert!(session.availability().all_enabled());
    assert_eq!(session.plan().map(|plan| plan.len()), Some(2));

    let cache = PlanCache::new(StatePaths::new(temp.path()).plans_dir(), EventLog::disabled());
    let entry = cache
        .read(&ConversationId::parse("conv-1").expect("id"))
        .expect("read cache")
        .expect("cache entry");
    assert_eq!(entry.execution_plan.len(), 2);

    let requests = session.api().turn_requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].conversation_id.is_none());
    assert!(!requests[0].continuation);
}

#[test]
fn gmail_authorization_then_form_reaches_review() {
    let temp = tempdir().expect("tempdir");
    let clock = ManualClock::new(1_000);
    let mut session = open_session(temp.path(), &clock);

    session.api().script(reply(
        "conv-2",
        "I need access to Gmail first.",
        json!({
            "execution_plan": gmail_plan(Value::Null),
            "oauth_requirements": [{"service_id": "gmail", "provider": "google", "auth_type": "oauth2"}],
            "status": "awaiting_authorization"
        }),
    ));
    let outcome = session
        .send_user_message("Email me the weekly report")
        .expect("first turn");
    assert_eq!(outcome.queued, vec![InteractionKind::OAuth]);
    assert_eq!(
        session.phase(),
        SessionPhase::AwaitingInput(AwaitedInput::OAuth)
    );

    session.api().script(reply(
        "conv-2",
        "Which address should receive it?",
        json!({
            "execution_plan": gmail_plan(Value::Null),
            "smart_form": gmail_form(),
            "status": "awaiting_input"
        }),
    ));
    let mut host = ScriptedHost {
        windows: VecDeque::from([WindowScript::Approve]),
        forms: VecDeque::from([FormOutcome::Cancelled]),
        ..ScriptedHost::default()
    };
    clock.advance_millis(500);
    let report = session.drive_interactions(&mut host);
    assert_eq!(report.turns.len(), 1);
    assert!(report.failed.is_none());
    assert_eq!(host.opened_urls.len(), 1);
    assert!(host.opened_urls[0].contains("service_id=gmail"));
    assert!(host.opened_urls[0].contains("conversation_id=conv-2"));
    assert_eq!(host.forms_presented, 1);
    assert_eq!(session.interaction_state(), CoordinatorState::Idle);
    assert_eq!(
        session.phase(),
        SessionPhase::AwaitingInput(AwaitedInput::Form)
    );

    let requests = session.api().turn_requests();
    assert_eq!(requests.len(), 2);
    assert!(requests[1].continuation);
    assert!(requests[1].text.starts_with("Authorization completed for providers: google"));
    let hidden = session
        .messages()
        .iter()
        .find(|message| message.kind == MessageKind::Continuation)
        .expect("continuation message");
    assert!(!hidden.is_displayed());

    let resumed = session.resume_pending_interaction();
    assert_eq!(resumed.queued, vec![InteractionKind::Form]);
    session.api().script(reply(
        "conv-2",
        "All set.",
        json!({"execution_plan": gmail_plan(json!("ops@example.com")), "status": "ready"}),
    ));
    let mut values = BTreeMap::new();
    values.insert("email".to_string(), "ops@example.com".to_string());
    host.forms.push_back(FormOutcome::Submitted(values));
    clock.advance_millis(500);
    let report = session.drive_interactions(&mut host);
    assert_eq!(report.turns.len(), 1);

    let requests = session.api().turn_requests();
    assert_eq!(requests.len(), 3);
    assert!(!requests[2].continuation);
    assert!(requests[2].text.starts_with("Submitted values for \"Gmail: Send Email\""));
    assert_eq!(session.phase(), SessionPhase::ReadyForReview);
    assert!(session
        .plan()
        .is_some_and(|plan| !plan.has_missing_parameters()));
}

#[test]
fn plan_with_unset_required_parameter_waits_for_input_without_a_form() {
    let temp = tempdir().expect("tempdir");
    let clock = ManualClock::new(1_000);
    let mut session = open_session(temp.path(), &clock);
    session.api().script(reply(
        "conv-6",
        "Here is the plan.",
        json!({"execution_plan": gmail_plan(Value::Null), "status": "ready"}),
    ));
    let outcome = session
        .send_user_message("Email me the weekly report")
        .expect("first turn");
    assert!(outcome.queued.is_empty());
    assert!(session.plan().is_some_and(|plan| plan.has_missing_parameters()));
    assert_eq!(
        session.phase(),
        SessionPhase::AwaitingInput(AwaitedInput::Form)
    );

    session.api().script(reply(
        "conv-6",
        "Updated.",
        json!({"execution_plan": gmail_plan(json!("ops@example.com")), "status": "ready"}),
    ));
    clock.advance_millis(500);
    session
        .send_user_message("Send it to ops@example.com")
        .expect("second turn");
    assert_eq!(session.phase(), SessionPhase::ReadyForReview);
}

#[test]
fn closed_authorization_window_leaves_plan_blocked() {
    let temp = tempdir().expect("tempdir");
    let clock = ManualClock::new(1_000);
    let mut session = open_session(temp.path(), &clock);
    session.api().script(reply(
        "conv-3",
        "I need access to Gmail first.",
        json!({
            "execution_plan": gmail_plan(Value::Null),
            "oauth_requirements": [{"service_id": "gmail", "provider": "google"}],
        }),
    ));
    session
        .send_user_message("Email me the weekly report")
        .expect("first turn");

    let mut host = ScriptedHost {
        windows: VecDeque::from([WindowScript::Close]),
        ..ScriptedHost::default()
    };
    let report = session.drive_interactions(&mut host);
    assert!(report.turns.is_empty());
    assert_eq!(report.notices.len(), 1);
    assert_eq!(report.notices[0].level, NoticeLevel::Info);
    assert_eq!(session.api().turn_requests().len(), 1);
    assert_eq!(
        session.phase(),
        SessionPhase::AwaitingInput(AwaitedInput::OAuth)
    );
}

#[test]
fn identical_message_within_window_is_sent_once() {
    let temp = tempdir().expect("tempdir");
    let clock = ManualClock::new(10_000);
    let mut session = ready_session(temp.path(), &clock);

    clock.advance_millis(1_000);
    let err = session
        .send_user_message("Every morning post a digest to #ops")
        .expect_err("duplicate");
    assert!(matches!(err, SessionError::DuplicateMessage { elapsed_ms: 1_000 }));
    assert_eq!(session.api().turn_requests().len(), 1);

    clock.advance_millis(3_000);
    session.api().script(reply(
        "conv-1",
        "Same plan as before.",
        json!({"execution_plan": digest_plan(), "status": "ready"}),
    ));
    session
        .send_user_message("Every morning post a digest to #ops")
        .expect("outside the window");
    assert_eq!(session.api().turn_requests().len(), 2);
}

#[test]
fn partial_execution_is_reported_and_marks_plan_executed() {
    let temp = tempdir().expect("tempdir");
    let clock = ManualClock::new(1_000);
    let mut session = ready_session(temp.path(), &clock);
    session.api().set_execute_steps(json!([
        {"node_id": "schedule", "action_id": "cron", "status": "success", "duration_ms": 4},
        {"node_id": "slack", "action_id": "post_message", "status": "failed", "error": "channel_not_found"}
    ]));

    let report = session.execute().expect("execute");
    assert_eq!(report.outcome, ExecutionOutcome::Partial);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(session.phase(), SessionPhase::Executed);
    assert!(session.flow_id().is_none());

    let decisions = session.api().decisions();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0].decision, Decision::Execute);
    assert_eq!(decisions[0].execution_plan.len(), 2);

    let notice = session.messages().last().expect("notice");
    assert_eq!(notice.kind, MessageKind::Feedback);
    assert!(notice.content.contains("partially succeeded (1 of 2 steps)"));
    assert!(notice.content.contains("channel_not_found"));
}

#[test]
fn saving_twice_keeps_one_flow_and_activation_round_trips() {
    let temp = tempdir().expect("tempdir");
    let clock = ManualClock::new(1_000);
    let mut session = ready_session(temp.path(), &clock);

    let first = session.save().expect("save");
    let second = session.save().expect("save again");
    assert_eq!(first, second);
    assert_eq!(session.api().flow_count(), 1);
    assert_eq!(session.phase(), SessionPhase::Saved);

    assert!(session.activate().expect("activate"));
    assert_eq!(session.phase(), SessionPhase::Activated);
    assert!(session.lifecycle().active);

    assert!(!session.deactivate().expect("deactivate"));
    assert_eq!(session.phase(), SessionPhase::Saved);
    assert_eq!(
        session.api().activations(),
        vec![(first.clone(), true), (first, false)]
    );
}

#[test]
fn activation_without_saved_flow_is_rejected_locally() {
    let temp = tempdir().expect("tempdir");
    let clock = ManualClock::new(1_000);
    let mut session = ready_session(temp.path(), &clock);

    let err = session.activate().expect_err("not saved");
    assert!(matches!(err, LifecycleError::NotSaved));
    assert!(session.api().activations().is_empty());

    let notice = session.messages().last().expect("notice");
    assert_eq!(notice.kind, MessageKind::Feedback);
    assert_eq!(notice.role, Role::System);

    clock.advance_millis(100);
    session.api().script(reply(
        "conv-1",
        "Added a step.",
        json!({"execution_plan": digest_plan(), "status": "ready"}),
    ));
    session
        .send_user_message("Also mention the on-call engineer")
        .expect("second turn");
    let history = &session.api().turn_requests()[1].history;
    assert_eq!(history.len(), 2);
    assert!(history
        .iter()
        .all(|entry| entry.role != Role::System && !entry.content.contains("Save the workflow")));
}

#[test]
fn empty_plan_disables_lifecycle_actions() {
    let temp = tempdir().expect("tempdir");
    let clock = ManualClock::new(1_000);
    let mut session = open_session(temp.path(), &clock);
    session
        .api()
        .script(reply("conv-4", "What should it do?", json!({})));
    session.send_user_message("hi").expect("turn");

    assert!(!session.availability().save);
    assert!(!session.availability().execute);
    assert!(matches!(
        session.save().expect_err("empty plan"),
        LifecycleError::EmptyPlan { .. }
    ));
    assert!(session.api().decisions().is_empty());
    assert_eq!(session.phase(), SessionPhase::Empty);
}

#[test]
fn conversation_without_messages_discards_stale_cache() {
    let temp = tempdir().expect("tempdir");
    let clock = ManualClock::new(1_000);
    let conversation_id = ConversationId::parse("conv-9").expect("id");
    let cache = PlanCache::new(StatePaths::new(temp.path()).plans_dir(), EventLog::disabled());
    cache
        .store(PlanCacheEntry {
            conversation_id: conversation_id.clone(),
            execution_plan: serde_json::from_value(digest_plan()).expect("plan"),
            metadata: MessageMetadata::default(),
            timestamp: 500,
            flow_id: None,
            last_execution: None,
        })
        .expect("seed cache");
    assert!(cache.entry_path(&conversation_id).exists());

    let mut session = open_session(temp.path(), &clock);
    let recovered = session
        .enter_conversation(&conversation_id)
        .expect("enter");
    assert_eq!(recovered.phase, SessionPhase::Empty);
    assert_eq!(session.phase(), SessionPhase::Empty);
    assert!(session.plan().is_none());
    assert!(!cache.entry_path(&conversation_id).exists());
}

#[test]
fn failed_continuation_is_not_retried_until_asked() {
    let temp = tempdir().expect("tempdir");
    let clock = ManualClock::new(1_000);
    let mut session = open_session(temp.path(), &clock);
    session.api().script(reply(
        "conv-5",
        "I need access to Gmail first.",
        json!({
            "execution_plan": gmail_plan(json!("ops@example.com")),
            "oauth_requirements": [{"service_id": "gmail", "provider": "google"}],
        }),
    ));
    session
        .send_user_message("Email me the weekly report")
        .expect("first turn");
    session.api().script(Err(ApiError::Status {
        status: 503,
        body: "overloaded".to_string(),
    }));

    let mut host = ScriptedHost {
        windows: VecDeque::from([WindowScript::Approve]),
        ..ScriptedHost::default()
    };
    let report = session.drive_interactions(&mut host);
    let failed = report.failed.expect("failed continuation");
    assert!(failed.retryable);
    assert!(report.turns.is_empty());
    assert_eq!(session.api().turn_requests().len(), 2);
    assert_eq!(session.interaction_state(), CoordinatorState::Idle);
    assert_eq!(session.pending_interactions(), 0);
    assert_eq!(session.phase(), SessionPhase::Error);
    assert!(!session.is_loading());

    session.api().script(reply(
        "conv-5",
        "Thanks, the plan is ready.",
        json!({"execution_plan": gmail_plan(json!("ops@example.com")), "status": "ready"}),
    ));
    clock.advance_millis(200);
    session.retry_last_turn().expect("retry");
    let requests = session.api().turn_requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[2].text, requests[1].text);
    assert!(requests[2].continuation);
    assert_eq!(session.phase(), SessionPhase::ReadyForReview);
    let continuations = session
        .messages()
        .iter()
        .filter(|message| message.kind == MessageKind::Continuation)
        .count();
    assert_eq!(continuations, 1);
}
