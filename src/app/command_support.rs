use crate::api::{HttpPlannerApi, PlannerApi};
use crate::config::{load_global_settings, ConfigError, Settings};
use crate::interaction::CoordinatorState;
use crate::lifecycle::{ActionAvailability, LifecycleError};
use crate::orchestrator::WorkflowSession;
use crate::session::{Message, MessageKind, Role, SessionError};
use crate::shared::ids::ConversationId;

pub fn map_config_err(err: ConfigError) -> String {
    err.to_string()
}

pub fn map_session_err(err: SessionError) -> String {
    err.user_message()
}

pub fn map_lifecycle_err(err: LifecycleError) -> String {
    err.user_message()
}

pub fn load_settings() -> Result<Settings, String> {
    load_global_settings().map_err(map_config_err)
}

pub fn open_http_session(settings: &Settings) -> Result<WorkflowSession<HttpPlannerApi>, String> {
    WorkflowSession::from_settings(HttpPlannerApi::from_settings(settings), settings)
        .map_err(map_config_err)
}

pub fn parse_conversation(raw: &str) -> Result<ConversationId, String> {
    ConversationId::parse(raw).map_err(|err| format!("invalid conversation id `{raw}`: {err}"))
}

/// Enters `target` or starts a draft when it is `new`.
pub fn enter_target<A: PlannerApi>(
    session: &mut WorkflowSession<A>,
    target: &str,
) -> Result<Vec<String>, String> {
    if target == "new" {
        session.start_new_conversation();
        return Ok(Vec::new());
    }
    let conversation_id = parse_conversation(target)?;
    let recovered = session
        .enter_conversation(&conversation_id)
        .map_err(|err| err.user_message())?;
    Ok(recovered
        .notices
        .iter()
        .map(|notice| format!("! {}", notice.text))
        .collect())
}

pub fn render_message(message: &Message) -> Option<String> {
    if !message.is_displayed() {
        return None;
    }
    let who = match (message.role, message.kind) {
        (_, MessageKind::Feedback) => "notice",
        (Role::User, _) => "you",
        (Role::Assistant, _) => "planner",
        (Role::System, _) => "system",
    };
    Some(format!("[{who}] {}", message.content.trim()))
}

pub fn render_availability(availability: ActionAvailability) -> String {
    let flag = |enabled: bool| if enabled { "enabled" } else { "disabled" };
    format!(
        "actions: save {}, activate {}, execute {}",
        flag(availability.save),
        flag(availability.activate),
        flag(availability.execute)
    )
}

pub fn render_footer<A: PlannerApi>(session: &WorkflowSession<A>) -> Vec<String> {
    let mut lines = vec![
        format!(
            "conversation: {}",
            session
                .conversation_id()
                .map(ConversationId::as_str)
                .unwrap_or("(new)")
        ),
        format!("phase: {}", session.phase()),
    ];
    if session.interaction_state() != CoordinatorState::Idle || session.pending_interactions() > 0
    {
        lines.push(format!(
            "pending interactions: {}",
            session.pending_interactions()
        ));
    }
    lines.push(render_availability(session.availability()));
    lines
}
