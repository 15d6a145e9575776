use super::form::{FieldError, SmartFormSchema};
use super::oauth::{
    authorization_url, generate_state, AuthWindow, AuthorizationOutcome, MessagePort,
    OAuthListener, OAuthRequirement, PopupBlocked,
};
use crate::config::OAuthConfig;
use crate::session::message::{MessageKind, MessageMetadata, Notice};
use crate::shared::ids::ConversationId;
use crate::shared::logging::EventLog;
use serde_json::json;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

const MAX_FORM_ATTEMPTS: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InteractionError {
    #[error("authorization required for {services} but no initiation url is configured")]
    NotConfigured { services: String },
    #[error("could not create authorization state for {service}: {reason}")]
    StateNonce { service: String, reason: String },
    #[error("authorization window for {service} was blocked: {reason}")]
    PopupBlocked { service: String, reason: String },
}

impl InteractionError {
    pub fn user_message(&self) -> String {
        match self {
            Self::NotConfigured { services } => format!(
                "Authorization is required for {services} but no authorization endpoint is configured."
            ),
            Self::StateNonce { service, .. } => {
                format!("Could not start authorization for {service}. Try again.")
            }
            Self::PopupBlocked { service, .. } => format!(
                "The authorization window for {service} was blocked. Allow pop-ups for this site and try again."
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Idle,
    AwaitingOAuth,
    AwaitingForm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionKind {
    OAuth,
    Form,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Interaction {
    OAuth(Vec<OAuthRequirement>),
    Form(SmartFormSchema),
}

impl Interaction {
    pub fn kind(&self) -> InteractionKind {
        match self {
            Self::OAuth(_) => InteractionKind::OAuth,
            Self::Form(_) => InteractionKind::Form,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormOutcome {
    Submitted(BTreeMap<String, String>),
    Cancelled,
}

/// The UI side of out-of-band input: opens authorization windows and renders forms.
pub trait InteractionHost {
    fn open_authorization_window(
        &mut self,
        url: &str,
        requirement: &OAuthRequirement,
        port: MessagePort,
    ) -> Result<Arc<dyn AuthWindow>, PopupBlocked>;

    /// `errors` is empty on first presentation and lists rejected fields on re-presentation.
    fn present_form(&mut self, schema: &SmartFormSchema, errors: &[FieldError]) -> FormOutcome;
}

/// Message the caller must send to resume the conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Continuation {
    pub text: String,
    pub message_kind: MessageKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InteractionResult {
    pub continuation: Option<Continuation>,
    pub notices: Vec<Notice>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObserveReport {
    pub queued: Vec<InteractionKind>,
    /// Services the planner still asks for right after they were authorized.
    pub repeated_authorization: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub initiation_url: Option<String>,
    pub allowed_origins: Vec<String>,
    pub poll_interval: Duration,
    pub timeout: Duration,
    pub treat_close_as_completion: bool,
}

impl From<&OAuthConfig> for OAuthSettings {
    fn from(config: &OAuthConfig) -> Self {
        Self {
            initiation_url: config.initiation_url.clone(),
            allowed_origins: config.allowed_origins.clone(),
            poll_interval: config.poll_interval(),
            timeout: config.timeout(),
            treat_close_as_completion: config.treat_close_as_completion,
        }
    }
}

impl Default for OAuthSettings {
    fn default() -> Self {
        Self::from(&OAuthConfig::default())
    }
}

/// Per-conversation state machine for out-of-band input. At most one interaction is
/// active; later ones wait in a queue, authorization ahead of forms.
#[derive(Debug)]
pub struct InteractionCoordinator {
    state: CoordinatorState,
    queue: VecDeque<Interaction>,
    settings: OAuthSettings,
    last_authorized: Option<BTreeSet<String>>,
    log: EventLog,
}

impl InteractionCoordinator {
    pub fn new(settings: OAuthSettings, log: EventLog) -> Self {
        Self {
            state: CoordinatorState::Idle,
            queue: VecDeque::new(),
            settings,
            last_authorized: None,
            log,
        }
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state == CoordinatorState::Idle
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn reset(&mut self) {
        self.state = CoordinatorState::Idle;
        self.queue.clear();
        self.last_authorized = None;
    }

    /// Queues whatever blocking input a server response asks for.
    pub fn observe(&mut self, metadata: &MessageMetadata) -> ObserveReport {
        let mut report = ObserveReport::default();
        if self.is_idle() {
            // Queued input the newest response no longer asks for is stale.
            let services = service_set(&metadata.oauth_requirements);
            self.queue.retain(|item| match item {
                Interaction::OAuth(queued) => service_set(queued) == services,
                Interaction::Form(form) => metadata.smart_form.as_ref() == Some(form),
            });
        }
        if metadata.needs_authorization() {
            let services = service_set(&metadata.oauth_requirements);
            if self.last_authorized.as_ref() == Some(&services) {
                report.repeated_authorization = services.into_iter().collect();
                self.log.warn(
                    "interaction.oauth.repeated",
                    &[("services", json!(report.repeated_authorization))],
                );
            } else if !self.has_oauth_for(&services) {
                let position = self
                    .queue
                    .iter()
                    .position(|item| item.kind() == InteractionKind::Form)
                    .unwrap_or(self.queue.len());
                self.queue.insert(
                    position,
                    Interaction::OAuth(metadata.oauth_requirements.clone()),
                );
                report.queued.push(InteractionKind::OAuth);
            }
        }
        if let Some(form) = metadata.smart_form.as_ref() {
            let already = self
                .queue
                .iter()
                .any(|item| matches!(item, Interaction::Form(queued) if queued == form));
            if !already {
                self.queue.push_back(Interaction::Form(form.clone()));
                report.queued.push(InteractionKind::Form);
            }
        }
        report
    }

    /// Explicit user request to retry whatever the latest response is blocked on.
    pub fn resume_from(&mut self, metadata: &MessageMetadata) -> ObserveReport {
        self.last_authorized = None;
        self.observe(metadata)
    }

    pub fn next_interaction(&mut self) -> Option<Interaction> {
        if !self.is_idle() {
            return None;
        }
        let next = self.queue.pop_front()?;
        self.state = match next.kind() {
            InteractionKind::OAuth => CoordinatorState::AwaitingOAuth,
            InteractionKind::Form => CoordinatorState::AwaitingForm,
        };
        Some(next)
    }

    pub fn run(
        &mut self,
        conversation_id: &ConversationId,
        interaction: &Interaction,
        host: &mut dyn InteractionHost,
    ) -> InteractionResult {
        let result = match interaction {
            Interaction::OAuth(requirements) => self.run_oauth(conversation_id, requirements, host),
            Interaction::Form(schema) => self.run_form(schema, host),
        };
        if result.continuation.is_none() {
            // The plan stays blocked; later queued input is re-derived from the next response.
            self.queue.clear();
        }
        self.state = CoordinatorState::Idle;
        result
    }

    fn run_oauth(
        &mut self,
        conversation_id: &ConversationId,
        requirements: &[OAuthRequirement],
        host: &mut dyn InteractionHost,
    ) -> InteractionResult {
        let mut result = InteractionResult::default();
        let labels = requirements
            .iter()
            .map(|req| req.label().to_string())
            .collect::<Vec<_>>();
        let Some(initiation_url) = self.settings.initiation_url.clone() else {
            let err = InteractionError::NotConfigured {
                services: labels.join(", "),
            };
            self.log.warn("interaction.oauth.unconfigured", &[("error", json!(err.to_string()))]);
            result.notices.push(Notice::warning(err.user_message()));
            return result;
        };

        let mut completed = Vec::new();
        for requirement in requirements {
            let state = match generate_state() {
                Ok(state) => state,
                Err(err) => {
                    let err = InteractionError::StateNonce {
                        service: requirement.label().to_string(),
                        reason: err.to_string(),
                    };
                    self.log.error("interaction.oauth.state_failed", &[("error", json!(err.to_string()))]);
                    result.notices.push(Notice::error(err.user_message(), false));
                    return result;
                }
            };
            let listener = OAuthListener::new(&self.settings.allowed_origins, state.clone());
            let url = authorization_url(
                &initiation_url,
                requirement,
                conversation_id.as_str(),
                &state,
            );
            self.log.info(
                "interaction.oauth.opened",
                &[
                    ("conversation_id", json!(conversation_id.as_str())),
                    ("service_id", json!(requirement.service_id)),
                ],
            );
            let window = match host.open_authorization_window(&url, requirement, listener.port()) {
                Ok(window) => window,
                Err(blocked) => {
                    self.log.warn(
                        "interaction.oauth.blocked",
                        &[
                            ("service_id", json!(requirement.service_id)),
                            ("reason", json!(blocked.reason)),
                        ],
                    );
                    let err = InteractionError::PopupBlocked {
                        service: requirement.label().to_string(),
                        reason: blocked.reason,
                    };
                    result.notices.push(Notice::warning(err.user_message()));
                    return result;
                }
            };

            let outcome =
                listener.wait(window, self.settings.poll_interval, self.settings.timeout);
            self.log.info(
                "interaction.oauth.settled",
                &[
                    ("service_id", json!(requirement.service_id)),
                    ("outcome", json!(format!("{outcome:?}"))),
                ],
            );
            match outcome {
                AuthorizationOutcome::Succeeded { .. } => {
                    completed.push(requirement.label().to_string());
                }
                AuthorizationOutcome::Closed if self.settings.treat_close_as_completion => {
                    completed.push(requirement.label().to_string());
                }
                AuthorizationOutcome::Closed => {
                    result.notices.push(Notice::info(format!(
                        "The authorization window for {} was closed before it finished. The workflow still needs access.",
                        requirement.label()
                    )));
                    return result;
                }
                AuthorizationOutcome::Failed { reason } => {
                    result.notices.push(Notice::warning(format!(
                        "Authorization for {} failed: {reason}",
                        requirement.label()
                    )));
                    return result;
                }
                AuthorizationOutcome::TimedOut => {
                    result.notices.push(Notice::warning(format!(
                        "Timed out waiting for authorization for {}.",
                        requirement.label()
                    )));
                    return result;
                }
            }
        }

        self.last_authorized = Some(service_set(requirements));
        result.continuation = Some(Continuation {
            text: format!(
                "Authorization completed for providers: {}. Please continue with the workflow.",
                completed.join(", ")
            ),
            message_kind: MessageKind::Continuation,
        });
        result
    }

    fn run_form(
        &mut self,
        schema: &SmartFormSchema,
        host: &mut dyn InteractionHost,
    ) -> InteractionResult {
        let mut result = InteractionResult::default();
        let mut errors = Vec::new();
        for _ in 0..MAX_FORM_ATTEMPTS {
            match host.present_form(schema, &errors) {
                FormOutcome::Cancelled => {
                    self.log.info("interaction.form.cancelled", &[("title", json!(schema.title))]);
                    return result;
                }
                FormOutcome::Submitted(raw) => match schema.validate(&raw) {
                    Ok(values) => {
                        self.log.info(
                            "interaction.form.submitted",
                            &[("title", json!(schema.title)), ("fields", json!(values.len()))],
                        );
                        result.continuation = Some(Continuation {
                            text: schema.submission_text(&values),
                            message_kind: MessageKind::Chat,
                        });
                        return result;
                    }
                    Err(field_errors) => errors = field_errors,
                },
            }
        }
        result.notices.push(Notice::warning(format!(
            "\"{}\" was not submitted: {}",
            schema.title,
            errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ")
        )));
        result
    }

    fn has_oauth_for(&self, services: &BTreeSet<String>) -> bool {
        self.queue.iter().any(|item| match item {
            Interaction::OAuth(queued) => &service_set(queued) == services,
            Interaction::Form(_) => false,
        })
    }
}

fn service_set(requirements: &[OAuthRequirement]) -> BTreeSet<String> {
    requirements
        .iter()
        .map(|req| req.service_id.clone())
        .collect()
}
