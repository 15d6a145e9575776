use super::error::SessionError;
use super::message::{Message, MessageKind, MessageMetadata, Notice, Role};
use crate::api::{HistoryEntry, TurnRequest, TurnResponse};
use crate::shared::ids::ConversationId;
use crate::shared::logging::EventLog;
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingTurn {
    message_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedTurn {
    pub message_id: String,
    pub text: String,
    pub kind: MessageKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    pub duplicate_window_ms: i64,
    pub history_limit: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self {
            duplicate_window_ms: 3_000,
            history_limit: 40,
        }
    }
}

/// Messages per conversation plus the draft conversation that has not been assigned an id
/// yet. Turns are serialized: at most one is outstanding at a time.
#[derive(Debug)]
pub struct SessionStore {
    conversations: BTreeMap<ConversationId, Vec<Message>>,
    draft: Vec<Message>,
    active: Option<ConversationId>,
    pending: Option<PendingTurn>,
    failed: Option<FailedTurn>,
    last_error: Option<Notice>,
    limits: StoreLimits,
    next_seq: u64,
    log: EventLog,
}

impl SessionStore {
    pub fn new(limits: StoreLimits, log: EventLog) -> Self {
        Self {
            conversations: BTreeMap::new(),
            draft: Vec::new(),
            active: None,
            pending: None,
            failed: None,
            last_error: None,
            limits,
            next_seq: 0,
            log,
        }
    }

    pub fn active_conversation(&self) -> Option<&ConversationId> {
        self.active.as_ref()
    }

    pub fn messages(&self) -> &[Message] {
        match self.active.as_ref() {
            Some(id) => self
                .conversations
                .get(id)
                .map(Vec::as_slice)
                .unwrap_or_default(),
            None => &self.draft,
        }
    }

    pub fn messages_for(&self, conversation_id: &ConversationId) -> Option<&[Message]> {
        self.conversations.get(conversation_id).map(Vec::as_slice)
    }

    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn last_error(&self) -> Option<&Notice> {
        self.last_error.as_ref()
    }

    pub fn failed_turn(&self) -> Option<&FailedTurn> {
        self.failed.as_ref()
    }

    /// Makes `conversation_id` active, seeding it with `messages` when not yet known. A
    /// trailing user message without a reply is treated as a failed turn.
    pub fn open(&mut self, conversation_id: &ConversationId, messages: Vec<Message>) {
        self.conversations
            .entry(conversation_id.clone())
            .or_insert(messages);
        self.active = Some(conversation_id.clone());
        self.clear_turn_state();
        self.failed = unanswered_turn(self.messages());
    }

    /// Starts a fresh draft conversation; the server assigns its id on the first reply.
    pub fn start_new(&mut self) {
        self.active = None;
        self.draft.clear();
        self.clear_turn_state();
    }

    pub fn begin_user_turn(
        &mut self,
        text: &str,
        kind: MessageKind,
        now_millis: i64,
    ) -> Result<TurnRequest, SessionError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        if self.pending.is_some() {
            self.log.warn("turn.suppressed", &[("reason", json!("in_flight"))]);
            return Err(SessionError::TurnInFlight);
        }
        if let Some(elapsed_ms) = self.recent_duplicate(text, now_millis) {
            self.log.warn(
                "turn.suppressed",
                &[("reason", json!("duplicate")), ("elapsed_ms", json!(elapsed_ms))],
            );
            return Err(SessionError::DuplicateMessage { elapsed_ms });
        }

        let history = self.planner_history();
        let message = Message {
            id: self.next_message_id(now_millis),
            role: Role::User,
            kind,
            content: text.to_string(),
            timestamp: now_millis,
            metadata: None,
        };
        self.pending = Some(PendingTurn {
            message_id: message.id.clone(),
        });
        self.failed = None;
        self.last_error = None;
        self.messages_mut().push(message);
        self.log.info(
            "turn.sent",
            &[
                ("conversation_id", json!(self.active.as_ref().map(ConversationId::as_str))),
                ("kind", json!(kind)),
                ("history", json!(history.len())),
            ],
        );
        Ok(TurnRequest {
            conversation_id: self.active.clone(),
            text: text.to_string(),
            history,
            continuation: kind == MessageKind::Continuation,
        })
    }

    /// Resends the last failed turn without adding another copy of it.
    pub fn begin_retry(&mut self) -> Result<TurnRequest, SessionError> {
        if self.pending.is_some() {
            return Err(SessionError::TurnInFlight);
        }
        let failed = self.failed.take().ok_or(SessionError::NothingToRetry)?;
        let history = self.history_excluding(Some(&failed.message_id));
        self.pending = Some(PendingTurn {
            message_id: failed.message_id.clone(),
        });
        self.last_error = None;
        self.log.info(
            "turn.retried",
            &[("message_id", json!(failed.message_id))],
        );
        Ok(TurnRequest {
            conversation_id: self.active.clone(),
            text: failed.text,
            history,
            continuation: failed.kind == MessageKind::Continuation,
        })
    }

    /// Records the assistant reply. Adopts the server-assigned id for a draft conversation.
    pub fn complete_turn(
        &mut self,
        response: TurnResponse,
        now_millis: i64,
    ) -> Result<Message, SessionError> {
        if self.pending.take().is_none() {
            return Err(SessionError::NoPendingTurn);
        }
        match (self.active.as_ref(), response.conversation_id) {
            (None, Some(assigned)) => {
                let draft = std::mem::take(&mut self.draft);
                self.conversations.entry(assigned.clone()).or_default().extend(draft);
                self.log.info(
                    "conversation.created",
                    &[("conversation_id", json!(assigned.as_str()))],
                );
                self.active = Some(assigned);
            }
            (Some(active), Some(reported)) if *active != reported => {
                self.log.warn(
                    "conversation.id_mismatch",
                    &[
                        ("active", json!(active.as_str())),
                        ("reported", json!(reported.as_str())),
                    ],
                );
            }
            _ => {}
        }

        let metadata = Some(response.metadata).filter(|meta| *meta != MessageMetadata::default());
        let message = Message {
            id: self.next_message_id(now_millis),
            role: Role::Assistant,
            kind: MessageKind::Chat,
            content: response.content,
            timestamp: now_millis,
            metadata,
        };
        self.messages_mut().push(message.clone());
        self.last_error = None;
        Ok(message)
    }

    /// Releases the turn guard and records a retryable failure notice.
    pub fn fail_turn(&mut self, error: &SessionError, now_millis: i64) -> Notice {
        let pending = self.pending.take();
        if let Some(pending) = pending {
            let failed = self
                .messages()
                .iter()
                .find(|message| message.id == pending.message_id)
                .map(|message| FailedTurn {
                    message_id: message.id.clone(),
                    text: message.content.clone(),
                    kind: message.kind,
                });
            self.failed = failed;
        }
        self.log.error("turn.failed", &[("error", json!(error.to_string()))]);
        let notice = Notice::error(error.user_message(), error.is_retryable());
        self.push_feedback(notice.clone(), now_millis);
        self.last_error = Some(notice.clone());
        notice
    }

    /// Appends a view-only notice. Feedback is never sent to the planner.
    pub fn push_feedback(&mut self, notice: Notice, now_millis: i64) -> Message {
        let message = Message {
            id: self.next_message_id(now_millis),
            role: Role::System,
            kind: MessageKind::Feedback,
            content: notice.text,
            timestamp: now_millis,
            metadata: None,
        };
        self.messages_mut().push(message.clone());
        message
    }

    /// Newest planner-visible messages, oldest first.
    pub fn planner_history(&self) -> Vec<HistoryEntry> {
        self.history_excluding(None)
    }

    fn history_excluding(&self, skip_id: Option<&str>) -> Vec<HistoryEntry> {
        let visible = self
            .messages()
            .iter()
            .filter(|message| message.is_planner_visible())
            .filter(|message| Some(message.id.as_str()) != skip_id)
            .collect::<Vec<_>>();
        let start = visible.len().saturating_sub(self.limits.history_limit);
        visible[start..]
            .iter()
            .map(|message| HistoryEntry {
                role: message.role,
                content: message.content.clone(),
            })
            .collect()
    }

    fn recent_duplicate(&self, text: &str, now_millis: i64) -> Option<i64> {
        let last_user = self
            .messages()
            .iter()
            .rev()
            .find(|message| message.role == Role::User)?;
        let elapsed = now_millis - last_user.timestamp;
        (last_user.content == text && elapsed < self.limits.duplicate_window_ms).then_some(elapsed)
    }

    fn messages_mut(&mut self) -> &mut Vec<Message> {
        match self.active.as_ref() {
            Some(id) => self.conversations.entry(id.clone()).or_default(),
            None => &mut self.draft,
        }
    }

    fn next_message_id(&mut self, now_millis: i64) -> String {
        self.next_seq += 1;
        format!("msg-{now_millis}-{}", self.next_seq)
    }

    fn clear_turn_state(&mut self) {
        self.pending = None;
        self.failed = None;
        self.last_error = None;
    }
}

fn unanswered_turn(messages: &[Message]) -> Option<FailedTurn> {
    let last = messages
        .iter()
        .rev()
        .find(|message| message.is_planner_visible())?;
    (last.role == Role::User).then(|| FailedTurn {
        message_id: last.id.clone(),
        text: last.content.clone(),
        kind: last.kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiError;

    fn store() -> SessionStore {
        SessionStore::new(StoreLimits::default(), EventLog::disabled())
    }

    fn reply(conversation: Option<&str>, content: &str) -> TurnResponse {
        TurnResponse {
            conversation_id: conversation.map(|id| ConversationId::parse(id).expect("id")),
            content: content.to_string(),
            metadata: MessageMetadata::default(),
        }
    }

    #[test]
    fn first_reply_assigns_the_conversation_id() {
        let mut store = store();
        let request = store
            .begin_user_turn("email me daily", MessageKind::Chat, 1_000)
            .expect("turn");
        assert!(request.conversation_id.is_none());
        assert!(store.is_loading());

        store
            .complete_turn(reply(Some("conv-9"), "Here is a plan"), 1_100)
            .expect("complete");
        assert_eq!(
            store.active_conversation().map(ConversationId::as_str),
            Some("conv-9")
        );
        assert_eq!(store.messages().len(), 2);
        assert!(!store.is_loading());
    }

    #[test]
    fn second_turn_is_rejected_while_one_is_outstanding() {
        let mut store = store();
        store
            .begin_user_turn("one", MessageKind::Chat, 0)
            .expect("turn");
        assert!(matches!(
            store.begin_user_turn("two", MessageKind::Chat, 10),
            Err(SessionError::TurnInFlight)
        ));
    }

    #[test]
    fn identical_message_within_window_is_suppressed() {
        let mut store = store();
        store
            .begin_user_turn("run it", MessageKind::Chat, 0)
            .expect("turn");
        store.complete_turn(reply(Some("c"), "ok"), 100).expect("done");

        assert!(matches!(
            store.begin_user_turn("run it", MessageKind::Chat, 2_000),
            Err(SessionError::DuplicateMessage { elapsed_ms: 2_000 })
        ));
        let user_turns = store
            .messages()
            .iter()
            .filter(|message| message.role == Role::User)
            .count();
        assert_eq!(user_turns, 1);
        store
            .begin_user_turn("run it", MessageKind::Chat, 3_500)
            .expect("outside the window");
    }

    #[test]
    fn feedback_and_system_messages_stay_out_of_history() {
        let mut store = store();
        store.begin_user_turn("hi", MessageKind::Chat, 0).expect("turn");
        store.complete_turn(reply(Some("c"), "hello"), 1).expect("done");
        store.push_feedback(Notice::warning("popup blocked"), 2);
        store
            .begin_user_turn("Authorization completed", MessageKind::Continuation, 3)
            .expect("continuation");

        let history = store.planner_history();
        assert_eq!(
            history.iter().map(|entry| entry.content.as_str()).collect::<Vec<_>>(),
            vec!["hi", "hello", "Authorization completed"]
        );
    }

    #[test]
    fn reopened_conversation_with_unanswered_turn_can_be_retried() {
        let mut store = store();
        let conv = ConversationId::parse("c").expect("id");
        let stranded = Message {
            id: "u-1".to_string(),
            role: Role::User,
            kind: MessageKind::Chat,
            content: "send the report".to_string(),
            timestamp: 10,
            metadata: None,
        };
        store.open(&conv, vec![stranded]);
        let retry = store.begin_retry().expect("retry");
        assert_eq!(retry.text, "send the report");
        assert_eq!(retry.conversation_id, Some(conv));
    }

    #[test]
    fn failed_turn_can_be_retried_once_without_duplicating_it() {
        let mut store = store();
        store.begin_user_turn("hi", MessageKind::Chat, 0).expect("turn");
        let notice = store.fail_turn(
            &SessionError::Api(ApiError::Transport("refused".to_string())),
            5,
        );
        assert!(notice.retryable);
        assert!(store.last_error().is_some());
        assert!(!store.is_loading());

        let retry = store.begin_retry().expect("retry");
        assert_eq!(retry.text, "hi");
        assert!(retry.history.is_empty());
        assert!(matches!(store.begin_retry(), Err(SessionError::TurnInFlight)));
        store.complete_turn(reply(Some("c"), "hello"), 9).expect("done");
        assert!(matches!(store.begin_retry(), Err(SessionError::NothingToRetry)));
        let user_turns = store
            .messages()
            .iter()
            .filter(|message| message.role == Role::User)
            .count();
        assert_eq!(user_turns, 1);
    }
}
