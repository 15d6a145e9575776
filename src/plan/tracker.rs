use super::cache::{PlanCache, PlanCacheEntry};
use super::types::{ContractViolation, ExecutionPlan};
use crate::lifecycle::report::ExecutionMarker;
use crate::session::message::{Message, MessageMetadata, Role};
use crate::shared::ids::{ConversationId, FlowId};
use crate::shared::logging::EventLog;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanSource {
    Messages,
    Cache,
}

impl PlanSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Cache => "cache",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedPlan {
    pub plan: ExecutionPlan,
    /// Metadata of the message (or cache entry) the plan came from.
    pub metadata: MessageMetadata,
    pub timestamp: i64,
    pub source: PlanSource,
    pub flow_id: Option<FlowId>,
    pub last_execution: Option<ExecutionMarker>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdoptReport {
    pub violations: Vec<ContractViolation>,
    pub same_steps_as_previous: bool,
    pub persisted: bool,
}

/// Newest assistant message carrying a non-empty plan.
pub fn latest_plan(messages: &[Message]) -> Option<(&Message, &ExecutionPlan)> {
    messages.iter().rev().find_map(|message| {
        if message.role != Role::Assistant {
            return None;
        }
        let plan = message.metadata.as_ref()?.plan()?;
        Some((message, plan))
    })
}

/// Holds the authoritative draft plan of the active conversation and mirrors every
/// adopted plan into the per-conversation cache.
#[derive(Debug)]
pub struct PlanTracker {
    conversation_id: Option<ConversationId>,
    current: Option<TrackedPlan>,
    cache: PlanCache,
    log: EventLog,
}

impl PlanTracker {
    pub fn new(cache: PlanCache, log: EventLog) -> Self {
        Self {
            conversation_id: None,
            current: None,
            cache,
            log,
        }
    }

    pub fn latest_plan(messages: &[Message]) -> Option<(&Message, &ExecutionPlan)> {
        latest_plan(messages)
    }

    pub fn conversation_id(&self) -> Option<&ConversationId> {
        self.conversation_id.as_ref()
    }

    pub fn current(&self) -> Option<&TrackedPlan> {
        self.current.as_ref()
    }

    pub fn plan(&self) -> Option<&ExecutionPlan> {
        self.current.as_ref().map(|tracked| &tracked.plan)
    }

    pub fn cache(&self) -> &PlanCache {
        &self.cache
    }

    /// Binds a draft conversation to the id the server just assigned, keeping the plan.
    pub fn attach(&mut self, conversation_id: &ConversationId) {
        if self.conversation_id.as_ref() != Some(conversation_id) {
            self.conversation_id = Some(conversation_id.clone());
        }
    }

    /// Forgets the in-memory plan without touching the cache.
    pub fn clear(&mut self) {
        self.conversation_id = None;
        self.current = None;
    }

    /// Switches to `conversation_id`. With no messages any cache entry under that id is
    /// stale and gets removed. Otherwise the newer of cache entry and latest plan message
    /// wins; a tie goes to the cache.
    pub fn enter_conversation(
        &mut self,
        conversation_id: &ConversationId,
        messages: &[Message],
    ) -> Option<PlanSource> {
        self.conversation_id = Some(conversation_id.clone());
        self.current = None;

        if messages.is_empty() {
            if let Err(err) = self.cache.clear(conversation_id) {
                self.log.warn(
                    "plan_cache.clear_failed",
                    &[
                        ("conversation_id", json!(conversation_id.as_str())),
                        ("error", json!(err.to_string())),
                    ],
                );
            }
            return None;
        }

        let cached = self.cache.load(conversation_id);
        let from_messages = latest_plan(messages).map(|(message, plan)| TrackedPlan {
            plan: plan.clone(),
            metadata: message.metadata.clone().unwrap_or_default(),
            timestamp: message.timestamp,
            source: PlanSource::Messages,
            flow_id: None,
            last_execution: None,
        });

        let chosen = match (cached, from_messages) {
            (Some(entry), Some(tracked)) if tracked.timestamp > entry.timestamp => {
                Some(TrackedPlan {
                    flow_id: entry.flow_id,
                    last_execution: entry.last_execution,
                    ..tracked
                })
            }
            (Some(entry), _) => Some(tracked_from_cache(entry)),
            (None, tracked) => tracked,
        };
        let source = chosen.as_ref().map(|tracked| tracked.source);
        if let Some(tracked) = chosen.as_ref() {
            self.log_violations(&tracked.plan.ordered().1);
            self.log.info(
                "plan.recovered",
                &[
                    ("conversation_id", json!(conversation_id.as_str())),
                    ("source", json!(tracked.source.as_str())),
                    ("steps", json!(tracked.plan.len())),
                ],
            );
        }
        self.current = chosen;
        source
    }

    /// Makes `plan` the current draft and persists it. Empty plans are ignored.
    pub fn adopt(
        &mut self,
        mut plan: ExecutionPlan,
        metadata: MessageMetadata,
        now_millis: i64,
    ) -> Option<AdoptReport> {
        if plan.is_empty() {
            return None;
        }
        let mut report = AdoptReport::default();
        let previous = self.current.take();
        if let Some(previous) = previous.as_ref() {
            report.violations.extend(plan.carry_over_metadata(&previous.plan));
            report.same_steps_as_previous = plan.same_steps(&previous.plan);
        }
        report.violations.extend(plan.ordered().1);
        self.log_violations(&report.violations);

        let (flow_id, last_execution) = previous
            .map(|previous| (previous.flow_id, previous.last_execution))
            .unwrap_or_default();
        let mut tracked = TrackedPlan {
            plan,
            metadata,
            timestamp: now_millis,
            source: PlanSource::Messages,
            flow_id,
            last_execution,
        };

        if let Some(conversation_id) = self.conversation_id.clone() {
            let entry = PlanCacheEntry {
                conversation_id: conversation_id.clone(),
                execution_plan: tracked.plan.clone(),
                metadata: tracked.metadata.clone(),
                timestamp: now_millis,
                flow_id: tracked.flow_id.clone(),
                last_execution: tracked.last_execution.clone(),
            };
            match self.cache.store(entry) {
                Ok(written) => {
                    tracked.timestamp = written.timestamp;
                    tracked.flow_id = written.flow_id;
                    tracked.last_execution = written.last_execution;
                    report.persisted = true;
                }
                Err(err) => self.log.warn(
                    "plan_cache.write_failed",
                    &[
                        ("conversation_id", json!(conversation_id.as_str())),
                        ("error", json!(err.to_string())),
                    ],
                ),
            }
        }
        self.log.info(
            "plan.adopted",
            &[
                ("steps", json!(tracked.plan.len())),
                ("same_steps", json!(report.same_steps_as_previous)),
                ("fingerprint", json!(tracked.plan.fingerprint())),
            ],
        );
        self.current = Some(tracked);
        Some(report)
    }

    /// Adopts the plan carried by an assistant message, if any.
    pub fn observe(&mut self, message: &Message, now_millis: i64) -> Option<AdoptReport> {
        let metadata = message.qualifying_metadata()?;
        let plan = metadata.plan()?.clone();
        self.adopt(plan, metadata.clone(), now_millis)
    }

    /// Updates the flow id in memory and in the cache.
    pub fn record_flow_id(&mut self, flow_id: Option<FlowId>, now_millis: i64) {
        if let Some(tracked) = self.current.as_mut() {
            tracked.flow_id = flow_id.clone();
        }
        let Some(conversation_id) = self.conversation_id.as_ref() else {
            return;
        };
        if let Err(err) = self.cache.set_flow_id(conversation_id, flow_id, now_millis) {
            self.log.warn(
                "plan_cache.write_failed",
                &[
                    ("conversation_id", json!(conversation_id.as_str())),
                    ("error", json!(err.to_string())),
                ],
            );
        }
    }

    /// Remembers which plan content was last run, in memory and in the cache.
    pub fn record_execution(&mut self, marker: ExecutionMarker, now_millis: i64) {
        if let Some(tracked) = self.current.as_mut() {
            tracked.last_execution = Some(marker.clone());
        }
        let Some(conversation_id) = self.conversation_id.as_ref() else {
            return;
        };
        if let Err(err) = self
            .cache
            .set_last_execution(conversation_id, marker, now_millis)
        {
            self.log.warn(
                "plan_cache.write_failed",
                &[
                    ("conversation_id", json!(conversation_id.as_str())),
                    ("error", json!(err.to_string())),
                ],
            );
        }
    }

    fn log_violations(&self, violations: &[ContractViolation]) {
        for violation in violations {
            self.log.warn(
                "plan.contract_violation",
                &[
                    (
                        "conversation_id",
                        json!(self.conversation_id.as_ref().map(ConversationId::as_str)),
                    ),
                    ("detail", json!(violation.to_string())),
                ],
            );
        }
    }
}

fn tracked_from_cache(entry: PlanCacheEntry) -> TrackedPlan {
    TrackedPlan {
        plan: entry.execution_plan,
        metadata: entry.metadata,
        timestamp: entry.timestamp,
        source: PlanSource::Cache,
        flow_id: entry.flow_id,
        last_execution: entry.last_execution,
    }
}
