use crate::lifecycle::report::StepResult;
use crate::plan::types::ExecutionPlan;
use crate::session::message::{MessageMetadata, Role};
use crate::shared::ids::{ConversationId, FlowId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    pub text: String,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub continuation: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResponse {
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: MessageMetadata,
}

/// Decisions sent to the lifecycle endpoint. Activation goes through `flow_activate`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Save,
    Execute,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Save => "save",
            Self::Execute => "execute",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Always carries the full current plan, never a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionRequest {
    pub decision: Decision,
    pub conversation_id: ConversationId,
    pub execution_plan: ExecutionPlan,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecisionResponse {
    #[serde(default)]
    pub flow_id: Option<FlowId>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub steps: Option<Vec<StepResult>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateRequest {
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivateResponse {
    pub is_active: bool,
}

/// Server-side persisted representation of a saved plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    #[serde(alias = "id")]
    pub flow_id: FlowId,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
}

#[cfg(test)]
mod tests {
    use super::Decision;
    use serde_json::json;

    #[test]
    fn lifecycle_decisions_are_save_and_execute_only() {
        assert_eq!(serde_json::to_value(Decision::Save).expect("encode"), json!("save"));
        assert_eq!(
            serde_json::to_value(Decision::Execute).expect("encode"),
            json!("execute")
        );
        assert!(serde_json::from_value::<Decision>(json!("activate")).is_err());
    }
}
