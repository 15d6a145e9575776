use crate::shared::ids::{ActionId, NodeId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[serde(alias = "succeeded", alias = "ok")]
    Success,
    #[serde(alias = "error", alias = "failure")]
    Failed,
    Skipped,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    #[serde(default)]
    pub step_id: Option<String>,
    #[serde(default)]
    pub node_id: Option<NodeId>,
    #[serde(default)]
    pub action_id: Option<ActionId>,
    #[serde(default)]
    pub name: Option<String>,
    pub status: StepStatus,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

impl StepResult {
    pub fn label(&self, position: usize) -> String {
        if let Some(name) = self.name.as_deref() {
            return name.to_string();
        }
        match (self.node_id.as_ref(), self.action_id.as_ref()) {
            (Some(node), Some(action)) => format!("{node}/{action}"),
            _ => format!("step {}", position + 1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOutcome {
    Succeeded,
    Partial,
    Failed,
    /// Every step was skipped; nothing ran.
    Skipped,
    NoSteps,
}

/// Per-step result of an execution. Partial success is a normal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub steps: Vec<StepResult>,
    pub outcome: ExecutionOutcome,
}

impl ExecutionReport {
    pub fn from_steps(steps: Vec<StepResult>) -> Self {
        let succeeded = steps
            .iter()
            .filter(|step| step.status == StepStatus::Success)
            .count();
        let failed = steps
            .iter()
            .filter(|step| matches!(step.status, StepStatus::Failed | StepStatus::Unknown))
            .count();
        let outcome = if steps.is_empty() {
            ExecutionOutcome::NoSteps
        } else if failed == 0 && succeeded == 0 {
            ExecutionOutcome::Skipped
        } else if failed == 0 {
            ExecutionOutcome::Succeeded
        } else if succeeded > 0 {
            ExecutionOutcome::Partial
        } else {
            ExecutionOutcome::Failed
        };
        Self { steps, outcome }
    }

    pub fn succeeded(&self) -> usize {
        self.steps
            .iter()
            .filter(|step| step.status == StepStatus::Success)
            .count()
    }

    pub fn summary(&self) -> String {
        let headline = match self.outcome {
            ExecutionOutcome::Succeeded => "Workflow run succeeded".to_string(),
            ExecutionOutcome::Partial => format!(
                "Workflow run partially succeeded ({} of {} steps)",
                self.succeeded(),
                self.steps.len()
            ),
            ExecutionOutcome::Failed => "Workflow run failed".to_string(),
            ExecutionOutcome::Skipped => {
                format!("Workflow run skipped all {} steps", self.steps.len())
            }
            ExecutionOutcome::NoSteps => "Workflow run returned no step results".to_string(),
        };
        let mut lines = vec![headline];
        for (position, step) in self.steps.iter().enumerate() {
            let status = match step.status {
                StepStatus::Success => "ok",
                StepStatus::Failed => "failed",
                StepStatus::Skipped => "skipped",
                StepStatus::Unknown => "unknown",
            };
            let mut line = format!("{}. {} [{status}]", position + 1, step.label(position));
            if let Some(duration) = step.duration_ms {
                line.push_str(&format!(" {duration}ms"));
            }
            if let Some(error) = step.error.as_deref() {
                line.push_str(&format!(": {error}"));
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// Remembers which plan content an execution ran against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionMarker {
    pub plan_fingerprint: String,
    pub outcome: ExecutionOutcome,
    pub finished_at: i64,
}
