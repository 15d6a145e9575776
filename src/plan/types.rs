use crate::shared::ids::{ActionId, NodeId};
use crate::shared::serde_ext::{null_as_empty_vec, value_is_missing};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParameterMeta {
    pub name: String,
    #[serde(rename = "type", default)]
    pub param_type: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub description: Option<String>,
}

/// One capability invocation. `id` is regenerated by the planner every turn and must
/// never be used to match steps across turns; use [`Step::key`] instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(default)]
    pub id: Option<String>,
    pub node_id: NodeId,
    pub action_id: ActionId,
    #[serde(default)]
    pub node_name: Option<String>,
    #[serde(default)]
    pub action_name: Option<String>,
    #[serde(default)]
    pub execution_step: Option<u32>,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(default, deserialize_with = "null_as_empty_vec")]
    pub parameter_metadata: Vec<ParameterMeta>,
}

impl Step {
    pub fn display_name(&self) -> String {
        match (self.node_name.as_deref(), self.action_name.as_deref()) {
            (Some(node), Some(action)) => format!("{node}: {action}"),
            (Some(node), None) => node.to_string(),
            (None, Some(action)) => action.to_string(),
            (None, None) => format!("{}/{}", self.node_id, self.action_id),
        }
    }

    /// Required parameters whose value is null, blank or absent. Without metadata every
    /// null-valued parameter counts as missing.
    pub fn missing_required_parameters(&self) -> Vec<String> {
        if self.parameter_metadata.is_empty() {
            return self
                .parameters
                .iter()
                .filter(|(_, value)| value.is_null())
                .map(|(name, _)| name.clone())
                .collect();
        }
        self.parameter_metadata
            .iter()
            .filter(|meta| meta.required)
            .filter(|meta| {
                self.parameters
                    .get(&meta.name)
                    .map(value_is_missing)
                    .unwrap_or(true)
            })
            .map(|meta| meta.name.clone())
            .collect()
    }
}

/// Cross-turn identity of a step: the capability pair plus its occurrence index among
/// steps with the same pair, counted in execution order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StepKey {
    pub node_id: NodeId,
    pub action_id: ActionId,
    pub occurrence: usize,
}

impl std::fmt::Display for StepKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}#{}", self.node_id, self.action_id, self.occurrence)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContractViolation {
    MissingExecutionStep {
        position: usize,
        node_id: NodeId,
        action_id: ActionId,
    },
    DuplicateExecutionStep {
        execution_step: u32,
    },
    EmptyParameterMetadata {
        node_id: NodeId,
        action_id: ActionId,
    },
}

impl std::fmt::Display for ContractViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingExecutionStep {
                position,
                node_id,
                action_id,
            } => write!(
                f,
                "step at position {position} ({node_id}/{action_id}) has no execution_step"
            ),
            Self::DuplicateExecutionStep { execution_step } => {
                write!(f, "execution_step {execution_step} appears more than once")
            }
            Self::EmptyParameterMetadata { node_id, action_id } => write!(
                f,
                "step {node_id}/{action_id} arrived without parameter metadata"
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionPlan {
    pub steps: Vec<Step>,
}

impl ExecutionPlan {
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Steps in `execution_step` order. Steps without an ordinal keep their relative
    /// array order after the ordered ones and are reported as violations, as are steps
    /// carrying parameters without any parameter metadata.
    pub fn ordered(&self) -> (Vec<&Step>, Vec<ContractViolation>) {
        let mut violations = Vec::new();
        let mut ordered = Vec::new();
        let mut unordered = Vec::new();
        let mut seen = BTreeMap::<u32, usize>::new();
        for (position, step) in self.steps.iter().enumerate() {
            if !step.parameters.is_empty() && step.parameter_metadata.is_empty() {
                violations.push(ContractViolation::EmptyParameterMetadata {
                    node_id: step.node_id.clone(),
                    action_id: step.action_id.clone(),
                });
            }
            match step.execution_step {
                Some(ordinal) => {
                    let count = seen.entry(ordinal).or_insert(0);
                    *count += 1;
                    if *count == 2 {
                        violations.push(ContractViolation::DuplicateExecutionStep {
                            execution_step: ordinal,
                        });
                    }
                    ordered.push((ordinal, position, step));
                }
                None => {
                    violations.push(ContractViolation::MissingExecutionStep {
                        position,
                        node_id: step.node_id.clone(),
                        action_id: step.action_id.clone(),
                    });
                    unordered.push(step);
                }
            }
        }
        ordered.sort_by_key(|(ordinal, position, _)| (*ordinal, *position));
        let mut steps = ordered
            .into_iter()
            .map(|(_, _, step)| step)
            .collect::<Vec<_>>();
        steps.extend(unordered);
        (steps, violations)
    }

    pub fn ordered_steps(&self) -> Vec<&Step> {
        self.ordered().0
    }

    pub fn keyed_steps(&self) -> Vec<(StepKey, &Step)> {
        let mut occurrences = BTreeMap::<(NodeId, ActionId), usize>::new();
        self.ordered_steps()
            .into_iter()
            .map(|step| {
                let counter = occurrences
                    .entry((step.node_id.clone(), step.action_id.clone()))
                    .or_insert(0);
                let key = StepKey {
                    node_id: step.node_id.clone(),
                    action_id: step.action_id.clone(),
                    occurrence: *counter,
                };
                *counter += 1;
                (key, step)
            })
            .collect()
    }

    pub fn step_keys(&self) -> Vec<StepKey> {
        self.keyed_steps().into_iter().map(|(key, _)| key).collect()
    }

    /// True when both plans describe the same logical steps in the same order,
    /// regardless of the planner's per-turn step ids.
    pub fn same_steps(&self, other: &ExecutionPlan) -> bool {
        self.step_keys() == other.step_keys()
    }

    /// Stable digest over ordered step keys and parameter values.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, step) in self.keyed_steps() {
            hasher.update(key.to_string().as_bytes());
            hasher.update([0u8]);
            let params = serde_json::to_string(&step.parameters).unwrap_or_default();
            hasher.update(params.as_bytes());
            hasher.update([0u8]);
        }
        hasher
            .finalize()
            .iter()
            .map(|byte| format!("{byte:02x}"))
            .collect()
    }

    pub fn missing_parameters(&self) -> Vec<(StepKey, Vec<String>)> {
        self.keyed_steps()
            .into_iter()
            .filter_map(|(key, step)| {
                let missing = step.missing_required_parameters();
                if missing.is_empty() {
                    None
                } else {
                    Some((key, missing))
                }
            })
            .collect()
    }

    pub fn has_missing_parameters(&self) -> bool {
        !self.missing_parameters().is_empty()
    }

    /// Restores parameter metadata dropped by the planner for steps that are logically
    /// the same as in `previous`. Each restored step is reported as a violation.
    pub fn carry_over_metadata(&mut self, previous: &ExecutionPlan) -> Vec<ContractViolation> {
        let previous_meta = previous
            .keyed_steps()
            .into_iter()
            .filter(|(_, step)| !step.parameter_metadata.is_empty())
            .map(|(key, step)| (key, step.parameter_metadata.clone()))
            .collect::<BTreeMap<_, _>>();
        if previous_meta.is_empty() {
            return Vec::new();
        }

        let positions = self
            .keyed_steps()
            .into_iter()
            .map(|(key, step)| {
                let position = self
                    .steps
                    .iter()
                    .position(|candidate| std::ptr::eq(candidate, step))
                    .unwrap_or(usize::MAX);
                (key, position)
            })
            .collect::<Vec<_>>();

        let mut violations = Vec::new();
        for (key, position) in positions {
            let Some(step) = self.steps.get_mut(position) else {
                continue;
            };
            if !step.parameter_metadata.is_empty() {
                continue;
            }
            if let Some(meta) = previous_meta.get(&key) {
                step.parameter_metadata = meta.clone();
                violations.push(ContractViolation::EmptyParameterMetadata {
                    node_id: step.node_id.clone(),
                    action_id: step.action_id.clone(),
                });
            }
        }
        violations
    }
}
