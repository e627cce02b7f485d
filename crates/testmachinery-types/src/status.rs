//! Testrun status: the per-step status tree plus run-level bookkeeping.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::position::{ANNOTATION_FLOW, ANNOTATION_POSITION, StepKey};

/// Phase of a step or of the whole run.
///
/// Phases are totally ordered by [`Phase::rank`]: `Init` < `Running` <
/// terminal. Terminal phases are sticky.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Init,
    Running,
    Succeeded,
    Failed,
    Error,
    Skipped,
}

impl Phase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Phase::Succeeded | Phase::Failed | Phase::Error | Phase::Skipped
        )
    }

    /// Progress rank: `Init` = 0, `Running` = 1, any terminal phase = 2.
    pub fn rank(&self) -> u8 {
        match self {
            Phase::Init => 0,
            Phase::Running => 1,
            _ => 2,
        }
    }

    /// Severity of a terminal phase: `Succeeded` < `Skipped` < `Failed` < `Error`.
    ///
    /// Non-terminal phases have no severity.
    pub fn severity(&self) -> Option<u8> {
        match self {
            Phase::Succeeded => Some(0),
            Phase::Skipped => Some(1),
            Phase::Failed => Some(2),
            Phase::Error => Some(3),
            Phase::Init | Phase::Running => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "Init",
            Phase::Running => "Running",
            Phase::Succeeded => "Succeeded",
            Phase::Failed => "Failed",
            Phase::Error => "Error",
            Phase::Skipped => "Skipped",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Observed status of a Testrun.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestrunStatus {
    #[serde(default)]
    pub phase: Phase,

    /// Name of the generated workflow, once compiled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<i64>,

    /// Step status tree: one row per flow row, in execution order.
    #[serde(default)]
    pub steps: Vec<Vec<StepStatus>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
}

impl TestrunStatus {
    /// Number of steps in the tree.
    pub fn step_count(&self) -> usize {
        self.steps.iter().map(Vec::len).sum()
    }

    /// Shape of the tree: the length of every row.
    pub fn shape(&self) -> Vec<usize> {
        self.steps.iter().map(Vec::len).collect()
    }

    pub fn iter_steps(&self) -> impl Iterator<Item = &StepStatus> {
        self.steps.iter().flatten()
    }

    /// True once every step has reached a terminal phase.
    pub fn all_steps_terminal(&self) -> bool {
        self.iter_steps().all(|s| s.phase.is_terminal())
    }

    pub fn condition(&self, kind: ConditionType) -> Option<&Condition> {
        self.conditions.iter().find(|c| c.kind == kind)
    }

    /// Insert or replace the condition of the same type.
    ///
    /// `last_transition_time` only moves when the condition status changes.
    pub fn set_condition(&mut self, mut condition: Condition) {
        match self.conditions.iter_mut().find(|c| c.kind == condition.kind) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                }
                *existing = condition;
            }
            None => self.conditions.push(condition),
        }
    }
}

/// Status of a single step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepStatus {
    pub phase: Phase,

    pub test_definition: StepTestDefinition,

    /// Name of the compiled template executing this step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl StepStatus {
    /// A fresh `Init` step for `key`.
    pub fn new(key: &StepKey) -> Self {
        Self {
            phase: Phase::Init,
            test_definition: StepTestDefinition {
                name: key.testdefinition.clone(),
                position: key.position_map(),
            },
            template_name: None,
            started_at: None,
            completed_at: None,
        }
    }

    /// Join key of this step, `None` if the position map is incomplete.
    pub fn key(&self) -> Option<StepKey> {
        let position = self.test_definition.position.get(ANNOTATION_POSITION)?;
        let flow = self.test_definition.position.get(ANNOTATION_FLOW)?;
        Some(StepKey::new(
            flow.clone(),
            position.clone(),
            self.test_definition.name.clone(),
        ))
    }
}

/// Test definition reference carried by a step status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepTestDefinition {
    pub name: String,

    /// `position` and `flow` of the step.
    pub position: BTreeMap<String, String>,
}

/// Kinds of Testrun conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionType {
    /// Whether the flow compiled into a workflow.
    Compiled,
    /// Whether the last synchronization joined every step.
    Synchronized,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// A status condition in the usual Kubernetes shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub kind: ConditionType,

    pub status: ConditionStatus,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(
        kind: ConditionType,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Some(now),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_phase_ranks() {
        assert!(Phase::Init.rank() < Phase::Running.rank());
        for terminal in [Phase::Succeeded, Phase::Failed, Phase::Error, Phase::Skipped] {
            assert!(terminal.is_terminal());
            assert!(Phase::Running.rank() < terminal.rank());
        }
        assert!(!Phase::Running.is_terminal());
    }

    #[test]
    fn test_phase_severity_order() {
        let sev = |p: Phase| p.severity().unwrap();
        assert!(sev(Phase::Error) > sev(Phase::Failed));
        assert!(sev(Phase::Failed) > sev(Phase::Skipped));
        assert!(sev(Phase::Skipped) > sev(Phase::Succeeded));
        assert!(Phase::Running.severity().is_none());
    }

    #[test]
    fn test_phase_serialization() {
        assert_eq!(serde_json::to_string(&Phase::Succeeded).unwrap(), "\"Succeeded\"");
        let p: Phase = serde_json::from_str("\"Init\"").unwrap();
        assert_eq!(p, Phase::Init);
    }

    #[test]
    fn test_step_status_key_round_trip() {
        let key = StepKey::new("testflow", "2/1", "smoke");
        let step = StepStatus::new(&key);
        assert_eq!(step.phase, Phase::Init);
        assert_eq!(step.key(), Some(key));

        let json = serde_json::to_value(&step).unwrap();
        assert_eq!(json["testDefinition"]["position"]["position"], "2/1");
        assert_eq!(json["testDefinition"]["position"]["flow"], "testflow");
    }

    #[test]
    fn test_step_status_key_missing_flow() {
        let mut step = StepStatus::new(&StepKey::new("f", "0/0", "t"));
        step.test_definition.position.remove("flow");
        assert!(step.key().is_none());
    }

    #[test]
    fn test_set_condition_keeps_transition_time() {
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap();
        let mut status = TestrunStatus::default();

        status.set_condition(Condition::new(
            ConditionType::Synchronized,
            ConditionStatus::True,
            "",
            "",
            t0,
        ));
        status.set_condition(Condition::new(
            ConditionType::Synchronized,
            ConditionStatus::True,
            "Joined",
            "",
            t1,
        ));
        let cond = status.condition(ConditionType::Synchronized).unwrap();
        assert_eq!(cond.last_transition_time, Some(t0));
        assert_eq!(cond.reason, "Joined");

        status.set_condition(Condition::new(
            ConditionType::Synchronized,
            ConditionStatus::False,
            "DataConsistency",
            "",
            t1,
        ));
        let cond = status.condition(ConditionType::Synchronized).unwrap();
        assert_eq!(cond.last_transition_time, Some(t1));
        assert_eq!(status.conditions.len(), 1);
    }
}
