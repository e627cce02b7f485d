//! Status synchronizer: fold runtime node phases back into the step tree.
//!
//! Steps and templates are joined by their [`StepKey`]; runtime nodes are
//! joined to templates by template name. A step only ever moves forward
//! (`Init` -> `Running` -> terminal) and a terminal step is never touched
//! again, so synchronizing the same view twice changes nothing.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use testmachinery_config::ConflictPolicy;
use testmachinery_types::position::{ANNOTATION_FLOW, ANNOTATION_POSITION, ANNOTATION_TESTDEF_NAME};
use testmachinery_types::{Phase, StepKey, StepStatus, Testrun, Workflow};
use tracing::{debug, warn};

use crate::error::DataConsistencyWarning;

/// Outcome of one synchronization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Number of steps whose phase changed.
    pub updated: usize,
    pub warnings: Vec<DataConsistencyWarning>,
}

impl SyncReport {
    pub fn is_consistent(&self) -> bool {
        self.warnings.is_empty()
    }
}

/// Synchronize `testrun`'s step tree with `workflow`'s runtime nodes.
pub fn sync_status(testrun: &mut Testrun, workflow: &Workflow, policy: ConflictPolicy) -> SyncReport {
    sync_steps(&mut testrun.status.steps, workflow, policy, None)
}

/// Synchronize a step tree, stamping transitions with `now` when given.
pub fn sync_steps(
    steps: &mut [Vec<StepStatus>],
    workflow: &Workflow,
    policy: ConflictPolicy,
    now: Option<DateTime<Utc>>,
) -> SyncReport {
    let mut report = SyncReport::default();

    let templates = index_templates(workflow, &mut report.warnings);
    let observed = index_nodes(workflow, policy);

    for (row, row_steps) in steps.iter_mut().enumerate() {
        for (column, step) in row_steps.iter_mut().enumerate() {
            let Some(key) = step.key() else {
                report.warnings.push(DataConsistencyWarning::MalformedStep {
                    row,
                    column,
                    testdefinition: step.test_definition.name.clone(),
                });
                continue;
            };
            let Some(&template) = templates.get(&key) else {
                report
                    .warnings
                    .push(DataConsistencyWarning::MissingTemplate { key });
                continue;
            };

            if step.template_name.as_deref() != Some(template) {
                step.template_name = Some(template.to_string());
            }

            let Some(&phase) = observed.get(template) else {
                continue;
            };
            if advance(step, phase, now) {
                report.updated += 1;
            }
        }
    }

    for warning in &report.warnings {
        warn!(%warning, "Status synchronization skipped data");
    }
    debug!(
        updated = report.updated,
        warnings = report.warnings.len(),
        "Synchronized step status"
    );

    report
}

/// Move `step` to `observed` if that is progress. Returns whether it moved.
fn advance(step: &mut StepStatus, observed: Phase, now: Option<DateTime<Utc>>) -> bool {
    if step.phase.is_terminal() || observed.rank() <= step.phase.rank() {
        return false;
    }

    step.phase = observed;
    if let Some(now) = now {
        if step.started_at.is_none() {
            step.started_at = Some(now);
        }
        if observed.is_terminal() && step.completed_at.is_none() {
            step.completed_at = Some(now);
        }
    }
    true
}

/// `StepKey -> template name`. Templates without join annotations are skipped.
fn index_templates<'w>(
    workflow: &'w Workflow,
    warnings: &mut Vec<DataConsistencyWarning>,
) -> HashMap<StepKey, &'w str> {
    let mut index: HashMap<StepKey, &'w str> = HashMap::new();

    for template in &workflow.spec.templates {
        let annotations = &template.metadata.annotations;
        let Some(key) = template.step_key() else {
            let partial = [ANNOTATION_POSITION, ANNOTATION_FLOW, ANNOTATION_TESTDEF_NAME]
                .iter()
                .any(|k| annotations.contains_key(*k));
            if partial {
                warnings.push(DataConsistencyWarning::PartialAnnotations {
                    template: template.name.clone(),
                });
            }
            continue;
        };

        match index.get(&key) {
            Some(&kept) => warnings.push(DataConsistencyWarning::DuplicateTemplate {
                key,
                kept: kept.to_string(),
                ignored: template.name.clone(),
            }),
            None => {
                index.insert(key, template.name.as_str());
            }
        }
    }

    index
}

/// `template name -> phase`, resolving several nodes of one template.
///
/// Terminal beats `Running` beats absence; terminal conflicts go by `policy`.
fn index_nodes(workflow: &Workflow, policy: ConflictPolicy) -> HashMap<&str, Phase> {
    let mut index: HashMap<&str, Phase> = HashMap::new();

    for node in workflow.status.nodes.values() {
        if node.template_name.is_empty() {
            continue;
        }
        let Some(phase) = node.phase.observed() else {
            continue;
        };
        index
            .entry(node.template_name.as_str())
            .and_modify(|current| {
                if phase.rank() > current.rank()
                    || (phase.is_terminal()
                        && current.is_terminal()
                        && policy.prefers(phase, *current))
                {
                    *current = phase;
                }
            })
            .or_insert(phase);
    }

    index
}
