//! One reconciliation pass over a Testrun.
//!
//! Without a workflow the Testrun is compiled and the step tree initialized.
//! With one, runtime phases are synchronized and the run phase derived from
//! the workflow's overall phase. Finished runs are left alone.

use chrono::{DateTime, Utc};
use testmachinery_config::ConflictPolicy;
use testmachinery_types::{Condition, ConditionStatus, ConditionType, Phase, Testrun, Workflow};
use tracing::{info, warn};

use crate::compile::{CompileContext, compile, workflow_name};
use crate::sync::{SyncReport, sync_steps};

/// What a reconciliation pass did.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The Testrun compiled; the workflow should be submitted.
    Compiled(Box<Workflow>),
    /// Compilation failed; the run is now in `Error`.
    Failed,
    /// Step status was synchronized against the workflow.
    Synced(SyncReport),
    /// The run was already finished.
    Finished,
}

/// Drives Testruns from compilation to completion.
#[derive(Clone, Copy)]
pub struct Reconciler<'a> {
    pub ctx: CompileContext<'a>,
    /// Namespace used when the Testrun has none.
    pub namespace: &'a str,
    pub pull_secrets: &'a [String],
    pub policy: ConflictPolicy,
}

impl<'a> Reconciler<'a> {
    pub fn new(ctx: CompileContext<'a>, namespace: &'a str) -> Self {
        Self {
            ctx,
            namespace,
            pull_secrets: &[],
            policy: ConflictPolicy::default(),
        }
    }

    pub fn with_pull_secrets(mut self, pull_secrets: &'a [String]) -> Self {
        self.pull_secrets = pull_secrets;
        self
    }

    pub fn with_policy(mut self, policy: ConflictPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Reconcile `testrun` against its workflow, if one exists yet.
    pub fn reconcile(
        &self,
        testrun: &mut Testrun,
        workflow: Option<&Workflow>,
        now: DateTime<Utc>,
    ) -> ReconcileOutcome {
        if testrun.status.phase.is_terminal() {
            return ReconcileOutcome::Finished;
        }

        match workflow {
            None => self.compile(testrun, now),
            Some(workflow) => self.sync(testrun, workflow, now),
        }
    }

    fn compile(&self, testrun: &mut Testrun, now: DateTime<Utc>) -> ReconcileOutcome {
        match compile(testrun, &self.ctx) {
            Ok(compiled) => {
                let name = workflow_name(testrun.name());
                let namespace = testrun
                    .metadata
                    .namespace
                    .as_deref()
                    .unwrap_or(self.namespace);
                let workflow = compiled.workflow(&name, namespace, self.pull_secrets);

                let status = &mut testrun.status;
                status.steps = compiled.status_rows();
                status.workflow = Some(name.clone());
                status.phase = Phase::Init;
                status.set_condition(Condition::new(
                    ConditionType::Compiled,
                    ConditionStatus::True,
                    "Compiled",
                    format!("workflow {} with {} steps", name, compiled.step_count()),
                    now,
                ));

                info!(
                    testrun = testrun.name(),
                    workflow = %name,
                    steps = compiled.step_count(),
                    "Compiled testrun"
                );
                ReconcileOutcome::Compiled(Box::new(workflow))
            }
            Err(e) => {
                warn!(testrun = testrun.name(), error = %e, "Failed to compile testrun");
                let status = &mut testrun.status;
                status.phase = Phase::Error;
                status.completed_at = Some(now);
                status.set_condition(Condition::new(
                    ConditionType::Compiled,
                    ConditionStatus::False,
                    e.reason(),
                    e.to_string(),
                    now,
                ));
                ReconcileOutcome::Failed
            }
        }
    }

    fn sync(&self, testrun: &mut Testrun, workflow: &Workflow, now: DateTime<Utc>) -> ReconcileOutcome {
        let report = sync_steps(&mut testrun.status.steps, workflow, self.policy, Some(now));

        let condition = if report.is_consistent() {
            Condition::new(
                ConditionType::Synchronized,
                ConditionStatus::True,
                "Synchronized",
                "",
                now,
            )
        } else {
            let stale: Vec<String> = report.warnings.iter().map(|w| w.to_string()).collect();
            Condition::new(
                ConditionType::Synchronized,
                ConditionStatus::False,
                "DataConsistency",
                stale.join("; "),
                now,
            )
        };
        testrun.status.set_condition(condition);

        if let Some(observed) = workflow.status.phase.and_then(|p| p.observed()) {
            let status = &mut testrun.status;
            let advanced = observed.rank() > status.phase.rank();
            if advanced {
                status.phase = observed;
            }
            if status.phase.rank() > 0 && status.started_at.is_none() {
                status.started_at = Some(workflow.status.started_at.unwrap_or(now));
            }
            if status.phase.is_terminal() && status.completed_at.is_none() {
                let completed = workflow.status.finished_at.unwrap_or(now);
                status.completed_at = Some(completed);
                status.duration_seconds = status
                    .started_at
                    .map(|started| (completed - started).num_seconds().max(0));
            }
            if advanced {
                info!(testrun = testrun.name(), phase = %observed, "Testrun phase changed");
            }
        }

        ReconcileOutcome::Synced(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::SpecCredentialProvider;
    use crate::locations::InMemoryLocations;
    use chrono::TimeZone;
    use testmachinery_types::{
        FlowBranch, NodePhase, NodeStatus, StepSpec, TestDefinition, TestFlow, TestrunSpec,
    };

    fn testrun(definition: &str) -> Testrun {
        Testrun::new(
            "tr",
            TestrunSpec {
                testflow: TestFlow::new(vec![FlowBranch::new(
                    "main",
                    vec![StepSpec::new(definition)],
                )]),
                ..Default::default()
            },
        )
    }

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 10, minute, 0).unwrap()
    }

    #[test]
    fn test_compile_then_complete() {
        let resolver = InMemoryLocations::new().with(TestDefinition::new("smoke", "busybox"));
        let provider = SpecCredentialProvider;
        let reconciler = Reconciler::new(CompileContext::new(&resolver, &provider), "tm");
        let mut tr = testrun("smoke");

        let mut workflow = match reconciler.reconcile(&mut tr, None, at(0)) {
            ReconcileOutcome::Compiled(wf) => *wf,
            other => panic!("expected compiled, got {:?}", other),
        };
        assert_eq!(workflow.metadata.name, "tr-wf");
        assert_eq!(workflow.metadata.namespace.as_deref(), Some("tm"));
        assert_eq!(tr.status.workflow.as_deref(), Some("tr-wf"));
        assert_eq!(tr.status.phase, Phase::Init);
        assert_eq!(tr.status.step_count(), 4);
        assert_eq!(
            tr.status.condition(ConditionType::Compiled).unwrap().status,
            ConditionStatus::True
        );

        // Every template ran and succeeded
        let names: Vec<String> = workflow
            .spec
            .templates
            .iter()
            .filter(|t| t.container.is_some())
            .map(|t| t.name.clone())
            .collect();
        for (i, name) in names.iter().enumerate() {
            workflow
                .status
                .nodes
                .insert(format!("n{}", i), NodeStatus::new(name, NodePhase::Succeeded));
        }
        workflow.status.phase = Some(NodePhase::Succeeded);
        workflow.status.started_at = Some(at(1));
        workflow.status.finished_at = Some(at(5));

        let report = match reconciler.reconcile(&mut tr, Some(&workflow), at(6)) {
            ReconcileOutcome::Synced(report) => report,
            other => panic!("expected synced, got {:?}", other),
        };
        assert_eq!(report.updated, 4);
        assert!(tr.status.all_steps_terminal());
        assert_eq!(tr.status.phase, Phase::Succeeded);
        assert_eq!(tr.status.started_at, Some(at(1)));
        assert_eq!(tr.status.completed_at, Some(at(5)));
        assert_eq!(tr.status.duration_seconds, Some(240));

        // Terminal runs are left untouched
        let before = tr.clone();
        assert_eq!(
            reconciler.reconcile(&mut tr, Some(&workflow), at(9)),
            ReconcileOutcome::Finished
        );
        assert_eq!(tr, before);
    }

    #[test]
    fn test_compile_failure_sets_condition() {
        let resolver = InMemoryLocations::new();
        let provider = SpecCredentialProvider;
        let reconciler = Reconciler::new(CompileContext::new(&resolver, &provider), "tm");
        let mut tr = testrun("missing");

        assert_eq!(
            reconciler.reconcile(&mut tr, None, at(0)),
            ReconcileOutcome::Failed
        );
        assert_eq!(tr.status.phase, Phase::Error);
        let condition = tr.status.condition(ConditionType::Compiled).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "SpecificationError");
        assert!(condition.message.contains("missing"));
        assert!(tr.status.steps.is_empty());
    }

    #[test]
    fn test_data_consistency_condition() {
        let resolver = InMemoryLocations::new().with(TestDefinition::new("smoke", "busybox"));
        let provider = SpecCredentialProvider;
        let reconciler = Reconciler::new(CompileContext::new(&resolver, &provider), "tm");
        let mut tr = testrun("smoke");

        let mut workflow = match reconciler.reconcile(&mut tr, None, at(0)) {
            ReconcileOutcome::Compiled(wf) => *wf,
            other => panic!("expected compiled, got {:?}", other),
        };
        // Drop the user step's template
        workflow.spec.templates.retain(|t| t.name != "testflow-smoke-0-0");
        workflow.status.phase = Some(NodePhase::Running);

        reconciler.reconcile(&mut tr, Some(&workflow), at(1));
        let condition = tr.status.condition(ConditionType::Synchronized).unwrap();
        assert_eq!(condition.status, ConditionStatus::False);
        assert_eq!(condition.reason, "DataConsistency");
        assert!(condition.message.contains("smoke@testflow:0/0"));
        assert_eq!(tr.status.phase, Phase::Running);
        assert_eq!(tr.status.started_at, Some(at(1)));
    }
}
