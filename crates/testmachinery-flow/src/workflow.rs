//! Workflow assembler: main and exit flow into one executable workflow.

use std::collections::BTreeMap;

use testmachinery_types::workflow::{LocalObjectReference, TtlStrategy, Volume, WorkflowSpec};
use testmachinery_types::{ObjectMeta, Workflow};

use crate::credentials::CredentialMounts;
use crate::testflow::CompiledFlow;

/// Entry template running the main flow.
pub const ENTRYPOINT: &str = "testrun";

/// Entry template running the exit flow.
pub const EXIT_HANDLER: &str = "exit-handler";

/// Label linking a workflow back to its Testrun.
pub const TESTRUN_LABEL: &str = "testmachinery.io/testrun";

/// Inputs of [`assemble`] besides the compiled flows.
#[derive(Debug, Clone, Copy)]
pub struct WorkflowParams<'a> {
    pub name: &'a str,
    pub namespace: &'a str,
    pub testrun: &'a str,
    pub pull_secrets: &'a [String],
    pub ttl_seconds: u32,
}

/// Build the workflow running `main` and, on exit, `exit`.
///
/// Pure: identical inputs give an identical workflow.
pub fn assemble(
    main: &CompiledFlow,
    exit: &CompiledFlow,
    mounts: &CredentialMounts,
    params: WorkflowParams<'_>,
) -> Workflow {
    let mut templates = vec![main.dag(ENTRYPOINT), exit.dag(EXIT_HANDLER)];
    for step in main.steps.iter().chain(exit.steps.iter()) {
        templates.push(step.template(mounts.for_step(step.is_untrusted())));
    }

    let mut volumes: Vec<Volume> = mounts.volumes().cloned().collect();
    for volume in main.volumes().into_iter().chain(exit.volumes()) {
        if !volumes.iter().any(|v| v.name == volume.name) {
            volumes.push(volume);
        }
    }

    let metadata = ObjectMeta {
        name: params.name.to_string(),
        namespace: Some(params.namespace.to_string()),
        labels: BTreeMap::from([(TESTRUN_LABEL.to_string(), params.testrun.to_string())]),
        annotations: BTreeMap::new(),
    };

    Workflow::new(
        metadata,
        WorkflowSpec {
            entrypoint: ENTRYPOINT.to_string(),
            on_exit: Some(EXIT_HANDLER.to_string()),
            templates,
            volumes,
            image_pull_secrets: params
                .pull_secrets
                .iter()
                .map(|name| LocalObjectReference { name: name.clone() })
                .collect(),
            ttl_strategy: Some(TtlStrategy {
                seconds_after_completion: params.ttl_seconds,
            }),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::{CredentialProvider, Credentials, SpecCredentialProvider};
    use crate::locations::InMemoryLocations;
    use crate::prepare;
    use crate::testflow::{
        EXIT_FLOW_ID, FlowContext, FlowInput, FlowKind, MAIN_FLOW_ID, compile_flow,
    };
    use testmachinery_types::{
        FlowBranch, KeyRef, KubeconfigSource, StepSpec, TestDefinition, TestFlow, Testrun,
        TestrunSpec,
    };

    fn compiled(
        main: &TestFlow,
        exit: &TestFlow,
        credentials: &Credentials,
    ) -> (CompiledFlow, CompiledFlow) {
        let resolver = InMemoryLocations::new()
            .with(TestDefinition::new("trusted", "img/trusted"))
            .with(TestDefinition::new("untrusted", "img/untrusted").untrusted())
            .with(TestDefinition::new("cleanup", "img/cleanup"));
        let ctx = FlowContext {
            resolver: &resolver,
            global_config: &[],
            testrun_id: "tr",
            credentials,
        };
        let main = compile_flow(
            FlowInput {
                id: MAIN_FLOW_ID,
                kind: FlowKind::Main,
                flow: main,
                bootstrap: prepare::bootstrap("prep"),
                teardown: None,
            },
            &ctx,
        )
        .unwrap();
        let exit = compile_flow(
            FlowInput {
                id: EXIT_FLOW_ID,
                kind: FlowKind::Exit,
                flow: exit,
                bootstrap: prepare::bootstrap("prep"),
                teardown: Some(prepare::teardown("prep")),
            },
            &ctx,
        )
        .unwrap();
        (main, exit)
    }

    fn params<'a>(pull_secrets: &'a [String]) -> WorkflowParams<'a> {
        WorkflowParams {
            name: "tr-wf",
            namespace: "tm",
            testrun: "tr",
            pull_secrets,
            ttl_seconds: 600,
        }
    }

    #[test]
    fn test_entry_points_and_templates() {
        let main = TestFlow::new(vec![FlowBranch::new("b", vec![StepSpec::new("trusted")])]);
        let exit = TestFlow::new(vec![FlowBranch::new("c", vec![StepSpec::new("cleanup")])]);
        let (main, exit) = compiled(&main, &exit, &Credentials::default());

        let secrets = vec!["registry".to_string()];
        let wf = assemble(&main, &exit, &CredentialMounts::default(), params(&secrets));

        assert_eq!(wf.spec.entrypoint, "testrun");
        assert_eq!(wf.spec.on_exit.as_deref(), Some("exit-handler"));
        assert_eq!(wf.spec.templates.len(), 2 + 2 + 3);
        assert!(wf.template("testrun").unwrap().dag.is_some());
        assert_eq!(
            wf.template("exit-handler").unwrap().dag.as_ref().unwrap().tasks.len(),
            3
        );
        assert_eq!(wf.spec.ttl_strategy.as_ref().unwrap().seconds_after_completion, 600);
        assert_eq!(wf.spec.image_pull_secrets[0].name, "registry");
        assert_eq!(wf.metadata.namespace.as_deref(), Some("tm"));
        assert_eq!(wf.metadata.labels[TESTRUN_LABEL], "tr");

        // Entry templates carry no join annotations
        assert!(wf.template("testrun").unwrap().step_key().is_none());
    }

    #[test]
    fn test_untrusted_steps_only_get_shoot() {
        let mut spec = TestrunSpec::default();
        spec.kubeconfigs.insert(
            "shoot".into(),
            KubeconfigSource::Secret(KeyRef::new("shoot-kc", "kubeconfig")),
        );
        spec.kubeconfigs.insert(
            "gardener".into(),
            KubeconfigSource::Secret(KeyRef::new("garden-kc", "kubeconfig")),
        );
        let credentials = SpecCredentialProvider
            .parse(&Testrun::new("tr", spec))
            .unwrap();
        let mounts = credentials.mounts();

        let main = TestFlow::new(vec![FlowBranch::new(
            "b",
            vec![StepSpec::new("trusted"), StepSpec::new("untrusted")],
        )]);
        let (main, exit) = compiled(&main, &TestFlow::default(), &credentials);
        let wf = assemble(&main, &exit, &mounts, params(&[]));

        let mount_names = |template: &str| -> Vec<String> {
            wf.template(template)
                .unwrap()
                .container
                .as_ref()
                .unwrap()
                .volume_mounts
                .iter()
                .map(|m| m.name.clone())
                .collect()
        };
        assert_eq!(
            mount_names("testflow-trusted-0-0"),
            vec!["kubeconfig-gardener", "kubeconfig-shoot"]
        );
        assert_eq!(mount_names("testflow-untrusted-0-1"), vec!["kubeconfig-shoot"]);
        assert_eq!(
            mount_names("testflow-prepare-1-0"),
            vec!["kubeconfig-gardener", "kubeconfig-shoot"]
        );

        // Each credential volume declared once
        assert_eq!(wf.spec.volumes.len(), 2);
    }

    #[test]
    fn test_assemble_is_deterministic() {
        let main = TestFlow::new(vec![FlowBranch::new("b", vec![StepSpec::new("trusted")])]);
        let (main, exit) = compiled(&main, &TestFlow::default(), &Credentials::default());
        let a = assemble(&main, &exit, &CredentialMounts::default(), params(&[]));
        let b = assemble(&main, &exit, &CredentialMounts::default(), params(&[]));
        assert_eq!(a, b);
    }
}
