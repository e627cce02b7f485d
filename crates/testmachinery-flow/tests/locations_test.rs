//! Compiling against definitions loaded from disk, with credentials.

use std::fs;

use tempfile::TempDir;
use testmachinery_flow::{
    CompileContext, LocalLocations, Locations, SpecCredentialProvider, compile,
};
use testmachinery_types::workflow::VolumeSource;
use testmachinery_types::{
    FlowBranch, KeyRef, KubeconfigSource, LocationSpec, StepSpec, TestDefinition, TestFlow,
    Testrun, TestrunSpec,
};

fn write_definitions(dir: &TempDir) {
    fs::write(
        dir.path().join("create.toml"),
        r#"
name = "create"
image = "registry/create:1.0"
command = ["/create.sh"]
"#,
    )
    .unwrap();
    fs::write(
        dir.path().join("probe.yaml"),
        "name: probe\nimage: registry/probe:1.0\nuntrusted: true\n",
    )
    .unwrap();
}

fn testrun() -> Testrun {
    let mut spec = TestrunSpec {
        testflow: TestFlow::new(vec![FlowBranch::new(
            "main",
            vec![StepSpec::new("create"), StepSpec::new("probe")],
        )]),
        ..Default::default()
    };
    spec.kubeconfigs.insert(
        "shoot".into(),
        KubeconfigSource::Secret(KeyRef::new("shoot-kc", "kubeconfig")),
    );
    spec.kubeconfigs.insert(
        "gardener".into(),
        KubeconfigSource::Secret(KeyRef::new("garden-kc", "kubeconfig")),
    );
    Testrun::new("local", spec)
}

#[test]
fn test_local_definitions_compile() {
    let dir = TempDir::new().unwrap();
    write_definitions(&dir);

    let locations = LocalLocations::load(dir.path()).unwrap();
    assert_eq!(locations.len(), 2);

    let provider = SpecCredentialProvider;
    let ctx = CompileContext::new(&locations, &provider);
    let compiled = compile(&testrun(), &ctx).unwrap();
    let wf = compiled.workflow("local-wf", "default", &[]);

    let create = wf.template("testflow-create-0-0").unwrap();
    let container = create.container.as_ref().unwrap();
    assert_eq!(container.image, "registry/create:1.0");
    assert_eq!(container.command, vec!["/create.sh"]);

    // The definitions' directory is exposed to the step
    assert!(container.volume_mounts.iter().any(|m| m.mount_path == "/src"));
    assert!(wf.spec.volumes.iter().any(|v| matches!(
        &v.source,
        VolumeSource::HostPath(h) if h.path == dir.path().display().to_string()
    )));
}

#[test]
fn test_untrusted_step_only_sees_shoot() {
    let dir = TempDir::new().unwrap();
    write_definitions(&dir);
    let locations = LocalLocations::load(dir.path()).unwrap();
    let provider = SpecCredentialProvider;
    let ctx = CompileContext::new(&locations, &provider);
    let wf = compile(&testrun(), &ctx)
        .unwrap()
        .workflow("local-wf", "default", &[]);

    let kubeconfig_mounts = |name: &str| -> Vec<String> {
        wf.template(name)
            .unwrap()
            .container
            .as_ref()
            .unwrap()
            .volume_mounts
            .iter()
            .filter(|m| m.name.starts_with("kubeconfig-"))
            .map(|m| m.name.clone())
            .collect()
    };

    assert_eq!(
        kubeconfig_mounts("testflow-create-0-0"),
        vec!["kubeconfig-gardener", "kubeconfig-shoot"]
    );
    assert_eq!(kubeconfig_mounts("testflow-probe-0-1"), vec!["kubeconfig-shoot"]);
}

#[test]
fn test_inline_definitions_shadow_local_ones() {
    let dir = TempDir::new().unwrap();
    write_definitions(&dir);

    let specs = vec![
        LocationSpec::Inline {
            definitions: vec![TestDefinition::new("create", "registry/create:inline")],
        },
        LocationSpec::Local {
            host_path: dir.path().to_path_buf(),
        },
    ];
    let locations = Locations::from_specs(&specs, dir.path()).unwrap();
    let provider = SpecCredentialProvider;
    let ctx = CompileContext::new(&locations, &provider);
    let wf = compile(&testrun(), &ctx)
        .unwrap()
        .workflow("local-wf", "default", &[]);

    let image = |name: &str| {
        wf.template(name)
            .unwrap()
            .container
            .as_ref()
            .unwrap()
            .image
            .clone()
    };
    assert_eq!(image("testflow-create-0-0"), "registry/create:inline");
    assert_eq!(image("testflow-probe-0-1"), "registry/probe:1.0");
}

#[test]
fn test_broken_definition_file_fails_load() {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("bad.toml"), "name = \"bad\"\n").unwrap();
    assert!(LocalLocations::load(dir.path()).is_err());
}
