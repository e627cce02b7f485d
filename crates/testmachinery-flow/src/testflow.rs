//! Flow compiler: turns a test flow into status rows and annotated templates.
//!
//! Branches are walked in declaration order. A user step at branch `i`,
//! index `j` gets position `"i/j"`. The bootstrap step sits at `"n/0"` and the
//! teardown step (exit flow only) at `"n+1/0"`, `n` being the branch count, so
//! synthesized steps never shift user positions.
//!
//! Dependencies default to "previous step in the branch"; the first step of
//! a branch depends on the bootstrap step. Explicit `dependsOn` hints replace
//! the default and may point into other branches. Such joins only add DAG
//! edges, positions stay untouched.

use std::collections::{BTreeMap, HashMap, HashSet};

use testmachinery_config::{ConfigEntry, ConfigKey, ConfigLevel, ConfigValue, LayeredConfig};
use testmachinery_types::workflow::{
    Artifact, ConfigMapVolumeSource, Container, ContinueOn, DagTask, DagTemplate, EnvVar,
    HostPathVolumeSource, Inputs, RawArtifact, SecretVolumeSource, TemplateMetadata, Volume,
    VolumeMount, VolumeSource,
};
use testmachinery_types::{
    ConfigElement, ConfigSource, FlowBranch, Position, StepCondition, StepKey, StepStatus,
    Template, TestDefinition, TestFlow,
};
use tracing::debug;

use crate::credentials::{CredentialMount, Credentials, KUBECONFIG_PATH};
use crate::error::{ResolveError, Result, SpecificationError};
use crate::locations::TestDefinitionResolver;

/// Flow id of the main flow.
pub const MAIN_FLOW_ID: &str = "testflow";

/// Flow id of the exit flow.
pub const EXIT_FLOW_ID: &str = "exit";

pub const ENV_TESTRUN_ID: &str = "TM_TESTRUN_ID";
pub const ENV_PHASE: &str = "TM_PHASE";
pub const ENV_KUBECONFIG_PATH: &str = "TM_KUBECONFIG_PATH";

/// Where a locally loaded test definition's directory is mounted.
pub const SOURCE_PATH: &str = "/src";

/// Which of the two flows of a Testrun is compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowKind {
    Main,
    Exit,
}

impl FlowKind {
    /// Value of `TM_PHASE` for steps of this flow.
    pub fn phase(&self) -> &'static str {
        match self {
            FlowKind::Main => "Running",
            FlowKind::Exit => "Exit",
        }
    }
}

/// One flow to compile.
#[derive(Debug, Clone)]
pub struct FlowInput<'a> {
    pub id: &'a str,
    pub kind: FlowKind,
    pub flow: &'a TestFlow,
    pub bootstrap: TestDefinition,
    pub teardown: Option<TestDefinition>,
}

/// Everything the compiler reads besides the flow itself.
#[derive(Clone, Copy)]
pub struct FlowContext<'a> {
    pub resolver: &'a dyn TestDefinitionResolver,
    pub global_config: &'a [ConfigElement],
    pub testrun_id: &'a str,
    pub credentials: &'a Credentials,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepRole {
    Bootstrap,
    User,
    Teardown,
}

/// A step ready to be rendered into a template and a DAG task.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStep {
    pub key: StepKey,
    pub role: StepRole,
    /// Template name, also used as the DAG task name.
    pub name: String,
    pub definition: TestDefinition,
    /// Effective config after layering.
    pub config: Vec<ConfigEntry>,
    /// Names of the steps this one waits for.
    pub dependencies: Vec<String>,
    pub continue_on_error: bool,
    pub condition: StepCondition,
    /// Environment injected by the controller.
    pub env: Vec<EnvVar>,
}

impl CompiledStep {
    /// Untrusted user steps only get the system-under-test credentials.
    pub fn is_untrusted(&self) -> bool {
        self.role == StepRole::User && self.definition.untrusted
    }

    /// Render the container template, mounting `credential_mounts`.
    pub fn template(&self, credential_mounts: &[CredentialMount]) -> Template {
        let rendered = self.render_config();

        let mut annotations = BTreeMap::new();
        self.key.annotate(&mut annotations);

        let mut volume_mounts = rendered.mounts;
        if let Some(volume) = self.source_volume() {
            volume_mounts.push(VolumeMount {
                name: volume.name,
                mount_path: SOURCE_PATH.to_string(),
                sub_path: None,
                read_only: true,
            });
        }
        volume_mounts.extend(credential_mounts.iter().map(|m| m.mount.clone()));

        Template {
            name: self.name.clone(),
            metadata: TemplateMetadata { annotations },
            container: Some(Container {
                image: self.definition.image.clone(),
                command: self.definition.command.clone(),
                args: self.definition.args.clone(),
                env: rendered.env,
                volume_mounts,
            }),
            dag: None,
            inputs: (!rendered.artifacts.is_empty()).then(|| Inputs {
                artifacts: rendered.artifacts,
            }),
            active_deadline_seconds: self.definition.active_deadline_seconds,
        }
    }

    /// The DAG task invoking this step's template.
    pub fn task(&self) -> DagTask {
        DagTask {
            name: self.name.clone(),
            template: self.name.clone(),
            dependencies: self.dependencies.clone(),
            continue_on: self.continue_on_error.then_some(ContinueOn {
                failed: true,
                error: true,
            }),
            when: self.condition.when_expression().map(str::to_string),
        }
    }

    /// Volumes this step's template refers to, credentials excluded.
    pub fn volumes(&self) -> Vec<Volume> {
        let mut volumes = self.render_config().volumes;
        volumes.extend(self.source_volume());
        volumes
    }

    fn source_volume(&self) -> Option<Volume> {
        let origin = self.definition.origin.as_ref()?;
        let path = origin.display().to_string();
        Some(Volume {
            name: format!("source-{:08x}", fnv1a(path.as_bytes())),
            source: VolumeSource::HostPath(HostPathVolumeSource { path }),
        })
    }

    fn render_config(&self) -> RenderedConfig {
        let mut rendered = RenderedConfig {
            env: self.env.clone(),
            ..Default::default()
        };
        let reserved: HashSet<&str> = self.env.iter().map(|e| e.name.as_str()).collect();

        for entry in &self.config {
            match &entry.key {
                ConfigKey::Env(name) => {
                    if reserved.contains(name.as_str()) {
                        continue;
                    }
                    rendered.env.push(match &entry.value {
                        ConfigValue::Literal(value) => EnvVar::literal(name, value),
                        ConfigValue::SecretKey(r) => EnvVar {
                            name: name.clone(),
                            value: None,
                            value_from: Some(ConfigSource::secret(&r.name, &r.key)),
                        },
                        ConfigValue::ConfigMapKey(r) => EnvVar {
                            name: name.clone(),
                            value: None,
                            value_from: Some(ConfigSource::config_map(&r.name, &r.key)),
                        },
                    });
                }
                ConfigKey::File(name) => {
                    let path = entry.path.clone().unwrap_or_default();
                    match &entry.value {
                        ConfigValue::Literal(data) => rendered.artifacts.push(Artifact {
                            name: format!("config-{}", sanitize(name)),
                            path,
                            raw: Some(RawArtifact { data: data.clone() }),
                        }),
                        ConfigValue::SecretKey(r) => {
                            let volume = Volume {
                                name: format!("config-secret-{:08x}", fnv1a(r.name.as_bytes())),
                                source: VolumeSource::Secret(SecretVolumeSource {
                                    secret_name: r.name.clone(),
                                }),
                            };
                            rendered.mount(volume, path, &r.key);
                        }
                        ConfigValue::ConfigMapKey(r) => {
                            let volume = Volume {
                                name: format!("config-configmap-{:08x}", fnv1a(r.name.as_bytes())),
                                source: VolumeSource::ConfigMap(ConfigMapVolumeSource {
                                    name: r.name.clone(),
                                }),
                            };
                            rendered.mount(volume, path, &r.key);
                        }
                    }
                }
            }
        }
        rendered
    }
}

#[derive(Debug, Default)]
struct RenderedConfig {
    env: Vec<EnvVar>,
    artifacts: Vec<Artifact>,
    mounts: Vec<VolumeMount>,
    volumes: Vec<Volume>,
}

impl RenderedConfig {
    fn mount(&mut self, volume: Volume, path: String, key: &str) {
        self.mounts.push(VolumeMount {
            name: volume.name.clone(),
            mount_path: path,
            sub_path: Some(key.to_string()),
            read_only: true,
        });
        if !self.volumes.iter().any(|v| v.name == volume.name) {
            self.volumes.push(volume);
        }
    }
}

/// Output of compiling one flow.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledFlow {
    pub id: String,
    pub kind: FlowKind,
    /// Status rows in execution order: bootstrap, branches, teardown.
    pub rows: Vec<Vec<StepStatus>>,
    /// Compiled steps; bootstrap first, teardown last.
    pub steps: Vec<CompiledStep>,
}

impl CompiledFlow {
    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    pub fn step(&self, key: &StepKey) -> Option<&CompiledStep> {
        self.steps.iter().find(|s| &s.key == key)
    }

    /// The DAG template running this flow under `entry_name`.
    pub fn dag(&self, entry_name: &str) -> Template {
        Template {
            name: entry_name.to_string(),
            dag: Some(DagTemplate {
                tasks: self.steps.iter().map(CompiledStep::task).collect(),
            }),
            ..Default::default()
        }
    }

    /// Non-credential volumes of all steps, deduplicated by name.
    pub fn volumes(&self) -> Vec<Volume> {
        let mut volumes: Vec<Volume> = Vec::new();
        for volume in self.steps.iter().flat_map(CompiledStep::volumes) {
            if !volumes.iter().any(|v| v.name == volume.name) {
                volumes.push(volume);
            }
        }
        volumes
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Compilation
// ─────────────────────────────────────────────────────────────────────────────

/// Reject flow ids used more than once within one workflow.
///
/// Positions are only unique within a flow, so the flow id is part of every
/// join key.
pub fn check_flow_ids(ids: &[&str]) -> std::result::Result<(), SpecificationError> {
    let mut seen = HashSet::new();
    for id in ids {
        if !seen.insert(*id) {
            return Err(SpecificationError::DuplicateFlow(id.to_string()));
        }
    }
    Ok(())
}

/// Compile a single flow.
pub fn compile_flow(input: FlowInput<'_>, ctx: &FlowContext<'_>) -> Result<CompiledFlow> {
    let flow_id = input.id;
    let branches = input.flow.branches();

    if input.kind == FlowKind::Main && branches.is_empty() {
        return Err(SpecificationError::EmptyFlow {
            flow: flow_id.to_string(),
        }
        .into());
    }
    validate_branches(flow_id, branches)?;

    let global = LayeredConfig::new().with_layer(ConfigLevel::Global, ctx.global_config)?;
    let n = branches.len();

    // Step names by index, and by (branch, step name) for hint lookup.
    let names: Vec<Vec<String>> = branches
        .iter()
        .enumerate()
        .map(|(i, branch)| {
            branch
                .steps
                .iter()
                .enumerate()
                .map(|(j, step)| {
                    step_name(&StepKey::at(flow_id, Position::new(i, j), &step.definition))
                })
                .collect()
        })
        .collect();
    let mut by_ref: HashMap<(&str, &str), &str> = HashMap::new();
    for (i, branch) in branches.iter().enumerate() {
        for (j, step) in branch.steps.iter().enumerate() {
            by_ref.insert((branch.name.as_str(), step.step_name()), names[i][j].as_str());
        }
    }

    let mut positions = HashSet::new();
    let mut steps: Vec<CompiledStep> = Vec::with_capacity(input.flow.step_count() + 2);

    // Bootstrap
    let bootstrap_key = StepKey::at(flow_id, Position::new(n, 0), &input.bootstrap.name);
    claim_position(&mut positions, &bootstrap_key)?;
    let mut bootstrap_env = system_env(ctx, input.kind);
    bootstrap_env.extend(
        ctx.credentials
            .kubeconfig_env
            .iter()
            .map(|(name, value)| EnvVar::literal(name, value)),
    );
    let bootstrap_name = step_name(&bootstrap_key);
    steps.push(CompiledStep {
        name: bootstrap_name.clone(),
        key: bootstrap_key,
        role: StepRole::Bootstrap,
        definition: input.bootstrap,
        config: global.effective(),
        dependencies: Vec::new(),
        continue_on_error: false,
        condition: StepCondition::Always,
        env: bootstrap_env,
    });

    // User branches
    for (i, branch) in branches.iter().enumerate() {
        let shared = global
            .clone()
            .with_layer(ConfigLevel::Shared, &branch.config)?;

        for (j, step) in branch.steps.iter().enumerate() {
            if input.kind == FlowKind::Main && step.condition != StepCondition::Always {
                return Err(SpecificationError::ConditionOutsideExitFlow {
                    flow: flow_id.to_string(),
                    step: step.step_name().to_string(),
                    condition: step.condition.as_str().to_string(),
                }
                .into());
            }

            let definition = match ctx.resolver.resolve(&step.definition) {
                Ok(definition) => definition,
                Err(ResolveError::NotFound(_)) => {
                    return Err(SpecificationError::UnknownDefinition {
                        flow: flow_id.to_string(),
                        step: step.step_name().to_string(),
                        definition: step.definition.clone(),
                    }
                    .into());
                }
                Err(e) => return Err(e.into()),
            };

            let key = StepKey::at(flow_id, Position::new(i, j), &step.definition);
            claim_position(&mut positions, &key)?;

            let dependencies = if step.depends_on.is_empty() {
                if j == 0 {
                    vec![bootstrap_name.clone()]
                } else {
                    vec![names[i][j - 1].clone()]
                }
            } else {
                let mut deps: Vec<String> = Vec::with_capacity(step.depends_on.len());
                for hint in &step.depends_on {
                    let target_branch = hint.branch.as_deref().unwrap_or(&branch.name);
                    let target = by_ref
                        .get(&(target_branch, hint.step.as_str()))
                        .ok_or_else(|| SpecificationError::UnknownDependency {
                            flow: flow_id.to_string(),
                            step: step.step_name().to_string(),
                            target: format!("{}/{}", target_branch, hint.step),
                        })?;
                    if !deps.iter().any(|d| d == target) {
                        deps.push(target.to_string());
                    }
                }
                deps
            };

            let config = shared
                .clone()
                .with_layer(ConfigLevel::Step, &step.config)?
                .effective();

            steps.push(CompiledStep {
                name: names[i][j].clone(),
                key,
                role: StepRole::User,
                definition,
                config,
                dependencies,
                continue_on_error: step.continue_on_error,
                condition: step.condition,
                env: system_env(ctx, input.kind),
            });
        }
    }

    // Teardown waits for every sink.
    let teardown_key = match input.teardown {
        Some(definition) => {
            let key = StepKey::at(flow_id, Position::new(n + 1, 0), &definition.name);
            claim_position(&mut positions, &key)?;
            let depended_on: HashSet<&str> = steps
                .iter()
                .flat_map(|s| s.dependencies.iter().map(String::as_str))
                .collect();
            let mut dependencies: Vec<String> = steps
                .iter()
                .filter(|s| s.role == StepRole::User && !depended_on.contains(s.name.as_str()))
                .map(|s| s.name.clone())
                .collect();
            if dependencies.is_empty() {
                dependencies.push(bootstrap_name.clone());
            }
            steps.push(CompiledStep {
                name: step_name(&key),
                key: key.clone(),
                role: StepRole::Teardown,
                definition,
                config: global.effective(),
                dependencies,
                continue_on_error: false,
                condition: StepCondition::Always,
                env: system_env(ctx, input.kind),
            });
            Some(key)
        }
        None => None,
    };

    detect_cycles(flow_id, &steps)?;

    let rows = status_rows(&steps, branches, teardown_key.is_some());

    debug!(
        flow = flow_id,
        branches = n,
        steps = steps.len(),
        "Compiled flow"
    );

    Ok(CompiledFlow {
        id: flow_id.to_string(),
        kind: input.kind,
        rows,
        steps,
    })
}

/// Status rows in execution order.
///
/// `steps` is laid out as bootstrap, user steps branch by branch, then the
/// optional teardown.
fn status_rows(steps: &[CompiledStep], branches: &[FlowBranch], has_teardown: bool) -> Vec<Vec<StepStatus>> {
    let status = |step: &CompiledStep| {
        let mut s = StepStatus::new(&step.key);
        s.template_name = Some(step.name.clone());
        s
    };

    let mut rows = Vec::with_capacity(branches.len() + 2);
    let mut iter = steps.iter();
    rows.push(iter.by_ref().take(1).map(status).collect());
    for branch in branches {
        rows.push(iter.by_ref().take(branch.steps.len()).map(status).collect());
    }
    if has_teardown {
        rows.push(iter.map(status).collect());
    }
    rows
}

fn validate_branches(flow: &str, branches: &[FlowBranch]) -> std::result::Result<(), SpecificationError> {
    let mut branch_names = HashSet::new();
    for branch in branches {
        if branch.name.trim().is_empty() {
            return Err(SpecificationError::EmptyBranchName {
                flow: flow.to_string(),
            });
        }
        if !branch_names.insert(branch.name.as_str()) {
            return Err(SpecificationError::DuplicateBranch {
                flow: flow.to_string(),
                branch: branch.name.clone(),
            });
        }
        if branch.steps.is_empty() {
            return Err(SpecificationError::EmptyBranch {
                flow: flow.to_string(),
                branch: branch.name.clone(),
            });
        }

        let mut step_names = HashSet::new();
        for step in &branch.steps {
            if !step_names.insert(step.step_name()) {
                return Err(SpecificationError::DuplicateStep {
                    flow: flow.to_string(),
                    branch: branch.name.clone(),
                    step: step.step_name().to_string(),
                });
            }
        }
    }
    Ok(())
}

fn claim_position(
    positions: &mut HashSet<(String, String)>,
    key: &StepKey,
) -> std::result::Result<(), SpecificationError> {
    if !positions.insert((key.flow.clone(), key.position.clone())) {
        return Err(SpecificationError::DuplicatePosition {
            flow: key.flow.clone(),
            position: key.position.clone(),
        });
    }
    Ok(())
}

/// Reject dependency cycles using Kahn's algorithm.
fn detect_cycles(flow: &str, steps: &[CompiledStep]) -> std::result::Result<(), SpecificationError> {
    let id_to_idx: HashMap<&str, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name.as_str(), i))
        .collect();

    let n = steps.len();
    let mut in_degree = vec![0usize; n];
    let mut adj: Vec<Vec<usize>> = vec![vec![]; n];

    for (idx, step) in steps.iter().enumerate() {
        for dep in &step.dependencies {
            if let Some(&dep_idx) = id_to_idx.get(dep.as_str()) {
                adj[dep_idx].push(idx);
                in_degree[idx] += 1;
            }
        }
    }

    let mut queue: Vec<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
    let mut visited = 0;

    while let Some(node) = queue.pop() {
        visited += 1;
        for &neighbor in &adj[node] {
            in_degree[neighbor] -= 1;
            if in_degree[neighbor] == 0 {
                queue.push(neighbor);
            }
        }
    }

    if visited != n {
        return Err(SpecificationError::Cycle {
            flow: flow.to_string(),
        });
    }
    Ok(())
}

fn system_env(ctx: &FlowContext<'_>, kind: FlowKind) -> Vec<EnvVar> {
    vec![
        EnvVar::literal(ENV_TESTRUN_ID, ctx.testrun_id),
        EnvVar::literal(ENV_PHASE, kind.phase()),
        EnvVar::literal(ENV_KUBECONFIG_PATH, KUBECONFIG_PATH),
    ]
}

/// Template name of the step at `key`: `<flow>-<testdef>-<outer>-<inner>`.
pub fn step_name(key: &StepKey) -> String {
    format!(
        "{}-{}-{}",
        sanitize(&key.flow),
        sanitize(&key.testdefinition),
        key.position.replace('/', "-")
    )
}

/// Lowercase, with everything outside `[a-z0-9-]` replaced by `-`.
fn sanitize(s: &str) -> String {
    let mapped: String = s
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' }
        })
        .collect();
    mapped.trim_matches('-').to_string()
}

/// 32-bit FNV-1a, stable across builds.
fn fnv1a(bytes: &[u8]) -> u32 {
    bytes.iter().fold(0x811c_9dc5, |hash, &b| {
        (hash ^ u32::from(b)).wrapping_mul(0x0100_0193)
    })
}
