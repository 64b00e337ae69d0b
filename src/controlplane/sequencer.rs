//! Bootstrap Sequencer - The "Brain"
//!
//! Executes the fixed deployment plan:
//! - namespace, config map and services
//! - registry, gated on the bootstrap registry coming up
//! - API and webconsole, gated on readiness
//! - metadata, data and client DaemonSets with their node labels
//! - the management pod
//!
//! Every step is idempotent; a fatal error stops the run and leaves what was
//! created in place.

use crate::config::{ClusterConfig, ConfigResolver};
use crate::controlplane::labeler::NodeLabeler;
use crate::controlplane::readiness::{ReadinessPolicy, ReadinessWaiter};
use crate::controlplane::reconciler::ResourceReconciler;
use crate::domain::ports::{ControlPlaneRef, ResourceKind, Role, Selector, SleeperRef};
use crate::error::{Error, Result};
use crate::manifest::{
    apply_container_resources, apply_disks, apply_mount_opts, apply_resources, apply_version,
    Manifest, TemplateStore, Workload,
};
use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Pod label every Quobyte workload carries
pub const ROLE_LABEL: &str = "role";
/// Value of the role node labels
pub const ROLE_LABEL_VALUE: &str = "true";

const CONFIG_MAP_NAME: &str = "quobyte-config";
const CONFIG_MAP_TEMPLATE: &str = "config.yaml";
const WEBCONSOLE_NAME: &str = "webconsole";
const WEBCONSOLE_TEMPLATE: &str = "webconsole-deployment.yaml";
const QMGMT_POD_NAME: &str = "qmgmt-pod";
const QMGMT_POD_TEMPLATE: &str = "qmgmt-pod.yaml";
const SERVICES: [&str; 3] = ["registry", "webconsole", "api"];

// =============================================================================
// Plan
// =============================================================================

/// What a step does
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Namespace,
    ConfigMap,
    Service(&'static str),
    /// Registry DaemonSet plus bootstrap node gating
    Registry,
    /// API and webconsole Deployment
    Webconsole,
    /// DaemonSet for metadata, data or client plus node labels
    RoleWorkload(Role),
    ManagementPod,
}

/// When a step counts as done
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// The object exists
    Exists,
    /// The object exists and the role's nodes are labeled
    NodesLabeled,
    /// A pod behind the selector is ready
    PodReady {
        selector: Selector,
        component: &'static str,
    },
    /// The bootstrap registry is ready and the remaining nodes are labeled
    BootstrapQuorum,
}

impl StepKind {
    /// Template file the step submits, if any
    pub fn template(&self) -> Option<String> {
        match *self {
            StepKind::Namespace => None,
            StepKind::ConfigMap => Some(CONFIG_MAP_TEMPLATE.to_string()),
            StepKind::Service(name) => Some(format!("{}-svc.yaml", name)),
            StepKind::Registry => Some(format!("{}-ds.yaml", Role::Registry.name())),
            StepKind::Webconsole => Some(WEBCONSOLE_TEMPLATE.to_string()),
            StepKind::RoleWorkload(role) => Some(format!("{}-ds.yaml", role.name())),
            StepKind::ManagementPod => Some(QMGMT_POD_TEMPLATE.to_string()),
        }
    }
}

/// A named unit of work in the deployment plan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentStep {
    pub name: String,
    pub kind: StepKind,
}

impl DeploymentStep {
    fn new(name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Template file the step submits, if any
    pub fn manifest(&self) -> Option<String> {
        self.kind.template()
    }

    /// Node label key the step assigns, if any
    pub fn label_key(&self) -> Option<String> {
        match self.kind {
            StepKind::Registry => Some(Role::Registry.label_key()),
            StepKind::RoleWorkload(role) => Some(role.label_key()),
            _ => None,
        }
    }

    pub fn completion(&self) -> Completion {
        match self.kind {
            StepKind::Registry => Completion::BootstrapQuorum,
            StepKind::Webconsole => Completion::PodReady {
                selector: Selector::by_label(ROLE_LABEL, WEBCONSOLE_NAME),
                component: "API and Webconsole",
            },
            StepKind::RoleWorkload(_) => Completion::NodesLabeled,
            _ => Completion::Exists,
        }
    }
}

/// The fixed order in which the cluster is brought up
pub fn deployment_plan() -> Vec<DeploymentStep> {
    let mut plan = vec![
        DeploymentStep::new("namespace", StepKind::Namespace),
        DeploymentStep::new("configmap", StepKind::ConfigMap),
    ];
    plan.extend(
        SERVICES
            .into_iter()
            .map(|svc| DeploymentStep::new(format!("{}-svc", svc), StepKind::Service(svc))),
    );
    plan.extend([
        DeploymentStep::new("registry", StepKind::Registry),
        DeploymentStep::new("webconsole", StepKind::Webconsole),
        DeploymentStep::new("metadata", StepKind::RoleWorkload(Role::Metadata)),
        DeploymentStep::new("data", StepKind::RoleWorkload(Role::Data)),
        DeploymentStep::new("client", StepKind::RoleWorkload(Role::Client)),
        DeploymentStep::new(QMGMT_POD_NAME, StepKind::ManagementPod),
    ]);
    plan
}

// =============================================================================
// Step State
// =============================================================================

/// Lifecycle of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Absent,
    Creating,
    WaitingForReady,
    Ready,
    /// Finished, but a create or label call failed along the way
    Incomplete,
    FailedTimeout,
}

impl std::fmt::Display for StepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepState::Absent => write!(f, "absent"),
            StepState::Creating => write!(f, "creating"),
            StepState::WaitingForReady => write!(f, "waiting_for_ready"),
            StepState::Ready => write!(f, "ready"),
            StepState::Incomplete => write!(f, "incomplete"),
            StepState::FailedTimeout => write!(f, "failed_timeout"),
        }
    }
}

/// Final state of a step
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub step: String,
    pub state: StepState,
    /// Non-fatal failures encountered by the step
    pub warnings: Vec<String>,
}

/// Outcome of a successful run
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub steps: Vec<StepReport>,
}

impl DeploymentReport {
    /// Steps that finished with non-fatal failures
    pub fn incomplete_steps(&self) -> impl Iterator<Item = &StepReport> {
        self.steps
            .iter()
            .filter(|s| s.state == StepState::Incomplete)
    }
}

/// Tracks a step through its states
struct StepProgress {
    step: String,
    state: StepState,
    warnings: Vec<String>,
}

impl StepProgress {
    fn new(step: &DeploymentStep) -> Self {
        Self {
            step: step.name.clone(),
            state: StepState::Absent,
            warnings: Vec::new(),
        }
    }

    fn transition(&mut self, to: StepState) {
        debug!(step = %self.step, from = %self.state, %to, "step transition");
        self.state = to;
    }

    fn warn(&mut self, error: &Error) {
        warn!(step = %self.step, error = %error, "continuing after non-fatal error");
        self.warnings.push(error.to_string());
    }

    fn finish(mut self) -> StepReport {
        let last = if self.warnings.is_empty() {
            StepState::Ready
        } else {
            StepState::Incomplete
        };
        self.transition(last);
        StepReport {
            step: self.step,
            state: self.state,
            warnings: self.warnings,
        }
    }
}

// =============================================================================
// Sequencer
// =============================================================================

/// Drives the deployment plan against a control plane
pub struct BootstrapSequencer {
    config: ClusterConfig,
    control_plane: ControlPlaneRef,
    templates: TemplateStore,
    reconciler: ResourceReconciler,
    labeler: NodeLabeler,
    waiter: ReadinessWaiter,
}

impl BootstrapSequencer {
    pub fn new(config: ClusterConfig, control_plane: ControlPlaneRef, sleeper: SleeperRef) -> Self {
        let namespace = config.namespace.clone();
        let policy = ReadinessPolicy::from(&config.readiness);

        Self {
            templates: TemplateStore::new(config.manifest_dir()),
            reconciler: ResourceReconciler::new(control_plane.clone(), namespace.clone()),
            labeler: NodeLabeler::new(control_plane.clone()),
            waiter: ReadinessWaiter::new(control_plane.clone(), sleeper, namespace, policy),
            control_plane,
            config,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Command an operator can run to check the deployed services
    pub fn verification_hint(&self) -> String {
        format!(
            "kubectl -n {} exec -it {} -- qmgmt -u api:7860 service list",
            self.config.namespace, QMGMT_POD_NAME
        )
    }

    /// Execute every step of the plan in order
    pub async fn run(&self) -> Result<DeploymentReport> {
        let started_at = Utc::now();
        info!(
            namespace = %self.config.namespace,
            version = %self.config.version,
            manifests = %self.templates.dir().display(),
            "Starting Quobyte deployment"
        );

        let mut steps = Vec::new();
        for step in deployment_plan() {
            let mut progress = StepProgress::new(&step);

            if let Err(e) = self.execute(&step, &mut progress).await {
                if matches!(e, Error::DeploymentTimeout { .. }) {
                    progress.transition(StepState::FailedTimeout);
                }
                error!(step = %step.name, state = %progress.state, error = %e, "deployment aborted");
                return Err(e);
            }

            let report = progress.finish();
            info!(step = %report.step, state = %report.state, "step finished");
            steps.push(report);
        }

        Ok(DeploymentReport {
            started_at,
            finished_at: Utc::now(),
            steps,
        })
    }

    async fn execute(&self, step: &DeploymentStep, progress: &mut StepProgress) -> Result<()> {
        self.submit(step, progress).await?;
        self.await_completion(step, progress).await
    }

    async fn submit(&self, step: &DeploymentStep, progress: &mut StepProgress) -> Result<()> {
        match step.kind {
            StepKind::Namespace => {
                let namespace = self.config.namespace.clone();
                self.ensure(
                    progress,
                    ResourceKind::Namespace,
                    Selector::by_name(&namespace),
                    || Ok(namespace_manifest(&namespace)),
                )
                .await
            }
            StepKind::ConfigMap => {
                self.ensure(
                    progress,
                    ResourceKind::ConfigMap,
                    Selector::by_name(CONFIG_MAP_NAME),
                    || self.template(step.kind),
                )
                .await
            }
            StepKind::Service(name) => {
                self.ensure(progress, ResourceKind::Service, Selector::by_name(name), || {
                    self.template(step.kind)
                })
                .await
            }
            StepKind::Registry => self.deploy_registry(step, progress).await,
            StepKind::Webconsole => self.deploy_webconsole(progress).await,
            StepKind::RoleWorkload(role) => self.deploy_role(step, progress, role).await,
            StepKind::ManagementPod => {
                info!("Start Quobyte Management Pod");
                self.ensure(
                    progress,
                    ResourceKind::Pod,
                    Selector::by_label(ROLE_LABEL, QMGMT_POD_NAME),
                    || self.management_pod(),
                )
                .await
            }
        }
    }

    /// Block until the step's completion predicate holds
    async fn await_completion(&self, step: &DeploymentStep, progress: &mut StepProgress) -> Result<()> {
        let Completion::PodReady { selector, component } = step.completion() else {
            return Ok(());
        };

        progress.transition(StepState::WaitingForReady);
        if !self.waiter.wait_until_ready(&selector, component).await {
            return Err(Error::DeploymentTimeout {
                component: component.into(),
                attempts: self.waiter.policy().max_attempts,
            });
        }
        Ok(())
    }

    /// Route non-fatal errors into the step's warnings
    fn tolerate<T>(&self, progress: &mut StepProgress, result: Result<T>) -> Result<Option<T>> {
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                progress.warn(&e);
                Ok(None)
            }
        }
    }

    async fn ensure<F>(
        &self,
        progress: &mut StepProgress,
        kind: ResourceKind,
        selector: Selector,
        build: F,
    ) -> Result<()>
    where
        F: FnOnce() -> Result<Manifest>,
    {
        progress.transition(StepState::Creating);
        let outcome = self.reconciler.ensure_exists(kind, &selector, build).await;
        self.tolerate(progress, outcome)?;
        Ok(())
    }

    async fn resolve_nodes(&self, progress: &mut StepProgress, role: Role) -> Result<Vec<String>> {
        let resolved = ConfigResolver::new(&self.config)
            .resolve_nodes(role, self.control_plane.as_ref())
            .await;
        Ok(self.tolerate(progress, resolved)?.unwrap_or_default())
    }

    async fn label_role_node(&self, progress: &mut StepProgress, node: &str, key: &str) {
        let result = self.labeler.label_node(node, key, ROLE_LABEL_VALUE).await;
        if let Err(e) = result {
            progress.warn(&e);
        }
    }

    async fn deploy_registry(&self, step: &DeploymentStep, progress: &mut StepProgress) -> Result<()> {
        info!("Start Quobyte Registry deployment");
        self.ensure_role_daemon_set(progress, Role::Registry).await?;
        let key = step_label_key(step)?;

        let nodes = ConfigResolver::new(&self.config)
            .resolve_nodes(Role::Registry, self.control_plane.as_ref())
            .await
            .map_err(|e| {
                Error::Configuration(format!(
                    "cannot determine the bootstrap node for the registry role: {}",
                    e
                ))
            })?;
        let (bootstrap, remaining) = nodes.split_first().ok_or_else(|| {
            Error::Configuration("no bootstrap node defined for the registry role".into())
        })?;

        let selector = Selector::by_label(ROLE_LABEL, Role::Registry.name());
        let running = self.waiter.is_running(&selector).await;
        let running = self.tolerate(progress, running)?.unwrap_or(false);

        if running {
            info!("Bootstrap registry already running");
        } else {
            info!(node = %bootstrap, "Bootstrapping registry");
            self.label_role_node(progress, bootstrap, &key).await;

            progress.transition(StepState::WaitingForReady);
            if !self.waiter.wait_until_ready(&selector, "Bootstrap registry").await {
                return Err(Error::DeploymentTimeout {
                    component: "Bootstrap registry".into(),
                    attempts: self.waiter.policy().max_attempts,
                });
            }
        }

        for node in remaining {
            self.label_role_node(progress, node, &key).await;
        }
        Ok(())
    }

    async fn deploy_webconsole(&self, progress: &mut StepProgress) -> Result<()> {
        info!("Start Quobyte API and Webconsole deployment");
        let selector = Selector::by_name(WEBCONSOLE_NAME).with_label(ROLE_LABEL, WEBCONSOLE_NAME);
        self.ensure(progress, ResourceKind::Deployment, selector, || {
            self.webconsole_deployment()
        })
        .await
    }

    async fn deploy_role(
        &self,
        step: &DeploymentStep,
        progress: &mut StepProgress,
        role: Role,
    ) -> Result<()> {
        info!("Start Quobyte {} deployment", role);
        self.ensure_role_daemon_set(progress, role).await?;
        let key = step_label_key(step)?;

        let nodes = self.resolve_nodes(progress, role).await?;
        if nodes.is_empty() {
            warn!(role = %role, "no nodes resolved, nothing to label");
        }
        for node in &nodes {
            self.label_role_node(progress, node, &key).await;
        }
        Ok(())
    }

    async fn ensure_role_daemon_set(&self, progress: &mut StepProgress, role: Role) -> Result<()> {
        self.ensure(progress, ResourceKind::DaemonSet, Selector::by_name(role.name()), || {
            self.role_daemon_set(role)
        })
        .await
    }

    // =========================================================================
    // Manifest Builders
    // =========================================================================

    /// Load the template a step submits
    fn template(&self, kind: StepKind) -> Result<Manifest> {
        let file = kind
            .template()
            .ok_or_else(|| Error::manifest(format!("{:?}", kind), "step submits no template"))?;
        self.templates.load(&file)
    }

    fn workload_template(&self, kind: StepKind) -> Result<Workload> {
        Workload::try_from(self.template(kind)?)
    }

    /// Role DaemonSet with version, resources, mount options and disks applied
    pub fn role_daemon_set(&self, role: Role) -> Result<Manifest> {
        let resolver = ConfigResolver::new(&self.config);
        let kind = match role {
            Role::Registry => StepKind::Registry,
            other => StepKind::RoleWorkload(other),
        };
        let template = self.workload_template(kind)?;

        let mut workload = apply_version(template, &self.config.version);
        if let Some(limits) = resolver.resources(role) {
            workload = apply_resources(workload, limits)?;
        }
        if let Some(opts) = resolver.mount_opts(role) {
            workload = apply_mount_opts(workload, opts);
        }
        if let Some(disks) = resolver.disks(role) {
            workload = apply_disks(workload, disks)?;
        }
        Ok(workload.into())
    }

    /// API and webconsole Deployment; the `api` container may be sized apart
    pub fn webconsole_deployment(&self) -> Result<Manifest> {
        let resolver = ConfigResolver::new(&self.config);
        let template = self.workload_template(StepKind::Webconsole)?;

        let mut workload = apply_version(template, &self.config.version);
        if let Some(limits) = resolver.resources(Role::Webconsole) {
            workload = apply_resources(workload, limits)?;
        }
        if let Some(limits) = resolver.declared_resources(Role::Api) {
            workload = apply_container_resources(workload, Role::Api.name(), limits)?;
        }
        Ok(workload.into())
    }

    pub fn management_pod(&self) -> Result<Manifest> {
        let template = self.workload_template(StepKind::ManagementPod)?;
        Ok(apply_version(template, &self.config.version).into())
    }
}

fn step_label_key(step: &DeploymentStep) -> Result<String> {
    step.label_key()
        .ok_or_else(|| Error::manifest(&step.name, "step assigns no node label"))
}

fn namespace_manifest(name: &str) -> Manifest {
    Manifest::Namespace(Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            ..Default::default()
        },
        ..Default::default()
    })
}
