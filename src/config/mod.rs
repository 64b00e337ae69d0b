//! Deployment Configuration
//!
//! Loads the cluster description from YAML and performs the structural
//! checks that must pass before any control plane call is made.

pub mod resolver;

pub use resolver::*;

use crate::domain::ports::Role;
use crate::error::{Error, Result};
use k8s_openapi::api::core::v1::ResourceRequirements;
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Resource Limits
// =============================================================================

/// Container resource requests and limits for a role
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ResourceLimits {
    #[serde(default, deserialize_with = "deserialize_quantities")]
    pub requests: BTreeMap<String, String>,
    #[serde(default, deserialize_with = "deserialize_quantities")]
    pub limits: BTreeMap<String, String>,
}

impl ResourceLimits {
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty() && self.limits.is_empty()
    }

    /// Memory request, e.g. `4Gi`
    pub fn min_memory(&self) -> Option<&str> {
        self.requests.get("memory").map(String::as_str)
    }

    /// Memory limit, e.g. `8Gi`
    pub fn max_memory(&self) -> Option<&str> {
        self.limits.get("memory").map(String::as_str)
    }

    /// Convert into the Kubernetes container resource block
    pub fn to_requirements(&self) -> ResourceRequirements {
        fn quantities(map: &BTreeMap<String, String>) -> Option<BTreeMap<String, Quantity>> {
            if map.is_empty() {
                return None;
            }
            Some(
                map.iter()
                    .map(|(k, v)| (k.clone(), Quantity(v.clone())))
                    .collect(),
            )
        }

        ResourceRequirements {
            requests: quantities(&self.requests),
            limits: quantities(&self.limits),
            ..Default::default()
        }
    }
}

/// YAML scalars that users write for quantities and versions
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
}

impl Scalar {
    fn into_string(self) -> String {
        match self {
            Scalar::Text(s) => s,
            Scalar::Integer(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
        }
    }
}

fn deserialize_quantities<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, Scalar>::deserialize(deserializer)?;
    Ok(raw.into_iter().map(|(k, v)| (k, v.into_string())).collect())
}

/// Versions are image tags: `2.10` written bare would parse as the float 2.1
fn deserialize_version<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Scalar::deserialize(deserializer)? {
        Scalar::Text(version) => Ok(version),
        Scalar::Integer(_) | Scalar::Float(_) => {
            Err(serde::de::Error::custom("version must be a quoted string"))
        }
    }
}

// =============================================================================
// Role Configuration
// =============================================================================

/// Per-role overrides. Unset fields fall back to the `default` role.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RoleSpec {
    /// Node names, or the single entry `all`
    #[serde(default)]
    pub nodes: Vec<String>,
    #[serde(default)]
    pub resources: Option<ResourceLimits>,
    #[serde(default)]
    pub mount_opts: Option<String>,
    /// Block devices handed to the data service; never inherited
    #[serde(default)]
    pub disks: Option<Vec<String>>,
}

/// Location of the manifest templates.
///
/// Accepts either a plain path or a `{ path: ... }` table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum ManifestLocation {
    Path(PathBuf),
    Table { path: PathBuf },
}

impl ManifestLocation {
    pub fn path(&self) -> &Path {
        match self {
            ManifestLocation::Path(p) => p,
            ManifestLocation::Table { path } => path,
        }
    }
}

/// Readiness polling budget
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReadinessConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second poll; doubles after every failed poll
    #[serde(default = "default_base_delay_secs")]
    pub base_delay_secs: u64,
}

fn default_max_attempts() -> u32 {
    20
}

fn default_base_delay_secs() -> u64 {
    1
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay_secs(),
        }
    }
}

impl ReadinessConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_secs(self.base_delay_secs)
    }
}

/// How to reach the Kubernetes API
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Connection {
    /// Service account of the pod the deployer runs in
    InCluster,
    /// Explicit kubeconfig file
    Kubeconfig(PathBuf),
    /// `KUBECONFIG`, `~/.kube/config`, then in-cluster
    Inferred,
}

// =============================================================================
// Cluster Configuration
// =============================================================================

/// Root of the deployment file
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    pub kubernetes_files: ManifestLocation,
    #[serde(deserialize_with = "deserialize_version")]
    pub version: String,
    pub namespace: String,
    #[serde(default)]
    pub incluster: bool,
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    #[serde(default)]
    pub readiness: ReadinessConfig,

    #[serde(default)]
    pub registry: Option<RoleSpec>,
    #[serde(default)]
    pub webconsole: Option<RoleSpec>,
    #[serde(default)]
    pub api: Option<RoleSpec>,
    #[serde(default)]
    pub metadata: Option<RoleSpec>,
    #[serde(default)]
    pub data: Option<RoleSpec>,
    #[serde(default)]
    pub client: Option<RoleSpec>,
    pub default: RoleSpec,
}

impl ClusterConfig {
    /// Load and validate a deployment file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!("Loading configuration from {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a deployment document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: ClusterConfig = serde_yaml::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Directory holding the manifest templates
    pub fn manifest_dir(&self) -> &Path {
        self.kubernetes_files.path()
    }

    /// Explicit settings for a role, if the file has a section for it
    pub fn role(&self, role: Role) -> Option<&RoleSpec> {
        match role {
            Role::Registry => self.registry.as_ref(),
            Role::Webconsole => self.webconsole.as_ref(),
            Role::Api => self.api.as_ref(),
            Role::Metadata => self.metadata.as_ref(),
            Role::Data => self.data.as_ref(),
            Role::Client => self.client.as_ref(),
        }
    }

    pub fn connection(&self) -> Connection {
        if self.incluster {
            Connection::InCluster
        } else if let Some(path) = &self.kubeconfig {
            Connection::Kubeconfig(path.clone())
        } else {
            Connection::Inferred
        }
    }

    /// Structural presence checks
    pub fn validate(&self) -> Result<()> {
        if self.namespace.trim().is_empty() {
            return Err(Error::Configuration("namespace must not be empty".into()));
        }
        if self.version.trim().is_empty() {
            return Err(Error::Configuration("version must not be empty".into()));
        }
        if self.manifest_dir().as_os_str().is_empty() {
            return Err(Error::Configuration(
                "kubernetes_files path must not be empty".into(),
            ));
        }
        if self.incluster && self.kubeconfig.is_some() {
            return Err(Error::Configuration(
                "incluster and kubeconfig are mutually exclusive".into(),
            ));
        }
        if self.readiness.max_attempts == 0 {
            return Err(Error::Configuration(
                "readiness.max_attempts must be at least 1".into(),
            ));
        }

        let sections = std::iter::once(("default", Some(&self.default))).chain(
            [
                Role::Registry,
                Role::Webconsole,
                Role::Api,
                Role::Metadata,
                Role::Data,
                Role::Client,
            ]
            .into_iter()
            .map(|role| (role.name(), self.role(role))),
        );
        for (name, spec) in sections {
            let Some(spec) = spec else { continue };
            if spec.nodes.len() > 1 && spec.nodes.iter().any(|n| n == ALL_NODES) {
                return Err(Error::Configuration(format!(
                    "{}: '{}' must be the only entry in nodes",
                    name, ALL_NODES
                )));
            }
            if spec.nodes.iter().any(|n| n.trim().is_empty()) {
                return Err(Error::Configuration(format!(
                    "{}: node names must not be empty",
                    name
                )));
            }
        }

        if ConfigResolver::new(self).node_selection(Role::Registry).is_empty() {
            return Err(Error::Configuration(
                "no bootstrap node defined: registry and default have no nodes".into(),
            ));
        }

        Ok(())
    }
}
