//! Domain Ports - Core trait definitions for the deployer
//!
//! These traits define the boundaries between the deployment logic and the
//! Kubernetes control plane. Adapters implement these traits to provide
//! concrete functionality; tests substitute in-memory doubles.

use crate::error::Result;
use crate::manifest::Manifest;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// Roles
// =============================================================================

/// Cluster roles that can be configured in the deployment file
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Role {
    Registry,
    Webconsole,
    Api,
    Metadata,
    Data,
    Client,
}

impl Role {
    /// Name used for config keys, manifest files and the `role` pod label
    pub fn name(&self) -> &'static str {
        match self {
            Role::Registry => "registry",
            Role::Webconsole => "webconsole",
            Role::Api => "api",
            Role::Metadata => "metadata",
            Role::Data => "data",
            Role::Client => "client",
        }
    }

    /// Node label key that schedules this role's DaemonSet onto a node
    pub fn label_key(&self) -> String {
        format!("quobyte_{}", self.name())
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Resource Kinds
// =============================================================================

/// Control plane object kinds the deployer reads or writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResourceKind {
    Namespace,
    ConfigMap,
    Service,
    DaemonSet,
    Deployment,
    Pod,
    Node,
}

impl ResourceKind {
    /// Whether objects of this kind live inside a namespace
    pub fn is_namespaced(&self) -> bool {
        !matches!(self, ResourceKind::Namespace | ResourceKind::Node)
    }
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Namespace => write!(f, "Namespace"),
            ResourceKind::ConfigMap => write!(f, "ConfigMap"),
            ResourceKind::Service => write!(f, "Service"),
            ResourceKind::DaemonSet => write!(f, "DaemonSet"),
            ResourceKind::Deployment => write!(f, "Deployment"),
            ResourceKind::Pod => write!(f, "Pod"),
            ResourceKind::Node => write!(f, "Node"),
        }
    }
}

// =============================================================================
// Selectors
// =============================================================================

/// Identity of the objects a list call should match.
///
/// Combines an optional `metadata.name` field selector with equality label
/// selectors, which is all the deployer ever needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selector {
    pub name: Option<String>,
    pub labels: BTreeMap<String, String>,
}

impl Selector {
    /// Match every object
    pub fn all() -> Self {
        Self::default()
    }

    /// Match by `metadata.name`
    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            labels: BTreeMap::new(),
        }
    }

    /// Match by a single `key=value` label
    pub fn by_label(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self::all().with_label(key, value)
    }

    /// Add a `key=value` label requirement
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Render as a Kubernetes field selector
    pub fn field_selector(&self) -> Option<String> {
        self.name.as_ref().map(|name| format!("metadata.name={}", name))
    }

    /// Render as a Kubernetes label selector
    pub fn label_selector(&self) -> Option<String> {
        if self.labels.is_empty() {
            return None;
        }
        Some(
            self.labels
                .iter()
                .map(|(k, v)| format!("{}={}", k, v))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    /// Evaluate the selector against an object's name and labels
    pub fn matches(&self, name: &str, labels: &BTreeMap<String, String>) -> bool {
        if let Some(expected) = &self.name {
            if expected != name {
                return false;
            }
        }
        self.labels
            .iter()
            .all(|(k, v)| labels.get(k).map(|actual| actual == v).unwrap_or(false))
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .field_selector()
            .into_iter()
            .chain(self.label_selector())
            .collect();
        if parts.is_empty() {
            write!(f, "<all>")
        } else {
            write!(f, "{}", parts.join(","))
        }
    }
}

// =============================================================================
// Control Plane Port
// =============================================================================

/// Port for the Kubernetes API operations the deployer depends on.
///
/// List calls return an empty vector when nothing matches; an `Err` always
/// means the query itself failed.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// List names of objects of `kind` matching `selector`
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<String>>;

    /// Create an object from a finalized manifest
    async fn create(&self, namespace: Option<&str>, manifest: &Manifest) -> Result<()>;

    /// List pods with their status for readiness evaluation
    async fn list_pods(&self, namespace: &str, selector: &Selector) -> Result<Vec<Pod>>;

    /// Merge the given labels into a node's labels
    async fn patch_node_labels(&self, node: &str, labels: &BTreeMap<String, String>)
        -> Result<()>;
}

// =============================================================================
// Sleeper Port
// =============================================================================

/// Port for suspending the run between readiness polls
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeper backed by the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ControlPlaneRef = Arc<dyn ControlPlane>;
pub type SleeperRef = Arc<dyn Sleeper>;
