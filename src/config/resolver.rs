//! Effective per-role settings
//!
//! Every field falls back to the `default` role on its own: a role that only
//! overrides `nodes` still inherits `resources` and `mount_opts`.

use super::{ClusterConfig, ResourceLimits, RoleSpec};
use crate::domain::ports::{ControlPlane, ResourceKind, Role, Selector};
use crate::error::Result;
use tracing::debug;

/// Node entry meaning "every node currently in the cluster"
pub const ALL_NODES: &str = "all";

/// Nodes a role should run on, before the live inventory is consulted
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeSelection {
    /// Every node in the cluster at the moment of use
    All,
    Named(Vec<String>),
}

impl NodeSelection {
    pub fn is_empty(&self) -> bool {
        matches!(self, NodeSelection::Named(nodes) if nodes.is_empty())
    }
}

/// Resolves role settings against the `default` section
#[derive(Debug, Clone, Copy)]
pub struct ConfigResolver<'a> {
    config: &'a ClusterConfig,
}

impl<'a> ConfigResolver<'a> {
    pub fn new(config: &'a ClusterConfig) -> Self {
        Self { config }
    }

    fn spec(&self, role: Role) -> Option<&'a RoleSpec> {
        self.config.role(role)
    }

    fn default_spec(&self) -> &'a RoleSpec {
        &self.config.default
    }

    /// Configured node selection, with `default` substituted for an absent
    /// or empty list
    pub fn node_selection(&self, role: Role) -> NodeSelection {
        let nodes = self
            .spec(role)
            .map(|s| s.nodes.as_slice())
            .filter(|nodes| !nodes.is_empty())
            .unwrap_or(self.default_spec().nodes.as_slice());

        match nodes {
            [only] if only == ALL_NODES => NodeSelection::All,
            _ => NodeSelection::Named(nodes.to_vec()),
        }
    }

    /// Node names for a role, expanding `all` through a fresh inventory query
    pub async fn resolve_nodes(
        &self,
        role: Role,
        control_plane: &dyn ControlPlane,
    ) -> Result<Vec<String>> {
        match self.node_selection(role) {
            NodeSelection::Named(nodes) => Ok(nodes),
            NodeSelection::All => {
                let nodes = control_plane
                    .list(ResourceKind::Node, None, &Selector::all())
                    .await?;
                debug!(role = %role, count = nodes.len(), "expanded 'all' to node inventory");
                Ok(nodes)
            }
        }
    }

    /// Resource limits for a role, falling back to `default`
    pub fn resources(&self, role: Role) -> Option<&'a ResourceLimits> {
        self.declared_resources(role).or_else(|| {
            self.default_spec()
                .resources
                .as_ref()
                .filter(|limits| !limits.is_empty())
        })
    }

    /// Resource limits the role declares itself, without fallback
    pub fn declared_resources(&self, role: Role) -> Option<&'a ResourceLimits> {
        self.spec(role)
            .and_then(|s| s.resources.as_ref())
            .filter(|limits| !limits.is_empty())
    }

    /// Mount options for a role, falling back to `default`
    pub fn mount_opts(&self, role: Role) -> Option<&'a str> {
        fn non_empty(spec: &RoleSpec) -> Option<&str> {
            spec.mount_opts.as_deref().filter(|opts| !opts.is_empty())
        }

        self.spec(role)
            .and_then(non_empty)
            .or_else(|| non_empty(self.default_spec()))
    }

    /// Disks declared by the role itself
    pub fn disks(&self, role: Role) -> Option<&'a [String]> {
        self.spec(role)
            .and_then(|s| s.disks.as_deref())
            .filter(|disks| !disks.is_empty())
    }
}
