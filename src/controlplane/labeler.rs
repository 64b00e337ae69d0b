//! Node Labeler
//!
//! Role labels are what the DaemonSet node selectors match on, so a node
//! joins a role by being labeled `quobyte_<role>=true`.

use crate::domain::ports::{ControlPlaneRef, ResourceKind, Selector};
use crate::error::Result;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Result of a labeling request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelOutcome {
    AlreadyLabeled,
    Labeled,
}

/// Idempotently assigns labels to nodes
pub struct NodeLabeler {
    control_plane: ControlPlaneRef,
}

impl NodeLabeler {
    pub fn new(control_plane: ControlPlaneRef) -> Self {
        Self { control_plane }
    }

    /// Ensure `node` carries `key=value`
    pub async fn label_node(&self, node: &str, key: &str, value: &str) -> Result<LabelOutcome> {
        let selector = Selector::by_name(node).with_label(key, value);

        match self
            .control_plane
            .list(ResourceKind::Node, None, &selector)
            .await
        {
            Ok(found) if !found.is_empty() => {
                debug!(node, label = %format!("{}={}", key, value), "node already labeled");
                return Ok(LabelOutcome::AlreadyLabeled);
            }
            Ok(_) => {}
            Err(e) => warn!(node, error = %e, "label check failed, patching anyway"),
        }

        info!("Label Node: {} with label {}={}", node, key, value);
        let labels = BTreeMap::from([(key.to_string(), value.to_string())]);
        self.control_plane.patch_node_labels(node, &labels).await?;
        Ok(LabelOutcome::Labeled)
    }
}
