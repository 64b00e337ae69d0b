//! Deployment Control Plane Module
//!
//! The "brain" of the deployer: a fixed bootstrap sequence built on
//! idempotent create, node labeling and readiness polling against the
//! Kubernetes API.

pub mod client;
pub mod labeler;
pub mod readiness;
pub mod reconciler;
pub mod sequencer;

pub use client::KubeControlPlane;
pub use labeler::{LabelOutcome, NodeLabeler};
pub use readiness::{ReadinessPolicy, ReadinessWaiter};
pub use reconciler::{ReconcileOutcome, ResourceReconciler};
pub use sequencer::*;
