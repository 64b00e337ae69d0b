//! Quobyte Kubernetes Deployer
//!
//! One-shot bootstrap of a Quobyte storage cluster onto an existing
//! Kubernetes cluster: services, registry, API and webconsole, metadata,
//! data and client roles, and the management pod.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────────┐
//! │                          Bootstrap Sequencer                                 │
//! ├─────────────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────────┐  │
//! │  │  Config         │  │    Manifest     │  │      Readiness              │  │
//! │  │  Resolver       │  │    Mutators     │  │      Waiter (backoff)       │  │
//! │  └────────┬────────┘  └────────┬────────┘  └─────────────┬───────────────┘  │
//! │           │                    │                         │                   │
//! │           └────────────────────┼─────────────────────────┘                   │
//! │                                │                                             │
//! │             ┌──────────────────┴──────────────────┐                          │
//! │             │  Resource Reconciler / Node Labeler │                          │
//! │             └──────────────────┬──────────────────┘                          │
//! ├────────────────────────────────┼────────────────────────────────────────────┤
//! │                     ControlPlane port (kube client)                          │
//! └─────────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`config`]: Deployment file, validation and per-role resolution
//! - [`manifest`]: Typed templates and runtime substitutions
//! - [`controlplane`]: Reconciler, labeler, readiness waiter and sequencer
//! - [`domain`]: Core domain types and traits
//! - [`error`]: Error types and handling

pub mod config;
pub mod controlplane;
pub mod domain;
pub mod error;
pub mod manifest;

// Re-export commonly used types
pub use config::{ClusterConfig, ConfigResolver, Connection, NodeSelection, ResourceLimits, RoleSpec};

pub use controlplane::{
    BootstrapSequencer, DeploymentReport, KubeControlPlane, ReadinessPolicy, StepReport, StepState,
};

pub use domain::ports::{ControlPlane, ResourceKind, Role, Selector, Sleeper, TokioSleeper};

pub use error::{Error, ErrorAction, Result};

pub use manifest::{Manifest, TemplateStore, Workload};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
