//! Control Plane Clients
//!
//! Implementations of the [`ControlPlane`](crate::domain::ports::ControlPlane) port:
//! - kubernetes: the live Kubernetes API
//! - memory: an in-memory cluster used by the tests

pub mod kubernetes;

#[cfg(test)]
pub mod memory;

pub use kubernetes::KubeControlPlane;
