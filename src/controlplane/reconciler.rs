//! Resource Reconciler
//!
//! Read-before-write creation: an object is only submitted when a list call
//! finds nothing matching its identity, which makes re-running the deployer
//! against a partially deployed cluster safe.

use crate::domain::ports::{ControlPlaneRef, ResourceKind, Selector};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use tracing::{info, warn};

/// Result of an existence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    AlreadyExists,
    Created,
}

/// Idempotent "create if absent" against the control plane
pub struct ResourceReconciler {
    control_plane: ControlPlaneRef,
    namespace: String,
}

impl ResourceReconciler {
    pub fn new(control_plane: ControlPlaneRef, namespace: impl Into<String>) -> Self {
        Self {
            control_plane,
            namespace: namespace.into(),
        }
    }

    /// Create the object built by `build` unless one matching `selector` exists.
    ///
    /// A failed existence check is treated as "absent". The body is only
    /// built when a create is needed, so templates of existing objects are
    /// never read.
    pub async fn ensure_exists<F>(
        &self,
        kind: ResourceKind,
        selector: &Selector,
        build: F,
    ) -> Result<ReconcileOutcome>
    where
        F: FnOnce() -> Result<Manifest>,
    {
        let namespace = kind.is_namespaced().then_some(self.namespace.as_str());

        match self.control_plane.list(kind, namespace, selector).await {
            Ok(existing) if !existing.is_empty() => {
                info!(%kind, %selector, "{} already exists", kind);
                return Ok(ReconcileOutcome::AlreadyExists);
            }
            Ok(_) => {}
            Err(e) => warn!(
                %kind,
                %selector,
                error = %e,
                "existence check failed, assuming absent"
            ),
        }

        let body = build()?;
        if body.kind() != kind {
            return Err(Error::manifest(
                body.name().unwrap_or("<unnamed>"),
                format!("expected {}, template describes {}", kind, body.kind()),
            ));
        }

        info!(%kind, %selector, "Create {} {}", kind, body.name().unwrap_or_default());
        self.control_plane.create(namespace, &body).await?;
        Ok(ReconcileOutcome::Created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controlplane::client::memory::{Event, InMemoryControlPlane};
    use crate::manifest::fixtures;
    use assert_matches::assert_matches;
    use std::cell::Cell;
    use std::sync::Arc;

    fn service(name: &str) -> Result<Manifest> {
        Manifest::from_yaml("svc.yaml", &fixtures::service(name))
    }

    #[tokio::test]
    async fn test_create_then_already_exists() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let reconciler = ResourceReconciler::new(cp.clone(), "quobyte");
        let selector = Selector::by_name("registry");

        let first = reconciler
            .ensure_exists(ResourceKind::Service, &selector, || service("registry"))
            .await
            .unwrap();
        assert_eq!(first, ReconcileOutcome::Created);

        let built = Cell::new(false);
        let second = reconciler
            .ensure_exists(ResourceKind::Service, &selector, || {
                built.set(true);
                service("registry")
            })
            .await
            .unwrap();
        assert_eq!(second, ReconcileOutcome::AlreadyExists);
        assert!(!built.get());

        assert_eq!(
            cp.objects(),
            vec![(ResourceKind::Service, "registry".to_string())]
        );
    }

    #[tokio::test]
    async fn test_read_failure_fails_open() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.fail_reads(ResourceKind::Service);
        let reconciler = ResourceReconciler::new(cp.clone(), "quobyte");

        let outcome = reconciler
            .ensure_exists(ResourceKind::Service, &Selector::by_name("api"), || {
                service("api")
            })
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::Created);
        assert!(cp
            .events()
            .contains(&Event::Created { kind: ResourceKind::Service, name: "api".into() }));
    }

    #[tokio::test]
    async fn test_create_failure_is_not_fatal() {
        let cp = Arc::new(InMemoryControlPlane::new());
        cp.fail_creates(ResourceKind::Service);
        let reconciler = ResourceReconciler::new(cp.clone(), "quobyte");

        let err = reconciler
            .ensure_exists(ResourceKind::Service, &Selector::by_name("api"), || {
                service("api")
            })
            .await
            .unwrap_err();
        assert_matches!(err, Error::ControlPlaneWrite { .. });
        assert!(!err.is_fatal());
        assert!(cp.objects().is_empty());
    }

    #[tokio::test]
    async fn test_kind_mismatch_is_fatal() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let reconciler = ResourceReconciler::new(cp.clone(), "quobyte");

        let err = reconciler
            .ensure_exists(ResourceKind::DaemonSet, &Selector::by_name("api"), || {
                service("api")
            })
            .await
            .unwrap_err();
        assert_matches!(err, Error::Manifest { .. });
        assert!(cp.objects().is_empty());
    }

    #[tokio::test]
    async fn test_namespace_is_cluster_scoped() {
        let cp = Arc::new(InMemoryControlPlane::new());
        let reconciler = ResourceReconciler::new(cp.clone(), "quobyte");
        let build = || {
            Manifest::from_yaml(
                "ns.yaml",
                "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: quobyte\n",
            )
        };

        reconciler
            .ensure_exists(ResourceKind::Namespace, &Selector::by_name("quobyte"), build)
            .await
            .unwrap();
        let outcome = reconciler
            .ensure_exists(ResourceKind::Namespace, &Selector::by_name("quobyte"), build)
            .await
            .unwrap();
        assert_eq!(outcome, ReconcileOutcome::AlreadyExists);
    }
}
