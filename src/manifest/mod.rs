//! Manifest Templates
//!
//! Typed Kubernetes objects loaded from the template directory. Templates are
//! read fresh on every use and handed to the mutators by value.

pub mod mutator;

pub use mutator::*;

use crate::domain::ports::ResourceKind;
use crate::error::{Error, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Container, Namespace, Pod, PodSpec, Service};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

// =============================================================================
// Manifest
// =============================================================================

/// A finalized object ready for submission
#[derive(Debug, Clone, PartialEq)]
pub enum Manifest {
    Namespace(Namespace),
    ConfigMap(ConfigMap),
    Service(Service),
    DaemonSet(DaemonSet),
    Deployment(Deployment),
    Pod(Pod),
}

impl Manifest {
    /// Parse a YAML document, dispatching on its `kind`
    pub fn from_yaml(source: &str, content: &str) -> Result<Self> {
        let value: serde_yaml::Value =
            serde_yaml::from_str(content).map_err(|e| Error::manifest(source, e))?;
        if value.is_null() {
            return Err(Error::manifest(source, "body of file is empty"));
        }

        let kind = value
            .get("kind")
            .and_then(|k| k.as_str())
            .ok_or_else(|| Error::manifest(source, "missing kind"))?
            .to_string();

        if let Some(expected) = expected_api_version(&kind) {
            let found = value.get("apiVersion").and_then(|v| v.as_str()).unwrap_or("<missing>");
            if found != expected {
                return Err(Error::manifest(
                    source,
                    format!("{} requires apiVersion {}, found {}", kind, expected, found),
                ));
            }
        }

        let parsed = match kind.as_str() {
            "Namespace" => serde_yaml::from_value(value).map(Manifest::Namespace),
            "ConfigMap" => serde_yaml::from_value(value).map(Manifest::ConfigMap),
            "Service" => serde_yaml::from_value(value).map(Manifest::Service),
            "DaemonSet" => serde_yaml::from_value(value).map(Manifest::DaemonSet),
            "Deployment" => serde_yaml::from_value(value).map(Manifest::Deployment),
            "Pod" => serde_yaml::from_value(value).map(Manifest::Pod),
            other => {
                return Err(Error::manifest(
                    source,
                    format!("unsupported kind {}", other),
                ))
            }
        };

        parsed.map_err(|e| Error::manifest(source, e))
    }

    pub fn kind(&self) -> ResourceKind {
        match self {
            Manifest::Namespace(_) => ResourceKind::Namespace,
            Manifest::ConfigMap(_) => ResourceKind::ConfigMap,
            Manifest::Service(_) => ResourceKind::Service,
            Manifest::DaemonSet(_) => ResourceKind::DaemonSet,
            Manifest::Deployment(_) => ResourceKind::Deployment,
            Manifest::Pod(_) => ResourceKind::Pod,
        }
    }

    /// `metadata.name` of the object
    pub fn name(&self) -> Option<&str> {
        let meta = match self {
            Manifest::Namespace(o) => &o.metadata,
            Manifest::ConfigMap(o) => &o.metadata,
            Manifest::Service(o) => &o.metadata,
            Manifest::DaemonSet(o) => &o.metadata,
            Manifest::Deployment(o) => &o.metadata,
            Manifest::Pod(o) => &o.metadata,
        };
        meta.name.as_deref()
    }

    /// Labels of the object itself
    pub fn labels(&self) -> BTreeMap<String, String> {
        let meta = match self {
            Manifest::Namespace(o) => &o.metadata,
            Manifest::ConfigMap(o) => &o.metadata,
            Manifest::Service(o) => &o.metadata,
            Manifest::DaemonSet(o) => &o.metadata,
            Manifest::Deployment(o) => &o.metadata,
            Manifest::Pod(o) => &o.metadata,
        };
        meta.labels.clone().unwrap_or_default()
    }
}

/// apiVersion the typed objects deserialize from
fn expected_api_version(kind: &str) -> Option<&'static str> {
    match kind {
        "Namespace" | "ConfigMap" | "Service" | "Pod" => Some("v1"),
        "DaemonSet" | "Deployment" => Some("apps/v1"),
        _ => None,
    }
}

impl From<Workload> for Manifest {
    fn from(workload: Workload) -> Self {
        match workload {
            Workload::DaemonSet(ds) => Manifest::DaemonSet(ds),
            Workload::Deployment(d) => Manifest::Deployment(d),
            Workload::Pod(p) => Manifest::Pod(p),
        }
    }
}

// =============================================================================
// Workload
// =============================================================================

/// Manifests that run containers and therefore accept runtime substitutions
#[derive(Debug, Clone, PartialEq)]
pub enum Workload {
    DaemonSet(DaemonSet),
    Deployment(Deployment),
    Pod(Pod),
}

impl TryFrom<Manifest> for Workload {
    type Error = Error;

    fn try_from(manifest: Manifest) -> Result<Self> {
        match manifest {
            Manifest::DaemonSet(ds) => Ok(Workload::DaemonSet(ds)),
            Manifest::Deployment(d) => Ok(Workload::Deployment(d)),
            Manifest::Pod(p) => Ok(Workload::Pod(p)),
            other => Err(Error::manifest(
                other.name().unwrap_or("<unnamed>"),
                format!("{} is not a workload", other.kind()),
            )),
        }
    }
}

impl Workload {
    /// Labels carrying the `version` key: the pod template's, or the Pod's own
    pub(crate) fn version_labels_mut(&mut self) -> Option<&mut BTreeMap<String, String>> {
        match self {
            Workload::DaemonSet(ds) => ds
                .spec
                .as_mut()
                .and_then(|s| s.template.metadata.as_mut())
                .and_then(|m| m.labels.as_mut()),
            Workload::Deployment(d) => d
                .spec
                .as_mut()
                .and_then(|s| s.template.metadata.as_mut())
                .and_then(|m| m.labels.as_mut()),
            Workload::Pod(p) => p.metadata.labels.as_mut(),
        }
    }

    pub(crate) fn pod_spec_mut(&mut self) -> Option<&mut PodSpec> {
        match self {
            Workload::DaemonSet(ds) => ds.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
            Workload::Deployment(d) => d.spec.as_mut().and_then(|s| s.template.spec.as_mut()),
            Workload::Pod(p) => p.spec.as_mut(),
        }
    }

    pub(crate) fn pod_spec(&self) -> Option<&PodSpec> {
        match self {
            Workload::DaemonSet(ds) => ds.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            Workload::Deployment(d) => d.spec.as_ref().and_then(|s| s.template.spec.as_ref()),
            Workload::Pod(p) => p.spec.as_ref(),
        }
    }

    /// Annotations of the pod template, created on demand
    pub(crate) fn pod_annotations_mut(&mut self) -> &mut BTreeMap<String, String> {
        match self {
            Workload::DaemonSet(ds) => ds
                .spec
                .get_or_insert_with(Default::default)
                .template
                .metadata
                .get_or_insert_with(Default::default)
                .annotations
                .get_or_insert_with(Default::default),
            Workload::Deployment(d) => d
                .spec
                .get_or_insert_with(Default::default)
                .template
                .metadata
                .get_or_insert_with(Default::default)
                .annotations
                .get_or_insert_with(Default::default),
            Workload::Pod(p) => p.metadata.annotations.get_or_insert_with(Default::default),
        }
    }

    pub(crate) fn pod_annotations(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            Workload::DaemonSet(ds) => ds
                .spec
                .as_ref()
                .and_then(|s| s.template.metadata.as_ref())
                .and_then(|m| m.annotations.as_ref()),
            Workload::Deployment(d) => d
                .spec
                .as_ref()
                .and_then(|s| s.template.metadata.as_ref())
                .and_then(|m| m.annotations.as_ref()),
            Workload::Pod(p) => p.metadata.annotations.as_ref(),
        }
    }

    /// Main containers of the pod
    pub fn containers(&self) -> &[Container] {
        self.pod_spec()
            .map(|s| s.containers.as_slice())
            .unwrap_or_default()
    }

    pub(crate) fn containers_mut(&mut self) -> &mut [Container] {
        match self.pod_spec_mut() {
            Some(spec) => spec.containers.as_mut_slice(),
            None => &mut [],
        }
    }

    /// Value of the `version` label, if any
    pub fn version_label(&self) -> Option<&str> {
        let labels = match self {
            Workload::DaemonSet(ds) => ds
                .spec
                .as_ref()
                .and_then(|s| s.template.metadata.as_ref())
                .and_then(|m| m.labels.as_ref()),
            Workload::Deployment(d) => d
                .spec
                .as_ref()
                .and_then(|s| s.template.metadata.as_ref())
                .and_then(|m| m.labels.as_ref()),
            Workload::Pod(p) => p.metadata.labels.as_ref(),
        };
        labels.and_then(|l| l.get("version")).map(String::as_str)
    }
}

// =============================================================================
// Template Store
// =============================================================================

/// Reads manifest templates from the configured directory
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Load and parse a template file
    pub fn load(&self, file: &str) -> Result<Manifest> {
        let path = self.dir.join(file);
        let source = path.display().to_string();
        debug!(path = %source, "Loading manifest template");

        let content = std::fs::read_to_string(&path).map_err(|e| Error::manifest(&source, e))?;
        Manifest::from_yaml(&source, &content)
    }

    /// Load a template that must describe a workload
    pub fn load_workload(&self, file: &str) -> Result<Workload> {
        Workload::try_from(self.load(file)?)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    //! Template files shared by the tests of several modules

    pub const CONFIG_MAP: &str = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: quobyte-config
data:
  registry: "registry.quobyte:7861"
"#;

    pub fn service(name: &str) -> String {
        format!(
            r#"
apiVersion: v1
kind: Service
metadata:
  name: {name}
spec:
  selector:
    role: {name}
  ports:
    - port: 7860
"#
        )
    }

    pub fn daemon_set(role: &str) -> String {
        format!(
            r#"
apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: {role}
spec:
  selector:
    matchLabels:
      role: {role}
  template:
    metadata:
      labels:
        role: {role}
        version: "VERSION"
      annotations:
        pod.beta.kubernetes.io/init-containers: '[{{"name":"{role}-init","image":"quobyte/quobyte-server:VERSION"}}]'
    spec:
      nodeSelector:
        quobyte_{role}: "true"
      containers:
        - name: quobyte-{role}
          image: quobyte/quobyte-server:VERSION
          command:
            - /bin/bash
            - -xec
            - exec java -Xms${{MIN_MEM}} -Xmx${{MAX_MEM}} -jar /opt/quobyte/{role}.jar
"#
        )
    }

    pub const WEBCONSOLE: &str = r#"
apiVersion: apps/v1
kind: Deployment
metadata:
  name: webconsole
  labels:
    role: webconsole
spec:
  replicas: 1
  selector:
    matchLabels:
      role: webconsole
  template:
    metadata:
      labels:
        role: webconsole
        version: "VERSION"
    spec:
      containers:
        - name: webconsole
          image: quobyte/quobyte-server:VERSION
        - name: api
          image: quobyte/quobyte-server:VERSION
"#;

    pub const QMGMT_POD: &str = r#"
apiVersion: v1
kind: Pod
metadata:
  name: qmgmt-pod
  labels:
    role: qmgmt-pod
    version: "VERSION"
spec:
  containers:
    - name: qmgmt-pod
      image: quobyte/quobyte-server:VERSION
"#;

    /// Write a complete template directory
    pub fn template_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, content: &str| {
            std::fs::write(dir.path().join(name), content).unwrap();
        };

        write("config.yaml", CONFIG_MAP);
        for svc in ["registry", "webconsole", "api"] {
            write(&format!("{}-svc.yaml", svc), &service(svc));
        }
        for role in ["registry", "metadata", "data", "client"] {
            write(&format!("{}-ds.yaml", role), &daemon_set(role));
        }
        write("webconsole-deployment.yaml", WEBCONSOLE);
        write("qmgmt-pod.yaml", QMGMT_POD);
        dir
    }
}
