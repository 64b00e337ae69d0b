//! In-memory control plane for tests
//!
//! Stores created objects and node labels, scripts pod readiness over
//! successive polls, injects read/write failures per kind and records every
//! call so tests can assert on ordering.

use crate::controlplane::readiness::pod_is_ready;
use crate::domain::ports::{ControlPlane, ResourceKind, Selector, Sleeper};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::{Container, ContainerStatus, Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

/// Calls observed by the in-memory control plane
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Created { kind: ResourceKind, name: String },
    Labeled { node: String, key: String, value: String },
    PodsListed { selector: String, ready: bool },
}

#[derive(Debug, Clone)]
struct StoredObject {
    kind: ResourceKind,
    namespace: Option<String>,
    name: String,
    labels: BTreeMap<String, String>,
    manifest: Manifest,
}

/// Pod whose status flips from pending to ready after a number of polls
#[derive(Debug, Clone)]
struct ScriptedPod {
    name: String,
    labels: BTreeMap<String, String>,
    containers: usize,
    /// Status reported before the flip: (phase, ready containers)
    before: (String, usize),
    /// Polls answered with `before`; `None` never flips
    flip_after: Option<u32>,
    polls: u32,
}

impl ScriptedPod {
    fn observe(&mut self) -> Pod {
        let flipped = self.flip_after.map(|n| self.polls >= n).unwrap_or(false);
        self.polls += 1;

        let (phase, ready) = if flipped {
            ("Running".to_string(), self.containers)
        } else {
            self.before.clone()
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                labels: Some(self.labels.clone()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: (0..self.containers)
                    .map(|i| Container {
                        name: format!("c{}", i),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some(phase),
                container_statuses: Some(
                    (0..self.containers)
                        .map(|i| ContainerStatus {
                            name: format!("c{}", i),
                            ready: i < ready,
                            ..Default::default()
                        })
                        .collect(),
                ),
                ..Default::default()
            }),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    objects: Vec<StoredObject>,
    nodes: BTreeMap<String, BTreeMap<String, String>>,
    pods: Vec<ScriptedPod>,
    failing_reads: BTreeSet<ResourceKind>,
    failing_creates: BTreeSet<ResourceKind>,
    failing_patches: bool,
    events: Vec<Event>,
}

/// Control plane double holding the whole cluster in memory
#[derive(Debug, Default)]
pub struct InMemoryControlPlane {
    state: Mutex<State>,
}

fn labels_of(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

impl InMemoryControlPlane {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_nodes(nodes: &[&str]) -> Self {
        let cp = Self::new();
        for node in nodes {
            cp.add_node(node);
        }
        cp
    }

    pub fn add_node(&self, name: &str) {
        self.state
            .lock()
            .nodes
            .insert(name.to_string(), BTreeMap::new());
    }

    /// Pod with a fixed status
    pub fn add_pod(&self, name: &str, labels: &[(&str, &str)], phase: &str, ready: usize, containers: usize) {
        self.state.lock().pods.push(ScriptedPod {
            name: name.to_string(),
            labels: labels_of(labels),
            containers,
            before: (phase.to_string(), ready),
            flip_after: None,
            polls: 0,
        });
    }

    /// Pod that reports Pending for `pending_polls` polls, then fully ready
    pub fn add_pod_ready_after(&self, name: &str, labels: &[(&str, &str)], pending_polls: u32) {
        self.state.lock().pods.push(ScriptedPod {
            name: name.to_string(),
            labels: labels_of(labels),
            containers: 1,
            before: ("Pending".to_string(), 0),
            flip_after: Some(pending_polls),
            polls: 0,
        });
    }

    pub fn fail_reads(&self, kind: ResourceKind) {
        self.state.lock().failing_reads.insert(kind);
    }

    pub fn fail_creates(&self, kind: ResourceKind) {
        self.state.lock().failing_creates.insert(kind);
    }

    pub fn fail_patches(&self) {
        self.state.lock().failing_patches = true;
    }

    pub fn events(&self) -> Vec<Event> {
        self.state.lock().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().events.clear();
    }

    /// Sorted identities of every stored object
    pub fn objects(&self) -> Vec<(ResourceKind, String)> {
        let mut objects: Vec<_> = self
            .state
            .lock()
            .objects
            .iter()
            .map(|o| (o.kind, o.name.clone()))
            .collect();
        objects.sort();
        objects
    }

    pub fn manifest(&self, kind: ResourceKind, name: &str) -> Option<Manifest> {
        self.state
            .lock()
            .objects
            .iter()
            .find(|o| o.kind == kind && o.name == name)
            .map(|o| o.manifest.clone())
    }

    pub fn node_labels(&self, node: &str) -> BTreeMap<String, String> {
        self.state
            .lock()
            .nodes
            .get(node)
            .cloned()
            .unwrap_or_default()
    }

    pub fn pod_polls(&self, selector: &str) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::PodsListed { selector: s, .. } if s == selector))
            .count()
    }
}

#[async_trait]
impl ControlPlane for InMemoryControlPlane {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<String>> {
        let state = self.state.lock();
        if state.failing_reads.contains(&kind) {
            return Err(Error::read(format!("list {}", kind), "injected read failure"));
        }

        if kind == ResourceKind::Node {
            return Ok(state
                .nodes
                .iter()
                .filter(|(name, labels)| selector.matches(name, labels))
                .map(|(name, _)| name.clone())
                .collect());
        }

        Ok(state
            .objects
            .iter()
            .filter(|o| o.kind == kind)
            .filter(|o| !kind.is_namespaced() || o.namespace.as_deref() == namespace)
            .filter(|o| selector.matches(&o.name, &o.labels))
            .map(|o| o.name.clone())
            .collect())
    }

    async fn create(&self, namespace: Option<&str>, manifest: &Manifest) -> Result<()> {
        let mut state = self.state.lock();
        let kind = manifest.kind();
        let name = manifest.name().unwrap_or_default().to_string();

        if state.failing_creates.contains(&kind) {
            return Err(Error::write(format!("create {} {}", kind, name), "injected write failure"));
        }
        let namespace = kind.is_namespaced().then(|| namespace.map(str::to_string)).flatten();
        if state
            .objects
            .iter()
            .any(|o| o.kind == kind && o.name == name && o.namespace == namespace)
        {
            return Err(Error::write(format!("create {} {}", kind, name), "already exists"));
        }

        state.objects.push(StoredObject {
            kind,
            namespace,
            name: name.clone(),
            labels: manifest.labels(),
            manifest: manifest.clone(),
        });
        state.events.push(Event::Created { kind, name });
        Ok(())
    }

    async fn list_pods(&self, _namespace: &str, selector: &Selector) -> Result<Vec<Pod>> {
        let mut state = self.state.lock();
        if state.failing_reads.contains(&ResourceKind::Pod) {
            state.events.push(Event::PodsListed {
                selector: selector.to_string(),
                ready: false,
            });
            return Err(Error::read("list Pod", "injected read failure"));
        }

        let pods: Vec<Pod> = state
            .pods
            .iter_mut()
            .filter(|p| selector.matches(&p.name, &p.labels))
            .map(ScriptedPod::observe)
            .collect();

        state.events.push(Event::PodsListed {
            selector: selector.to_string(),
            ready: pods.iter().any(pod_is_ready),
        });
        Ok(pods)
    }

    async fn patch_node_labels(
        &self,
        node: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if state.failing_patches {
            return Err(Error::write(format!("patch Node {}", node), "injected write failure"));
        }

        let existing = state
            .nodes
            .get_mut(node)
            .ok_or_else(|| Error::write(format!("patch Node {}", node), "node not found"))?;
        existing.extend(labels.clone());

        for (key, value) in labels {
            state.events.push(Event::Labeled {
                node: node.to_string(),
                key: key.clone(),
                value: value.clone(),
            });
        }
        Ok(())
    }
}

/// Sleeper that returns immediately and remembers the requested delays
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        self.delays.lock().push(duration);
    }
}
