//! Kubernetes API adapter
//!
//! Maps the control plane port onto typed `kube::Api` calls.

use crate::config::Connection;
use crate::domain::ports::{ControlPlane, ResourceKind, Selector};
use crate::error::{Error, Result};
use crate::manifest::Manifest;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, Service};
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Debug;
use tracing::{debug, info};

/// Control plane backed by a live Kubernetes cluster
#[derive(Clone)]
pub struct KubeControlPlane {
    client: Client,
}

impl KubeControlPlane {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client for the configured connection
    pub async fn connect(connection: &Connection) -> Result<Self> {
        let config = match connection {
            Connection::InCluster => {
                info!("Using in-cluster Kubernetes configuration");
                kube::Config::incluster().map_err(|e| {
                    Error::Configuration(format!("in-cluster configuration unavailable: {}", e))
                })?
            }
            Connection::Kubeconfig(path) => {
                info!("Using kubeconfig {}", path.display());
                let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                    Error::Configuration(format!("cannot read kubeconfig {}: {}", path.display(), e))
                })?;
                kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                    .await
                    .map_err(|e| Error::Configuration(format!("invalid kubeconfig: {}", e)))?
            }
            Connection::Inferred => kube::Config::infer().await.map_err(|e| {
                Error::Configuration(format!("cannot infer Kubernetes configuration: {}", e))
            })?,
        };

        let client = Client::try_from(config)?;
        Ok(Self::new(client))
    }

    fn namespaced<K>(&self, namespace: Option<&str>) -> Result<Api<K>>
    where
        K: Resource<Scope = k8s_openapi::NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        let namespace = namespace.ok_or_else(|| {
            Error::Configuration(format!("{} requires a namespace", K::kind(&Default::default())))
        })?;
        Ok(Api::namespaced(self.client.clone(), namespace))
    }

    fn all<K>(&self) -> Api<K>
    where
        K: Resource,
        <K as Resource>::DynamicType: Default,
    {
        Api::all(self.client.clone())
    }
}

fn list_params(selector: &Selector) -> ListParams {
    let mut params = ListParams::default();
    if let Some(fields) = selector.field_selector() {
        params = params.fields(&fields);
    }
    if let Some(labels) = selector.label_selector() {
        params = params.labels(&labels);
    }
    params
}

async fn list_names<K>(api: Api<K>, kind: ResourceKind, selector: &Selector) -> Result<Vec<String>>
where
    K: Resource + Clone + DeserializeOwned + Debug,
{
    let objects = api
        .list(&list_params(selector))
        .await
        .map_err(|e| Error::read(format!("list {} {}", kind, selector), e))?;
    Ok(objects.items.iter().map(|o| o.name_any()).collect())
}

async fn create_object<K>(api: Api<K>, object: &K) -> Result<()>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug,
    <K as Resource>::DynamicType: Default,
{
    let name = object.name_any();
    api.create(&PostParams::default(), object)
        .await
        .map_err(|e| Error::write(format!("create {} {}", K::kind(&Default::default()), name), e))
        .map(|_| ())
}

#[async_trait]
impl ControlPlane for KubeControlPlane {
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &Selector,
    ) -> Result<Vec<String>> {
        debug!(%kind, %selector, "listing objects");
        match kind {
            ResourceKind::Namespace => list_names(self.all::<Namespace>(), kind, selector).await,
            ResourceKind::Node => list_names(self.all::<Node>(), kind, selector).await,
            ResourceKind::ConfigMap => {
                list_names(self.namespaced::<ConfigMap>(namespace)?, kind, selector).await
            }
            ResourceKind::Service => {
                list_names(self.namespaced::<Service>(namespace)?, kind, selector).await
            }
            ResourceKind::DaemonSet => {
                list_names(self.namespaced::<DaemonSet>(namespace)?, kind, selector).await
            }
            ResourceKind::Deployment => {
                list_names(self.namespaced::<Deployment>(namespace)?, kind, selector).await
            }
            ResourceKind::Pod => list_names(self.namespaced::<Pod>(namespace)?, kind, selector).await,
        }
    }

    async fn create(&self, namespace: Option<&str>, manifest: &Manifest) -> Result<()> {
        match manifest {
            Manifest::Namespace(o) => create_object(self.all::<Namespace>(), o).await,
            Manifest::ConfigMap(o) => create_object(self.namespaced(namespace)?, o).await,
            Manifest::Service(o) => create_object(self.namespaced(namespace)?, o).await,
            Manifest::DaemonSet(o) => create_object(self.namespaced(namespace)?, o).await,
            Manifest::Deployment(o) => create_object(self.namespaced(namespace)?, o).await,
            Manifest::Pod(o) => create_object(self.namespaced(namespace)?, o).await,
        }
    }

    async fn list_pods(&self, namespace: &str, selector: &Selector) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let pods = api
            .list(&list_params(selector))
            .await
            .map_err(|e| Error::read(format!("list Pod {}", selector), e))?;
        Ok(pods.items)
    }

    async fn patch_node_labels(
        &self,
        node: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<()> {
        let api = self.all::<Node>();
        let patch = serde_json::json!({
            "metadata": {
                "labels": labels
            }
        });

        api.patch(node, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| Error::write(format!("patch Node {}", node), e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_params_from_selector() {
        let params = list_params(&Selector::by_name("webconsole").with_label("role", "webconsole"));
        assert_eq!(params.field_selector.as_deref(), Some("metadata.name=webconsole"));
        assert_eq!(params.label_selector.as_deref(), Some("role=webconsole"));

        let params = list_params(&Selector::all());
        assert!(params.field_selector.is_none());
        assert!(params.label_selector.is_none());
    }
}
