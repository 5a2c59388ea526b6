//! Cluster API used by the apply engine, the pruner and the annotation store
//!
//! `ClusterClient` is the seam between the channel logic and the API server.
//! `KubeCluster` implements it on top of a kube-rs `Client` with dynamic
//! objects and API discovery.

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{ApiCapabilities, ApiResource, Discovery, Scope};
use kube::{Client, Config};
use serde_json::Value;
use std::path::Path;
use thiserror::Error;
use tokio::sync::OnceCell;

use crate::manifest::{GroupKind, ObjectGvk};

#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("no resource mapping found for {0}")]
    UnknownKind(String),

    #[error("API discovery failed: {0}")]
    Discovery(String),

    #[error("{resource} {name:?} not found")]
    NotFound { resource: String, name: String },

    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("failed to decode {what}: {source}")]
    Decode {
        what: String,
        source: serde_json::Error,
    },
}

impl ClusterError {
    /// HTTP status code reported by the API server, if any
    pub fn status_code(&self) -> Option<u16> {
        match self {
            ClusterError::Kube {
                source: kube::Error::Api(response),
            } => Some(response.code),
            ClusterError::NotFound { .. } => Some(404),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.status_code() == Some(404)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceScope {
    Namespaced,
    Cluster,
}

/// Resolution of a kind to a REST resource and its scope
#[derive(Debug, Clone)]
pub struct RestMapping {
    pub resource: ApiResource,
    pub scope: ResourceScope,
}

impl RestMapping {
    pub fn new(resource: ApiResource, scope: ResourceScope) -> Self {
        Self { resource, scope }
    }

    pub fn is_namespaced(&self) -> bool {
        self.scope == ResourceScope::Namespaced
    }

    fn from_discovered((resource, caps): (ApiResource, ApiCapabilities)) -> Self {
        let scope = match caps.scope {
            Scope::Namespaced => ResourceScope::Namespaced,
            Scope::Cluster => ResourceScope::Cluster,
        };
        Self { resource, scope }
    }
}

/// Patch semantics supported by `ClusterClient::patch`
#[derive(Debug, Clone, PartialEq)]
pub enum PatchType {
    /// Server-side apply under `field_manager`
    Apply { field_manager: String, force: bool },
    /// RFC 7386 JSON merge patch
    Merge,
    /// Kubernetes strategic merge patch
    Strategic,
}

#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// `gitVersion` reported by the API server
    async fn server_version(&self) -> Result<String, ClusterError>;

    async fn rest_mapping(&self, gvk: &ObjectGvk) -> Result<RestMapping, ClusterError>;

    /// Resolve a group/kind to the server's preferred version
    async fn rest_mapping_for_kind(&self, gk: &GroupKind) -> Result<RestMapping, ClusterError>;

    async fn get(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError>;

    async fn list(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError>;

    async fn patch(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
        patch_type: &PatchType,
        body: &Value,
    ) -> Result<DynamicObject, ClusterError>;

    async fn delete(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError>;

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ClusterError>;

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError>;

    /// Strategic-merge patch a namespace
    async fn patch_namespace(&self, name: &str, body: &Value) -> Result<(), ClusterError>;
}

/// Create a kube client, from an explicit kubeconfig path or the default chain
pub async fn create_client(kubeconfig: Option<&Path>) -> anyhow::Result<Client> {
    let config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("Failed to read kubeconfig: {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .with_context(|| format!("Failed to load kubeconfig: {}", path.display()))?
        }
        None => Config::infer()
            .await
            .context("Failed to infer Kubernetes configuration")?,
    };
    Client::try_from(config).context("Failed to create Kubernetes client")
}

/// `ClusterClient` backed by a live API server. Discovery runs once, on first
/// use, and is reused for the lifetime of the client.
pub struct KubeCluster {
    client: Client,
    discovery: OnceCell<Discovery>,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            discovery: OnceCell::new(),
        }
    }

    async fn discovery(&self) -> Result<&Discovery, ClusterError> {
        self.discovery
            .get_or_try_init(|| async {
                tracing::debug!("running API discovery");
                Discovery::new(self.client.clone())
                    .run()
                    .await
                    .map_err(|e| ClusterError::Discovery(e.to_string()))
            })
            .await
    }

    fn dynamic_api(&self, mapping: &RestMapping, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if mapping.is_namespaced() => {
                Api::namespaced_with(self.client.clone(), ns, &mapping.resource)
            }
            _ => Api::all_with(self.client.clone(), &mapping.resource),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeCluster {
    async fn server_version(&self) -> Result<String, ClusterError> {
        Ok(self.client.apiserver_version().await?.git_version)
    }

    async fn rest_mapping(&self, gvk: &ObjectGvk) -> Result<RestMapping, ClusterError> {
        let discovery = self.discovery().await?;
        let kube_gvk = GroupVersionKind::gvk(&gvk.group, &gvk.version, &gvk.kind);
        discovery
            .resolve_gvk(&kube_gvk)
            .map(RestMapping::from_discovered)
            .ok_or_else(|| ClusterError::UnknownKind(gvk.to_string()))
    }

    async fn rest_mapping_for_kind(&self, gk: &GroupKind) -> Result<RestMapping, ClusterError> {
        let discovery = self.discovery().await?;
        discovery
            .groups()
            .filter(|group| group.name() == gk.group)
            .find_map(|group| group.recommended_kind(&gk.kind))
            .map(RestMapping::from_discovered)
            .ok_or_else(|| ClusterError::UnknownKind(gk.to_string()))
    }

    async fn get(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        Ok(self.dynamic_api(mapping, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        if !field_selector.is_empty() {
            params = params.fields(field_selector);
        }
        let list = self.dynamic_api(mapping, namespace).list(&params).await?;
        Ok(list.items)
    }

    async fn patch(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
        patch_type: &PatchType,
        body: &Value,
    ) -> Result<DynamicObject, ClusterError> {
        let api = self.dynamic_api(mapping, namespace);
        let patched = match patch_type {
            PatchType::Apply {
                field_manager,
                force,
            } => {
                let mut params = PatchParams::apply(field_manager);
                if *force {
                    params = params.force();
                }
                api.patch(name, &params, &Patch::Apply(body)).await?
            }
            PatchType::Merge => {
                api.patch(name, &PatchParams::default(), &Patch::Merge(body))
                    .await?
            }
            PatchType::Strategic => {
                api.patch(name, &PatchParams::default(), &Patch::Strategic(body))
                    .await?
            }
        };
        Ok(patched)
    }

    async fn delete(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.dynamic_api(mapping, namespace)
            .delete(name, &DeleteParams::default())
            .await?;
        Ok(())
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn patch_namespace(&self, name: &str, body: &Value) -> Result<(), ClusterError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        api.patch(name, &PatchParams::default(), &Patch::Strategic(body))
            .await?;
        Ok(())
    }
}
