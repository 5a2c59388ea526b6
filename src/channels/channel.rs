//! Installed-version records stored as namespace annotations

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Namespace;
use serde_json::{Map, Value, json};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::version::ChannelVersion;
use crate::applyset::cancellable;
use crate::k8s::{ClusterClient, ClusterError};

pub const ANNOTATION_PREFIX: &str = "addons.k8s.io/";

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("error reading namespace {namespace:?}: {source}")]
    Read {
        namespace: String,
        source: ClusterError,
    },

    #[error("error parsing annotation {key:?} on namespace {namespace:?}: {source}")]
    Decode {
        namespace: String,
        key: String,
        source: serde_json::Error,
    },

    #[error("error encoding version for annotation {key:?}: {source}")]
    Encode {
        key: String,
        source: serde_json::Error,
    },

    #[error("error writing annotation {key:?} on namespace {namespace:?}: {source}")]
    Write {
        namespace: String,
        key: String,
        source: ClusterError,
    },

    #[error("namespace request was cancelled")]
    Cancelled,
}

/// Where an addon's installed version is recorded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub namespace: String,
    pub name: String,
}

impl Channel {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    pub fn annotation_key(&self) -> String {
        format!("{}{}", ANNOTATION_PREFIX, self.name)
    }

    /// The recorded version, or `None` when the namespace or annotation is absent
    pub async fn get_installed_version(
        &self,
        client: &dyn ClusterClient,
        cancel: &CancellationToken,
    ) -> Result<Option<ChannelVersion>, AnnotationError> {
        let namespace = cancellable(cancel, client.get_namespace(&self.namespace))
            .await
            .ok_or(AnnotationError::Cancelled)?
            .map_err(|source| AnnotationError::Read {
                namespace: self.namespace.clone(),
                source,
            })?;
        let Some(namespace) = namespace else {
            return Ok(None);
        };

        let key = self.annotation_key();
        let value = namespace
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(&key));
        match value {
            Some(value) => decode(&self.namespace, &key, value).map(Some),
            None => Ok(None),
        }
    }

    /// Record `version`, touching only this addon's annotation key
    pub async fn set_installed_version(
        &self,
        client: &dyn ClusterClient,
        version: &ChannelVersion,
        cancel: &CancellationToken,
    ) -> Result<(), AnnotationError> {
        let key = self.annotation_key();
        let encoded = serde_json::to_string(version).map_err(|source| AnnotationError::Encode {
            key: key.clone(),
            source,
        })?;
        self.patch_annotation(client, key, Value::String(encoded), cancel)
            .await
    }

    /// Delete this addon's annotation
    pub async fn remove(
        &self,
        client: &dyn ClusterClient,
        cancel: &CancellationToken,
    ) -> Result<(), AnnotationError> {
        self.patch_annotation(client, self.annotation_key(), Value::Null, cancel)
            .await
    }

    async fn patch_annotation(
        &self,
        client: &dyn ClusterClient,
        key: String,
        value: Value,
        cancel: &CancellationToken,
    ) -> Result<(), AnnotationError> {
        let mut annotations = Map::new();
        annotations.insert(key.clone(), value);
        let patch = json!({"metadata": {"annotations": annotations}});
        tracing::debug!(namespace = %self.namespace, annotation = %key, "patching namespace");
        cancellable(cancel, client.patch_namespace(&self.namespace, &patch))
            .await
            .ok_or(AnnotationError::Cancelled)?
            .map_err(|source| AnnotationError::Write {
                namespace: self.namespace.clone(),
                key,
                source,
            })
    }
}

fn decode(namespace: &str, key: &str, value: &str) -> Result<ChannelVersion, AnnotationError> {
    serde_json::from_str(value).map_err(|source| AnnotationError::Decode {
        namespace: namespace.to_string(),
        key: key.to_string(),
        source,
    })
}

/// Every addon version recorded on `namespace`, keyed by addon name
pub fn find_channel_versions(namespace: &Namespace) -> Result<BTreeMap<String, ChannelVersion>, AnnotationError> {
    let ns_name = namespace.metadata.name.as_deref().unwrap_or_default();
    let mut out = BTreeMap::new();
    for (key, value) in namespace.metadata.annotations.iter().flatten() {
        if let Some(name) = key.strip_prefix(ANNOTATION_PREFIX) {
            out.insert(name.to_string(), decode(ns_name, key, value)?);
        }
    }
    Ok(out)
}

/// Every installed addon on the cluster, keyed by `(namespace, name)`
pub async fn installed_versions(
    client: &dyn ClusterClient,
    cancel: &CancellationToken,
) -> Result<BTreeMap<(String, String), ChannelVersion>, AnnotationError> {
    let namespaces = cancellable(cancel, client.list_namespaces())
        .await
        .ok_or(AnnotationError::Cancelled)?
        .map_err(|source| AnnotationError::Read {
            namespace: String::new(),
            source,
        })?;
    let mut out = BTreeMap::new();
    for namespace in &namespaces {
        let ns_name = namespace.metadata.name.clone().unwrap_or_default();
        for (name, version) in find_channel_versions(namespace)? {
            out.insert((ns_name.clone(), name), version);
        }
    }
    Ok(out)
}
