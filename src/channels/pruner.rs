//! Selective pruning of objects an addon no longer ships

use std::collections::BTreeSet;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::api::{PruneKindSpec, PruneSpec};
use crate::applyset::cancellable;
use crate::k8s::{ClusterClient, ClusterError, RestMapping};
use crate::manifest::{FieldSelector, GroupKind, LabelSelector, ManifestObject, SelectorError};

/// Kinds always swept when an addon is deleted, sorted by group then kind
const DELETION_KINDS: [(&str, &str); 11] = [
    ("", "ConfigMap"),
    ("", "Service"),
    ("", "ServiceAccount"),
    ("apps", "DaemonSet"),
    ("apps", "Deployment"),
    ("apps", "StatefulSet"),
    ("policy", "PodDisruptionBudget"),
    ("rbac.authorization.k8s.io", "ClusterRole"),
    ("rbac.authorization.k8s.io", "ClusterRoleBinding"),
    ("rbac.authorization.k8s.io", "Role"),
    ("rbac.authorization.k8s.io", "RoleBinding"),
];

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const ADDON_NAME_LABEL: &str = "addon.kops.k8s.io/name";

#[derive(Error, Debug)]
pub enum PruneError {
    #[error("invalid selector for {kind}: {source}")]
    Selector { kind: String, source: SelectorError },

    #[error("cannot resolve {kind}: {source}")]
    Mapping { kind: String, source: ClusterError },

    #[error("error listing {kind} in {namespace:?}: {source}")]
    List {
        kind: String,
        namespace: String,
        source: ClusterError,
    },

    #[error("error pruning {kind} {object}: {source}")]
    Delete {
        kind: String,
        object: String,
        source: ClusterError,
    },

    #[error("prune was cancelled")]
    Cancelled,

    #[error("{}", join_errors(.0))]
    Multiple(Vec<PruneError>),
}

fn join_errors(errors: &[PruneError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

pub struct Pruner {
    client: Arc<dyn ClusterClient>,
}

impl Pruner {
    pub fn new(client: Arc<dyn ClusterClient>) -> Self {
        Self { client }
    }

    /// Delete objects inside the scope of `spec` that are not in `objects`.
    /// Every kind is attempted; failures are returned together. Returns the
    /// number of objects deleted. Once `cancel` fires no further request is
    /// sent and the result is [`PruneError::Cancelled`].
    pub async fn prune(
        &self,
        objects: &[ManifestObject],
        spec: &PruneSpec,
        cancel: &CancellationToken,
    ) -> Result<usize, PruneError> {
        let mut errors = Vec::new();
        let mut deleted = 0;
        for kind in &spec.kinds {
            if cancel.is_cancelled() {
                break;
            }
            deleted += self.prune_kind(objects, kind, cancel, &mut errors).await;
        }
        if cancel.is_cancelled() {
            tracing::warn!(deleted, "prune cancelled");
            return Err(PruneError::Cancelled);
        }
        match errors.len() {
            0 => Ok(deleted),
            1 => Err(errors.remove(0)),
            _ => Err(PruneError::Multiple(errors)),
        }
    }

    async fn prune_kind(
        &self,
        objects: &[ManifestObject],
        spec: &PruneKindSpec,
        cancel: &CancellationToken,
        errors: &mut Vec<PruneError>,
    ) -> usize {
        let gk = GroupKind::new(&spec.group, &spec.kind);
        let kind = gk.to_string();

        let selectors = LabelSelector::parse(&spec.label_selector)
            .and_then(|labels| Ok((labels, FieldSelector::parse(&spec.field_selector)?)));
        let (labels, fields) = match selectors {
            Ok(selectors) => selectors,
            Err(source) => {
                errors.push(PruneError::Selector { kind, source });
                return 0;
            }
        };

        let mapping = match cancellable(cancel, self.client.rest_mapping_for_kind(&gk)).await {
            None => return 0,
            Some(Ok(mapping)) => mapping,
            Some(Err(source)) => {
                errors.push(PruneError::Mapping { kind, source });
                return 0;
            }
        };

        let keep: BTreeSet<String> = objects
            .iter()
            .filter(|o| o.gvk.group_kind() == gk)
            .map(|o| o.key().namespaced_name())
            .collect();

        let namespaces: Vec<Option<&str>> = if spec.namespaces.is_empty() {
            vec![None]
        } else {
            spec.namespaces.iter().map(|ns| Some(ns.as_str())).collect()
        };

        let mut deleted = 0;
        for namespace in namespaces {
            let list = self
                .client
                .list(&mapping, namespace, &spec.label_selector, &spec.field_selector);
            let listed = match cancellable(cancel, list).await {
                None => return deleted,
                Some(Ok(listed)) => listed,
                Some(Err(source)) => {
                    errors.push(PruneError::List {
                        kind: kind.clone(),
                        namespace: namespace.unwrap_or_default().to_string(),
                        source,
                    });
                    continue;
                }
            };

            for object in listed {
                let name = object.metadata.name.clone().unwrap_or_default();
                let object_ns = object.metadata.namespace.clone().unwrap_or_default();
                let object_labels = object.metadata.labels.clone().unwrap_or_default();

                let in_scope = labels.matches(&object_labels)
                    && fields.matches(&object_ns, &name)
                    && namespace.is_none_or(|ns| ns == object_ns);
                if !in_scope {
                    tracing::warn!(kind = %kind, namespace = %object_ns, name = %name, "ignoring listed object outside prune scope");
                    continue;
                }

                let id = format!("{}/{}", object_ns, name);
                if keep.contains(&id) {
                    continue;
                }

                match cancellable(cancel, self.delete(&mapping, &object_ns, &name)).await {
                    None => return deleted,
                    Some(Ok(())) => {
                        tracing::info!(kind = %kind, object = %id, "pruned object");
                        deleted += 1;
                    }
                    Some(Err(source)) => {
                        errors.push(PruneError::Delete {
                            kind,
                            object: id,
                            source,
                        });
                        return deleted;
                    }
                }
            }
        }
        deleted
    }

    async fn delete(&self, mapping: &RestMapping, namespace: &str, name: &str) -> Result<(), ClusterError> {
        let namespace = (!namespace.is_empty()).then_some(namespace);
        match self.client.delete(mapping, namespace, name).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }
}

/// Prune spec removing everything labelled as belonging to addon `name`
pub fn deletion_prune_spec(name: &str, field_manager: &str) -> Result<PruneSpec, SelectorError> {
    let selector =
        LabelSelector::from_labels([(MANAGED_BY_LABEL, field_manager), (ADDON_NAME_LABEL, name)])?;
    let label_selector = selector.to_string();
    let kinds = DELETION_KINDS
        .iter()
        .map(|(group, kind)| PruneKindSpec {
            group: group.to_string(),
            kind: kind.to_string(),
            label_selector: label_selector.clone(),
            ..PruneKindSpec::default()
        })
        .collect();
    Ok(PruneSpec { kinds })
}
