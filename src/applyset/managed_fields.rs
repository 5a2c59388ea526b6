//! Migration of client-side field managers to the server-side apply manager
//!
//! Objects first created with `kubectl apply` (or touched by `kubectl edit`)
//! carry `Update` entries under the kubectl managers. Server-side apply under
//! the canonical manager would then conflict with those owners, so before
//! applying we rewrite the entries to `<canonical>:Apply` and merge any
//! entries that end up sharing a key.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{FieldsV1, ManagedFieldsEntry};
use kube::api::DynamicObject;
use serde_json::{Value, json};
use thiserror::Error;

use super::fieldpath::{FieldSet, FieldSetError};
use crate::k8s::{ClusterClient, ClusterError, PatchType, RestMapping};

pub const DEFAULT_LEGACY_MANAGERS: [&str; 2] = ["kubectl-edit", "kubectl-client-side-apply"];

const OPERATION_APPLY: &str = "Apply";
const OPERATION_UPDATE: &str = "Update";

#[derive(Error, Debug)]
pub enum MigrateError {
    #[error(
        "managed fields of {manager}:{operation} have conflicting apiVersions {first:?} and {second:?}"
    )]
    ApiVersionMismatch {
        manager: String,
        operation: String,
        first: String,
        second: String,
    },

    #[error("failed to decode managed fields of {manager}: {source}")]
    Decode {
        manager: String,
        source: FieldSetError,
    },

    #[error("failed to encode managed fields: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("failed to patch managed fields: {0}")]
    Patch(#[from] ClusterError),
}

type GroupKey = (String, String, String);

fn group_key(entry: &ManagedFieldsEntry) -> GroupKey {
    (
        entry.manager.clone().unwrap_or_default(),
        entry.operation.clone().unwrap_or_default(),
        entry.subresource.clone().unwrap_or_default(),
    )
}

fn fields_of(entry: &ManagedFieldsEntry) -> Result<FieldSet, MigrateError> {
    match &entry.fields_v1 {
        Some(FieldsV1(value)) => FieldSet::from_value(value).map_err(|source| MigrateError::Decode {
            manager: entry.manager.clone().unwrap_or_default(),
            source,
        }),
        None => Ok(FieldSet::default()),
    }
}

#[derive(Debug, Clone)]
pub struct ManagedFieldsMigrator {
    canonical: String,
    legacy: Vec<String>,
}

impl ManagedFieldsMigrator {
    pub fn new(canonical: impl Into<String>, legacy: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            canonical: canonical.into(),
            legacy: legacy.into_iter().map(Into::into).collect(),
        }
    }

    /// Rewrite `entries`, or `None` when no entry names a legacy manager or
    /// a canonical `Update`.
    pub fn migrate_entries(
        &self,
        entries: &[ManagedFieldsEntry],
    ) -> Result<Option<Vec<ManagedFieldsEntry>>, MigrateError> {
        let mut changed = false;
        let mut rewritten = Vec::with_capacity(entries.len());
        for entry in entries {
            let mut entry = entry.clone();
            let manager = entry.manager.as_deref().unwrap_or_default();
            if self.legacy.iter().any(|l| l == manager) {
                entry.manager = Some(self.canonical.clone());
                entry.operation = Some(OPERATION_APPLY.to_string());
                changed = true;
            } else if manager == self.canonical
                && entry.operation.as_deref() == Some(OPERATION_UPDATE)
            {
                entry.operation = Some(OPERATION_APPLY.to_string());
                changed = true;
            }
            rewritten.push(entry);
        }
        if !changed {
            return Ok(None);
        }

        let mut merged: Vec<(GroupKey, ManagedFieldsEntry, Option<FieldSet>)> = Vec::new();
        for entry in rewritten {
            let key = group_key(&entry);
            let Some(index) = merged.iter().position(|(k, _, _)| *k == key) else {
                merged.push((key, entry, None));
                continue;
            };
            let (_, first, fields) = &mut merged[index];
            if first.api_version != entry.api_version {
                return Err(MigrateError::ApiVersionMismatch {
                    manager: key.0,
                    operation: key.1,
                    first: first.api_version.clone().unwrap_or_default(),
                    second: entry.api_version.clone().unwrap_or_default(),
                });
            }
            if fields.is_none() {
                *fields = Some(fields_of(first)?);
            }
            if let Some(union) = fields {
                union.union(&fields_of(&entry)?);
            }
        }

        let mut out: Vec<ManagedFieldsEntry> = merged
            .into_iter()
            .map(|(_, mut entry, fields)| {
                if let Some(fields) = fields {
                    entry.fields_type = Some("FieldsV1".to_string());
                    entry.fields_v1 = Some(FieldsV1(fields.to_value()));
                }
                entry
            })
            .collect();
        out.sort_by(|a, b| {
            let key = |e: &ManagedFieldsEntry| {
                (
                    e.manager.clone().unwrap_or_default(),
                    e.subresource.clone().unwrap_or_default(),
                    e.operation.clone().unwrap_or_default(),
                )
            };
            key(a).cmp(&key(b))
        });
        Ok(Some(out))
    }

    /// Metadata-only merge patch carrying the migrated entries, pinned to the
    /// observed resourceVersion.
    pub fn build_patch(&self, object: &DynamicObject) -> Result<Option<Value>, MigrateError> {
        let entries = object.metadata.managed_fields.as_deref().unwrap_or_default();
        let Some(migrated) = self.migrate_entries(entries)? else {
            return Ok(None);
        };
        let mut metadata = json!({ "managedFields": serde_json::to_value(&migrated)? });
        if let Some(rv) = &object.metadata.resource_version {
            metadata["resourceVersion"] = Value::String(rv.clone());
        }
        Ok(Some(json!({ "metadata": metadata })))
    }

    /// Patch `object` on the cluster if its managers need migrating.
    /// Returns whether a patch was sent.
    pub async fn migrate(
        &self,
        client: &dyn ClusterClient,
        mapping: &RestMapping,
        object: &DynamicObject,
    ) -> Result<bool, MigrateError> {
        let Some(patch) = self.build_patch(object)? else {
            return Ok(false);
        };
        let name = object.metadata.name.as_deref().unwrap_or_default();
        let namespace = object.metadata.namespace.as_deref();
        tracing::info!(
            resource = %mapping.resource.plural,
            namespace = namespace.unwrap_or_default(),
            name,
            manager = %self.canonical,
            "migrating managed fields"
        );
        client
            .patch(mapping, namespace, name, &PatchType::Merge, &patch)
            .await?;
        Ok(true)
    }
}
