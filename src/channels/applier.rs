//! Apply strategies: server-side apply through the API, or `kubectl apply`

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::applyset::{ApplyResults, ApplySet, ApplySetError, ApplySetOptions, ObjectError};
use crate::k8s::{ClusterClient, ClusterError, kubectl};
use crate::manifest::{ManifestError, parse_manifest};

#[derive(Error, Debug)]
pub enum ApplyError {
    #[error("failed to parse manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    ApplySet(#[from] ApplySetError),

    #[error("failed to stage manifest for kubectl: {0}")]
    Staging(#[from] std::io::Error),
}

#[async_trait]
pub trait Applier: Send + Sync {
    async fn apply(&self, manifest: &[u8], cancel: &CancellationToken) -> Result<ApplyResults, ApplyError>;
}

/// Server-side apply with field-manager migration and health tracking
pub struct ServerSideApplier {
    client: Arc<dyn ClusterClient>,
    options: ApplySetOptions,
}

impl ServerSideApplier {
    pub fn new(client: Arc<dyn ClusterClient>, options: ApplySetOptions) -> Self {
        Self { client, options }
    }
}

#[async_trait]
impl Applier for ServerSideApplier {
    async fn apply(&self, manifest: &[u8], cancel: &CancellationToken) -> Result<ApplyResults, ApplyError> {
        let objects = parse_manifest(manifest)?;
        let set = ApplySet::new(self.client.clone(), self.options.clone());
        set.set_desired_objects(objects)?;
        Ok(set.apply_once(cancel).await?)
    }
}

/// Shells out to `kubectl apply --server-side`. Results are all-or-nothing
/// and health is not observed.
pub struct KubectlApplier {
    kubeconfig: Option<PathBuf>,
    field_manager: String,
}

impl KubectlApplier {
    pub fn new(kubeconfig: Option<PathBuf>, field_manager: impl Into<String>) -> Self {
        Self {
            kubeconfig,
            field_manager: field_manager.into(),
        }
    }
}

#[async_trait]
impl Applier for KubectlApplier {
    async fn apply(&self, manifest: &[u8], cancel: &CancellationToken) -> Result<ApplyResults, ApplyError> {
        let objects = parse_manifest(manifest)?;
        if cancel.is_cancelled() {
            let mut results = ApplyResults::new(objects.len());
            for object in &objects {
                results.failed(object.key(), ObjectError::Cancelled);
            }
            return Ok(results);
        }

        let mut file = tempfile::Builder::new()
            .prefix("channel-")
            .suffix(".yaml")
            .tempfile()?;
        file.write_all(manifest)?;
        file.flush()?;

        let path = file.path().to_path_buf();
        let kubeconfig = self.kubeconfig.clone();
        let field_manager = self.field_manager.clone();
        let task = tokio::task::spawn_blocking(move || {
            kubectl::apply_file_server_side(&path, &field_manager, kubeconfig.as_deref())
        });

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            joined = task => Some(joined),
        };
        drop(file);

        let failure = match outcome {
            None => Some(None),
            Some(Ok(Ok(output))) => {
                tracing::debug!(output = %output.trim_end(), "kubectl apply succeeded");
                None
            }
            Some(Ok(Err(err))) => Some(Some(format!("{:#}", err))),
            Some(Err(join_err)) => Some(Some(join_err.to_string())),
        };

        let mut results = ApplyResults::new(objects.len());
        for object in &objects {
            match &failure {
                None => results.applied(object.key(), true),
                Some(None) => results.failed(object.key(), ObjectError::Cancelled),
                Some(Some(message)) => results.failed(
                    object.key(),
                    ObjectError::Apply(ClusterError::Rejected(message.clone())),
                ),
            }
        }
        if let Some(Some(message)) = &failure {
            tracing::warn!(error = %message, "kubectl apply failed");
        }
        Ok(results)
    }
}
