//! A resolved addon and the work of bringing it up to date

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use super::applier::{ApplyError, Applier};
use super::channel::{AnnotationError, Channel};
use super::pruner::{PruneError, Pruner};
use super::version::{ChannelVersion, VersionError};
use crate::api::{AddonSpec, RollingUpdate};
use crate::applyset::cancellable;
use crate::k8s::ClusterClient;
use crate::manifest::{ManifestError, parse_manifest};
use crate::vfs::{FetchError, Fetcher};

pub const DEFAULT_NAMESPACE: &str = "kube-system";

#[derive(Error, Debug)]
pub enum AddonError {
    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Annotation(AnnotationError),

    #[error("error reading manifest: {0}")]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Apply(#[from] ApplyError),

    #[error("{failed} of {total} objects failed to apply (first error: {first})")]
    NotApplied {
        failed: usize,
        total: usize,
        first: String,
    },

    #[error("apply was cancelled")]
    Cancelled,

    #[error("error parsing manifest for pruning: {0}")]
    Manifest(#[from] ManifestError),

    #[error("error pruning: {0}")]
    Prune(PruneError),
}

impl From<AnnotationError> for AddonError {
    fn from(err: AnnotationError) -> Self {
        match err {
            AnnotationError::Cancelled => AddonError::Cancelled,
            err => AddonError::Annotation(err),
        }
    }
}

impl From<PruneError> for AddonError {
    fn from(err: PruneError) -> Self {
        match err {
            PruneError::Cancelled => AddonError::Cancelled,
            err => AddonError::Prune(err),
        }
    }
}

/// An addon selected from a channel
#[derive(Debug, Clone, PartialEq)]
pub struct Addon {
    pub name: String,
    pub channel_name: String,
    pub channel_location: Url,
    /// Manifest location, resolved against the channel
    pub manifest: Url,
    pub spec: AddonSpec,
}

/// A required change to one addon
#[derive(Debug, Clone, PartialEq)]
pub struct AddonUpdate {
    pub name: String,
    pub existing_version: Option<ChannelVersion>,
    pub new_version: ChannelVersion,
    pub needs_rolling_update: RollingUpdate,
    pub needs_pki: bool,
}

/// Collaborators used to converge an addon
pub struct UpdateContext {
    pub client: Arc<dyn ClusterClient>,
    pub fetcher: Arc<dyn Fetcher>,
    pub applier: Arc<dyn Applier>,
    pub pruner: Pruner,
    pub system_generation: u64,
}

fn non_empty(s: &str) -> Option<String> {
    (!s.is_empty()).then(|| s.to_string())
}

impl Addon {
    pub fn namespace(&self) -> &str {
        self.spec
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(DEFAULT_NAMESPACE)
    }

    /// The version this addon would record once installed
    pub fn channel_version(&self) -> ChannelVersion {
        ChannelVersion {
            version: non_empty(&self.spec.version),
            channel: Some(self.channel_name.clone()),
            id: non_empty(&self.spec.id),
            manifest_hash: non_empty(&self.spec.manifest_hash),
            system_generation: None,
        }
    }

    pub fn installed_channel(&self) -> Channel {
        Channel::new(self.namespace(), &self.name)
    }

    /// Compare against the recorded version; `None` when up to date
    pub async fn get_required_update(
        &self,
        client: &dyn ClusterClient,
        system_generation: u64,
        cancel: &CancellationToken,
    ) -> Result<Option<AddonUpdate>, AddonError> {
        let existing = self
            .installed_channel()
            .get_installed_version(client, cancel)
            .await?;
        let new_version = ChannelVersion {
            system_generation: (system_generation != 0).then_some(system_generation),
            ..self.channel_version()
        };

        if !new_version.replaces(&self.name, existing.as_ref())? {
            tracing::debug!(addon = %self.name, "addon is up to date");
            return Ok(None);
        }

        Ok(Some(AddonUpdate {
            name: self.name.clone(),
            existing_version: existing,
            new_version,
            needs_rolling_update: self.spec.needs_rolling_update,
            needs_pki: self.spec.needs_pki,
        }))
    }

    /// Apply the manifest if an update is required, prune, then record the
    /// new version. The version is only recorded when every object applied
    /// and pruning succeeded.
    pub async fn ensure_updated(
        &self,
        ctx: &UpdateContext,
        cancel: &CancellationToken,
    ) -> Result<Option<AddonUpdate>, AddonError> {
        let Some(update) = self
            .get_required_update(ctx.client.as_ref(), ctx.system_generation, cancel)
            .await?
        else {
            return Ok(None);
        };

        tracing::info!(addon = %self.name, manifest = %self.manifest, "applying addon");
        let data = cancellable(cancel, ctx.fetcher.read(&self.manifest))
            .await
            .ok_or(AddonError::Cancelled)??;
        let results = ctx.applier.apply(&data, cancel).await?;

        if results.cancelled() {
            return Err(AddonError::Cancelled);
        }
        if !results.all_applied() {
            let first = results
                .errors()
                .next()
                .map(|(key, err)| format!("{}: {}", key, err))
                .unwrap_or_default();
            return Err(AddonError::NotApplied {
                failed: results.apply_fail,
                total: results.total,
                first,
            });
        }
        if !results.all_healthy() {
            tracing::warn!(
                addon = %self.name,
                unhealthy = results.unhealthy,
                "addon applied but some objects are not healthy"
            );
        }

        if let Some(prune) = &self.spec.prune {
            let objects = parse_manifest(&data)?;
            let deleted = ctx.pruner.prune(&objects, prune, cancel).await?;
            tracing::debug!(addon = %self.name, deleted, "prune complete");
        }

        self.installed_channel()
            .set_installed_version(ctx.client.as_ref(), &update.new_version, cancel)
            .await?;
        Ok(Some(update))
    }
}
