//! Apply engine
//!
//! An `ApplySet` holds the desired objects of one manifest as a list of
//! trackers. `apply_once` visits them in manifest order: it resolves each
//! kind, migrates legacy field managers on objects that already exist,
//! server-side applies the desired body and records the resulting health.
//!
//! The tracker list is an immutable snapshot behind a mutex. Replacing the
//! desired objects swaps in a new list, so an apply already in flight keeps
//! working on the list it started with.

pub mod fieldpath;
pub mod health;
pub mod managed_fields;
pub mod results;

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use kube::api::DynamicObject;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::k8s::{ClusterClient, ClusterError, PatchType};
use crate::manifest::{ManifestError, ManifestObject, ObjectKey};

pub use managed_fields::{DEFAULT_LEGACY_MANAGERS, ManagedFieldsMigrator, MigrateError};
pub use results::{ApplyResults, ObjectOutcome, ObjectResult};

/// Failure of a single object; recorded in `ApplyResults`, never fatal for
/// the pass.
#[derive(Error, Debug)]
pub enum ObjectError {
    #[error("unknown kind: {0}")]
    UnknownKind(String),

    #[error("{0}")]
    Scope(String),

    #[error("failed to get object: {0}")]
    Get(ClusterError),

    #[error("failed to migrate field managers: {0}")]
    Migrate(#[from] MigrateError),

    #[error("failed to apply object: {0}")]
    Apply(ClusterError),

    #[error("apply was cancelled")]
    Cancelled,
}

/// Failure that aborts an `ApplySet` call as a whole
#[derive(Error, Debug)]
pub enum ApplySetError {
    #[error("object {0} appears more than once in the desired set")]
    DuplicateObject(String),

    #[error("failed to encode desired object: {0}")]
    Encode(#[from] ManifestError),

    #[error("cannot resolve resource mappings: {0}")]
    Discovery(ClusterError),
}

pub const DEFAULT_FIELD_MANAGER: &str = "kops";

#[derive(Debug, Clone)]
pub struct ApplySetOptions {
    /// Field manager owning everything the set applies
    pub field_manager: String,
    /// Take ownership of fields held by other managers on conflict
    pub force: bool,
    /// Managers whose entries are migrated to `field_manager`
    pub legacy_managers: Vec<String>,
}

impl Default for ApplySetOptions {
    fn default() -> Self {
        Self {
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            force: true,
            legacy_managers: DEFAULT_LEGACY_MANAGERS.iter().map(|m| m.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TrackerState {
    Desired,
    Applying,
    Applied { healthy: bool },
    Failed(String),
}

#[derive(Debug)]
struct TrackerStatus {
    state: TrackerState,
    last_applied: Option<DynamicObject>,
    desired_is_applied: bool,
    is_healthy: bool,
}

/// Desired object plus what we last observed for it
#[derive(Debug)]
pub struct ObjectTracker {
    object: ManifestObject,
    desired_json: Vec<u8>,
    status: Mutex<TrackerStatus>,
}

impl ObjectTracker {
    fn new(object: ManifestObject, desired_json: Vec<u8>) -> Self {
        Self {
            object,
            desired_json,
            status: Mutex::new(TrackerStatus {
                state: TrackerState::Desired,
                last_applied: None,
                desired_is_applied: false,
                is_healthy: false,
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerStatus> {
        self.status.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn object(&self) -> &ManifestObject {
        &self.object
    }

    pub fn key(&self) -> ObjectKey {
        self.object.key()
    }

    pub fn state(&self) -> TrackerState {
        self.lock().state.clone()
    }

    pub fn desired_is_applied(&self) -> bool {
        self.lock().desired_is_applied
    }

    pub fn is_healthy(&self) -> bool {
        self.lock().is_healthy
    }

    pub fn last_applied(&self) -> Option<DynamicObject> {
        self.lock().last_applied.clone()
    }

    fn set_state(&self, state: TrackerState) {
        self.lock().state = state;
    }

    fn record_applied(&self, applied: DynamicObject, healthy: bool) {
        let mut status = self.lock();
        status.state = TrackerState::Applied { healthy };
        status.last_applied = Some(applied);
        status.desired_is_applied = true;
        status.is_healthy = healthy;
    }
}

#[derive(Debug, Default)]
struct TrackerList {
    items: Vec<Arc<ObjectTracker>>,
}

pub struct ApplySet {
    client: Arc<dyn ClusterClient>,
    options: ApplySetOptions,
    migrator: ManagedFieldsMigrator,
    trackers: Mutex<Arc<TrackerList>>,
}

pub(crate) async fn cancellable<T>(cancel: &CancellationToken, fut: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        out = fut => Some(out),
    }
}

impl ApplySet {
    pub fn new(client: Arc<dyn ClusterClient>, options: ApplySetOptions) -> Self {
        let migrator =
            ManagedFieldsMigrator::new(options.field_manager.clone(), options.legacy_managers.clone());
        Self {
            client,
            options,
            migrator,
            trackers: Mutex::new(Arc::new(TrackerList::default())),
        }
    }

    fn snapshot(&self) -> Arc<TrackerList> {
        self.trackers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn trackers(&self) -> Vec<Arc<ObjectTracker>> {
        self.snapshot().items.clone()
    }

    /// Replace the desired objects. Trackers of unchanged objects are reused;
    /// changed objects keep their last observation but are marked as not
    /// yet applied.
    pub fn set_desired_objects(&self, objects: Vec<ManifestObject>) -> Result<(), ApplySetError> {
        let current = self.snapshot();
        let existing: HashMap<ObjectKey, &Arc<ObjectTracker>> =
            current.items.iter().map(|t| (t.key(), t)).collect();

        let mut seen = std::collections::HashSet::new();
        let mut items = Vec::with_capacity(objects.len());
        for object in objects {
            let key = object.key();
            if !seen.insert(key.clone()) {
                return Err(ApplySetError::DuplicateObject(key.to_string()));
            }
            let desired_json = object.to_json()?;
            let tracker = match existing.get(&key) {
                Some(old) if old.desired_json == desired_json => Arc::clone(old),
                Some(old) => {
                    let tracker = ObjectTracker::new(object, desired_json);
                    {
                        let previous = old.lock();
                        let mut status = tracker.lock();
                        status.last_applied = previous.last_applied.clone();
                        status.is_healthy = previous.is_healthy;
                    }
                    Arc::new(tracker)
                }
                None => Arc::new(ObjectTracker::new(object, desired_json)),
            };
            items.push(tracker);
        }

        *self.trackers.lock().unwrap_or_else(|e| e.into_inner()) = Arc::new(TrackerList { items });
        Ok(())
    }

    /// Apply every desired object once, in order. Per-object failures are
    /// collected in the results; only a discovery failure aborts the pass.
    /// On cancellation the current and remaining objects are reported as
    /// cancelled.
    pub async fn apply_once(&self, cancel: &CancellationToken) -> Result<ApplyResults, ApplySetError> {
        let trackers = self.snapshot();
        let mut results = ApplyResults::new(trackers.items.len());

        for tracker in &trackers.items {
            let key = tracker.key();
            if cancel.is_cancelled() {
                tracker.set_state(TrackerState::Failed(ObjectError::Cancelled.to_string()));
                results.failed(key, ObjectError::Cancelled);
                continue;
            }

            tracker.set_state(TrackerState::Applying);
            match self.apply_object(tracker, cancel).await? {
                Ok((applied, healthy)) => {
                    tracing::debug!(object = %key, healthy, "applied object");
                    tracker.record_applied(applied, healthy);
                    results.applied(key, healthy);
                }
                Err(err) => {
                    if !matches!(err, ObjectError::Cancelled) {
                        tracing::warn!(object = %key, error = %err, "failed to apply object");
                    }
                    tracker.set_state(TrackerState::Failed(err.to_string()));
                    results.failed(key, err);
                }
            }
        }

        tracing::info!("{}", results.summary());
        Ok(results)
    }

    async fn apply_object(
        &self,
        tracker: &ObjectTracker,
        cancel: &CancellationToken,
    ) -> Result<Result<(DynamicObject, bool), ObjectError>, ApplySetError> {
        let object = tracker.object();
        let client = self.client.as_ref();

        let mapping = match cancellable(cancel, client.rest_mapping(&object.gvk)).await {
            None => return Ok(Err(ObjectError::Cancelled)),
            Some(Ok(mapping)) => mapping,
            Some(Err(err @ ClusterError::Discovery(_))) => return Err(ApplySetError::Discovery(err)),
            Some(Err(err)) => return Ok(Err(ObjectError::UnknownKind(err.to_string()))),
        };

        let namespace = object.namespace.as_deref();
        match (mapping.is_namespaced(), namespace) {
            (true, None) => {
                return Ok(Err(ObjectError::Scope(format!(
                    "{} is namespaced but {} has no namespace",
                    object.gvk.kind, object.name
                ))));
            }
            (false, Some(ns)) => {
                return Ok(Err(ObjectError::Scope(format!(
                    "{} is cluster-scoped but {} specifies namespace {}",
                    object.gvk.kind, object.name, ns
                ))));
            }
            _ => {}
        }

        let existing = match cancellable(cancel, client.get(&mapping, namespace, &object.name)).await {
            None => return Ok(Err(ObjectError::Cancelled)),
            Some(Ok(existing)) => existing,
            Some(Err(err)) => return Ok(Err(ObjectError::Get(err))),
        };

        if let Some(existing) = existing {
            match cancellable(cancel, self.migrator.migrate(client, &mapping, &existing)).await {
                None => return Ok(Err(ObjectError::Cancelled)),
                Some(Err(err)) => return Ok(Err(ObjectError::Migrate(err))),
                Some(Ok(_)) => {}
            }
        }

        let patch_type = PatchType::Apply {
            field_manager: self.options.field_manager.clone(),
            force: self.options.force,
        };
        let applied = match cancellable(
            cancel,
            client.patch(&mapping, namespace, &object.name, &patch_type, &object.body),
        )
        .await
        {
            None => return Ok(Err(ObjectError::Cancelled)),
            Some(Ok(applied)) => applied,
            Some(Err(err)) => return Ok(Err(ObjectError::Apply(err))),
        };

        let healthy = health::is_healthy(&applied);
        Ok(Ok((applied, healthy)))
    }
}
