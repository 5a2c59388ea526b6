//! Addon channels: loading, version arbitration, planning and convergence

pub mod addon;
pub mod addons;
pub mod applier;
pub mod channel;
pub mod menu;
pub mod planner;
pub mod pruner;
pub mod version;

use thiserror::Error;

use crate::vfs::FetchError;

pub use addon::{Addon, AddonError, AddonUpdate, UpdateContext};
pub use addons::{AddonsChannel, load_addons, parse_addons};
pub use applier::{ApplyError, Applier, KubectlApplier, ServerSideApplier};
pub use channel::{AnnotationError, Channel, installed_versions};
pub use menu::AddonMenu;
pub use planner::{delete_addon, find_deletions, plan_updates};
pub use pruner::{PruneError, Pruner, deletion_prune_spec};
pub use version::{ChannelVersion, VersionError, VersionPredicate};

/// Failure to load a channel; fatal for the whole run
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("error reading channel {location}: {source}")]
    Fetch { location: String, source: FetchError },

    #[error("error parsing channel {location}: {source}")]
    Parse {
        location: String,
        source: serde_yaml::Error,
    },

    #[error("channel {location} has kind {kind:?}, expected \"Addons\"")]
    InvalidKind { location: String, kind: String },

    #[error("invalid addon in channel {location}: {message}")]
    InvalidAddon { location: String, message: String },

    #[error("invalid channel location {location:?}: {message}")]
    InvalidUrl { location: String, message: String },

    #[error("channel {location}: {source}")]
    Version {
        location: String,
        source: VersionError,
    },
}
