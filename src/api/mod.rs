//! Channel document types

pub mod addons;

pub use addons::{
    ADDONS_KIND, AddonSpec, Addons, AddonsSpec, PruneKindSpec, PruneSpec, RollingUpdate,
};
