//! Addon channels: applies versioned addon manifests to a Kubernetes cluster
//! with server-side apply, field-manager migration and selective pruning.

pub mod api;
pub mod applyset;
pub mod channels;
pub mod commands;
pub mod config;
pub mod k8s;
pub mod manifest;
pub mod utils;
pub mod vfs;
