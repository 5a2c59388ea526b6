//! The `Addons` channel document
//!
//! ```yaml
//! kind: Addons
//! spec:
//!   addons:
//!   - name: coredns.addons.k8s.io
//!     version: 1.8.3
//!     manifest: coredns.addons.k8s.io/k8s-1.12.yaml
//!     kubernetesVersion: ">=1.12.0"
//! ```
//!
//! Unknown fields are ignored.

use serde::{Deserialize, Serialize};

pub const ADDONS_KIND: &str = "Addons";

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Addons {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    #[serde(default)]
    pub spec: AddonsSpec,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AddonsSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub addons: Vec<AddonSpec>,
}

/// One addon entry of a channel
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddonSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Namespace holding the installed-version annotation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Location of the object list, relative to the channel when not absolute
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub manifest_hash: String,

    /// Space-separated semver constraints on the cluster version
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kubernetes_version: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,

    #[serde(default, skip_serializing_if = "RollingUpdate::is_none")]
    pub needs_rolling_update: RollingUpdate,

    #[serde(default, rename = "needsPKI", skip_serializing_if = "std::ops::Not::not")]
    pub needs_pki: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prune: Option<PruneSpec>,
}

/// Which nodes must be rolled after the addon changes
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum RollingUpdate {
    #[default]
    #[serde(alias = "")]
    None,
    ControlPlane,
    All,
}

impl RollingUpdate {
    pub fn is_none(&self) -> bool {
        *self == RollingUpdate::None
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RollingUpdate::None => "none",
            RollingUpdate::ControlPlane => "control-plane",
            RollingUpdate::All => "all",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PruneSpec {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<PruneKindSpec>,
}

/// Scope of one kind to prune
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PruneKindSpec {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub group: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub kind: String,

    /// Namespaces to list in; empty means one cluster-wide pass
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub namespaces: Vec<String>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label_selector: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub field_selector: String,
}
