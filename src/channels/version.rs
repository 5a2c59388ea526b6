//! Installed-version records and the arbiter deciding whether one replaces another

use semver::Version;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum VersionError {
    #[error("addon {name:?} has unparseable version {version:?}: {message}")]
    Unparseable {
        name: String,
        version: String,
        message: String,
    },

    #[error("cannot parse kubernetes version {0:?}")]
    Kubernetes(String),

    #[error("invalid kubernetesVersion expression {expression:?}: {message}")]
    Predicate { expression: String, message: String },
}

/// Identity of an addon version, as recorded in the `addons.k8s.io/<name>`
/// namespace annotation.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChannelVersion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_hash: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_generation: Option<u64>,
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| !v.is_empty())
}

/// Strict semver parse of an addon version
pub fn parse_addon_version(name: &str, version: &str) -> Result<Version, VersionError> {
    Version::parse(version).map_err(|e| VersionError::Unparseable {
        name: name.to_string(),
        version: version.to_string(),
        message: e.to_string(),
    })
}

impl ChannelVersion {
    /// Decide whether `self` must overwrite `existing` for addon `name`
    pub fn replaces(&self, name: &str, existing: Option<&ChannelVersion>) -> Result<bool, VersionError> {
        let Some(existing) = existing else {
            return Ok(true);
        };

        let new_version = non_empty(&self.version)
            .map(|v| parse_addon_version(name, v))
            .transpose()?;
        let existing_version = non_empty(&existing.version)
            .map(|v| parse_addon_version(name, v))
            .transpose()?;

        let ordering = match (&new_version, &existing_version) {
            (Some(new), Some(old)) => Some(new.cmp_precedence(old)),
            _ => None,
        };

        if let (Some(new_id), Some(old_id)) = (non_empty(&self.id), non_empty(&existing.id))
            && new_id != old_id
            && matches!(ordering, None | Some(Ordering::Equal))
        {
            return Ok(true);
        }

        match (&new_version, &existing_version) {
            (None, Some(old)) => {
                tracing::warn!(
                    addon = name,
                    existing = %old,
                    "new version of addon has no version; not replacing"
                );
                return Ok(false);
            }
            (Some(_), None) => return Ok(true),
            _ => {}
        }

        match ordering {
            Some(Ordering::Greater) => return Ok(true),
            Some(Ordering::Less) => return Ok(false),
            _ => {}
        }

        if let Some(hash) = non_empty(&self.manifest_hash)
            && non_empty(&existing.manifest_hash) != Some(hash)
        {
            tracing::debug!(addon = name, "manifest hash changed");
            return Ok(true);
        }

        if self.system_generation.unwrap_or(0) != existing.system_generation.unwrap_or(0) {
            return Ok(true);
        }

        Ok(false)
    }
}

impl fmt::Display for ChannelVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(v) = non_empty(&self.version) {
            parts.push(format!("Version={}", v));
        }
        if let Some(id) = non_empty(&self.id) {
            parts.push(format!("Id={}", id));
        }
        if let Some(hash) = non_empty(&self.manifest_hash) {
            parts.push(format!("ManifestHash={}", hash));
        }
        if let Some(channel) = non_empty(&self.channel) {
            parts.push(format!("Channel={}", channel));
        }
        if let Some(generation) = self.system_generation.filter(|g| *g != 0) {
            parts.push(format!("SystemGeneration={}", generation));
        }
        write!(f, "{}", parts.join(" "))
    }
}

/// Tolerant version parse: strips a leading `v`, drops pre-release and
/// build metadata, and pads a missing minor or patch with zero.
pub fn parse_tolerant(version: &str) -> Option<Version> {
    let trimmed = version.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);
    let core = trimmed.split(['+', '-']).next().unwrap_or_default();
    let mut numbers = [0u64; 3];
    let mut count = 0;
    for (i, part) in core.split('.').enumerate() {
        if i >= 3 {
            return None;
        }
        numbers[i] = part.parse().ok()?;
        count += 1;
    }
    if count == 0 {
        return None;
    }
    Some(Version::new(numbers[0], numbers[1], numbers[2]))
}

/// Parse a `gitVersion` such as `v1.27.3-eks-2d98532`
pub fn parse_kubernetes_version(git_version: &str) -> Result<Version, VersionError> {
    parse_tolerant(git_version).ok_or_else(|| VersionError::Kubernetes(git_version.to_string()))
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

/// A `kubernetesVersion` expression: space-separated constraints that must all
/// hold, with `||` separating alternatives.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionPredicate {
    alternatives: Vec<Vec<(Op, Version)>>,
}

impl VersionPredicate {
    pub fn parse(expression: &str) -> Result<Self, VersionError> {
        let invalid = |message: String| VersionError::Predicate {
            expression: expression.to_string(),
            message,
        };

        let mut alternatives = Vec::new();
        for alternative in expression.split("||") {
            let mut constraints = Vec::new();
            for token in alternative.split_whitespace() {
                let (op, rest) = [
                    (">=", Op::Ge),
                    ("<=", Op::Le),
                    ("!=", Op::Ne),
                    ("==", Op::Eq),
                    (">", Op::Gt),
                    ("<", Op::Lt),
                    ("=", Op::Eq),
                ]
                .iter()
                .find_map(|(prefix, op)| token.strip_prefix(prefix).map(|rest| (*op, rest)))
                .unwrap_or((Op::Eq, token));
                let version =
                    parse_tolerant(rest).ok_or_else(|| invalid(format!("bad version {:?}", rest)))?;
                constraints.push((op, version));
            }
            if constraints.is_empty() {
                return Err(invalid("empty constraint".to_string()));
            }
            alternatives.push(constraints);
        }
        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.alternatives.iter().any(|constraints| {
            constraints.iter().all(|(op, bound)| {
                let ordering = version.cmp_precedence(bound);
                match op {
                    Op::Eq => ordering == Ordering::Equal,
                    Op::Ne => ordering != Ordering::Equal,
                    Op::Gt => ordering == Ordering::Greater,
                    Op::Ge => ordering != Ordering::Less,
                    Op::Lt => ordering == Ordering::Less,
                    Op::Le => ordering != Ordering::Greater,
                }
            })
        })
    }
}
