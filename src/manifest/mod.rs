//! Manifest object model: multi-document YAML split and parse

pub mod selector;

use serde_json::Value;
use std::fmt;
use thiserror::Error;

pub use selector::{FieldSelector, LabelSelector, SelectorError};

#[derive(Error, Debug)]
pub enum ManifestError {
    #[error("manifest is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("failed to parse document {index} of manifest: {source}")]
    Yaml {
        index: usize,
        source: serde_yaml::Error,
    },

    #[error("document {index} of manifest is missing {field}")]
    MissingField { index: usize, field: &'static str },

    #[error("failed to parse apiVersion {0:?}")]
    InvalidApiVersion(String),

    #[error("failed to serialize object {key}: {message}")]
    Serialize { key: String, message: String },
}

/// Group, version and kind of an object, as written in its `apiVersion`/`kind`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectGvk {
    pub group: String,
    pub version: String,
    pub kind: String,
}

impl ObjectGvk {
    pub fn new(group: impl Into<String>, version: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            version: version.into(),
            kind: kind.into(),
        }
    }

    /// Split an `apiVersion` like `apps/v1` (or core `v1`) and pair it with `kind`
    pub fn from_api_version(api_version: &str, kind: &str) -> Result<Self, ManifestError> {
        let (group, version) = match api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", api_version),
        };
        if version.is_empty() || version.contains('/') || (api_version.contains('/') && group.is_empty()) {
            return Err(ManifestError::InvalidApiVersion(api_version.to_string()));
        }
        Ok(Self::new(group, version, kind))
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.clone()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn group_kind(&self) -> GroupKind {
        GroupKind::new(&self.group, &self.kind)
    }
}

impl fmt::Display for ObjectGvk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, Kind={}", self.api_version(), self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}

/// Identity of an object: `{gvk, namespace, name}`. Cluster-scoped objects
/// carry an empty namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub gvk: ObjectGvk,
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    /// `namespace/name`, the form used by the pruner's keep-set
    pub fn namespaced_name(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.namespace.is_empty() {
            write!(f, "{} {}", self.gvk, self.name)
        } else {
            write!(f, "{} {}/{}", self.gvk, self.namespace, self.name)
        }
    }
}

/// One object of a manifest. The body is kept as an untyped JSON document;
/// the kind is only resolved to a REST resource at apply time.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestObject {
    pub gvk: ObjectGvk,
    pub namespace: Option<String>,
    pub name: String,
    pub body: Value,
}

impl ManifestObject {
    fn from_value(index: usize, body: Value) -> Result<Self, ManifestError> {
        let api_version = body
            .get("apiVersion")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(ManifestError::MissingField {
                index,
                field: "apiVersion",
            })?;
        let kind = body
            .get("kind")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(ManifestError::MissingField { index, field: "kind" })?;
        let name = body
            .pointer("/metadata/name")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or(ManifestError::MissingField {
                index,
                field: "metadata.name",
            })?
            .to_string();
        let namespace = body
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        Ok(Self {
            gvk: ObjectGvk::from_api_version(api_version, kind)?,
            namespace,
            name,
            body,
        })
    }

    pub fn key(&self) -> ObjectKey {
        ObjectKey {
            gvk: self.gvk.clone(),
            namespace: self.namespace.clone().unwrap_or_default(),
            name: self.name.clone(),
        }
    }

    /// Canonical JSON encoding of the desired object, as sent in the apply patch
    pub fn to_json(&self) -> Result<Vec<u8>, ManifestError> {
        serde_json::to_vec(&self.body).map_err(|e| ManifestError::Serialize {
            key: self.key().to_string(),
            message: e.to_string(),
        })
    }
}

/// Split a multi-document YAML stream on `---` separator lines.
pub fn split_documents(text: &str) -> Vec<String> {
    let mut documents = vec![String::new()];
    for line in text.lines() {
        if line.trim_end() == "---" {
            documents.push(String::new());
            continue;
        }
        if let Some(current) = documents.last_mut() {
            current.push_str(line);
            current.push('\n');
        }
    }
    documents
}

/// Parse manifest bytes into objects, in document order. Empty documents
/// (blank or comment-only) are skipped.
pub fn parse_manifest(data: &[u8]) -> Result<Vec<ManifestObject>, ManifestError> {
    let text = std::str::from_utf8(data)?;

    let mut objects = Vec::new();
    for (index, document) in split_documents(text).iter().enumerate() {
        let value: Value = serde_yaml::from_str(document)
            .map_err(|source| ManifestError::Yaml { index, source })?;
        if value.is_null() {
            continue;
        }
        objects.push(ManifestObject::from_value(index, value)?);
    }
    Ok(objects)
}
