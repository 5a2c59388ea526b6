//! `FieldsV1` field sets as a prefix tree of path segments

use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("invalid FieldsV1 at {path:?}: expected an object")]
pub struct FieldSetError {
    pub path: String,
}

/// Set of field paths owned by a manager. Each node is one path segment
/// (`f:spec`, `k:{"name":"c"}`, `.`); a node without children is a leaf.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldSet {
    children: BTreeMap<String, FieldSet>,
}

impl FieldSet {
    pub fn from_value(value: &Value) -> Result<Self, FieldSetError> {
        Self::decode(value, "")
    }

    fn decode(value: &Value, path: &str) -> Result<Self, FieldSetError> {
        let Value::Object(map) = value else {
            return Err(FieldSetError {
                path: path.to_string(),
            });
        };
        let mut children = BTreeMap::new();
        for (segment, child) in map {
            let child_path = format!("{}/{}", path, segment);
            children.insert(segment.clone(), Self::decode(child, &child_path)?);
        }
        Ok(Self { children })
    }

    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .children
            .iter()
            .map(|(segment, child)| (segment.clone(), child.to_value()))
            .collect();
        Value::Object(map)
    }

    pub fn union(&mut self, other: &FieldSet) {
        for (segment, child) in &other.children {
            self.children
                .entry(segment.clone())
                .or_default()
                .union(child);
        }
    }

    /// Every root-to-node path, `/`-joined
    pub fn paths(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_paths("", &mut out);
        out
    }

    fn collect_paths(&self, prefix: &str, out: &mut BTreeSet<String>) {
        for (segment, child) in &self.children {
            let path = format!("{}/{}", prefix, segment);
            child.collect_paths(&path, out);
            out.insert(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_union_merges_nested_paths() {
        let mut a = FieldSet::from_value(&json!({
            "f:metadata": {"f:labels": {".": {}, "f:app": {}}},
            "f:spec": {"f:minAvailable": {}},
        }))
        .unwrap();
        let b = FieldSet::from_value(&json!({
            "f:metadata": {"f:annotations": {"f:foo": {}}, "f:labels": {"f:tier": {}}},
        }))
        .unwrap();
        a.union(&b);

        assert_eq!(
            a.to_value(),
            json!({
                "f:metadata": {
                    "f:annotations": {"f:foo": {}},
                    "f:labels": {".": {}, "f:app": {}, "f:tier": {}},
                },
                "f:spec": {"f:minAvailable": {}},
            })
        );
    }

    #[test]
    fn test_paths_cover_both_inputs() {
        let a = FieldSet::from_value(&json!({"f:a": {"f:b": {}}})).unwrap();
        let b = FieldSet::from_value(&json!({"f:c": {}})).unwrap();
        let mut merged = a.clone();
        merged.union(&b);
        let paths = merged.paths();
        assert!(a.paths().is_subset(&paths));
        assert!(b.paths().is_subset(&paths));
        assert_eq!(paths.len(), 3);
    }

    #[test]
    fn test_rejects_non_object() {
        let err = FieldSet::from_value(&json!({"f:a": 1})).unwrap_err();
        assert_eq!(err.path, "/f:a");
    }
}
