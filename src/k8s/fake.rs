//! In-memory `ClusterClient` used by unit tests
//!
//! Objects are stored as JSON. Server-side apply replaces the stored body
//! while keeping server-owned metadata and status; merge and strategic patches
//! use JSON merge-patch semantics with an optional resourceVersion check.

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::api::DynamicObject;
use kube::discovery::ApiResource;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::client::{ClusterClient, ClusterError, PatchType, ResourceScope, RestMapping};
use crate::manifest::{FieldSelector, GroupKind, LabelSelector, ObjectGvk};

type StoreKey = (String, String, String, String);

#[derive(Default)]
struct FakeState {
    version: String,
    mappings: Vec<(ObjectGvk, RestMapping)>,
    objects: BTreeMap<StoreKey, Value>,
    namespaces: BTreeMap<String, Value>,
    requests: Vec<String>,
    patches: Vec<(String, PatchType, Value)>,
    failures: Vec<(String, String)>,
    discovery_broken: bool,
    cancel_after: Option<(String, CancellationToken)>,
    next_resource_version: u64,
}

pub struct FakeCluster {
    state: Mutex<FakeState>,
}

impl Default for FakeCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        let cluster = Self {
            state: Mutex::new(FakeState {
                version: "v1.31.2".to_string(),
                next_resource_version: 1,
                ..FakeState::default()
            }),
        };
        for (api_version, kind, plural, scope) in [
            ("v1", "ConfigMap", "configmaps", ResourceScope::Namespaced),
            ("v1", "Service", "services", ResourceScope::Namespaced),
            ("v1", "ServiceAccount", "serviceaccounts", ResourceScope::Namespaced),
            ("apps/v1", "Deployment", "deployments", ResourceScope::Namespaced),
            ("apps/v1", "DaemonSet", "daemonsets", ResourceScope::Namespaced),
            ("apps/v1", "StatefulSet", "statefulsets", ResourceScope::Namespaced),
            ("policy/v1", "PodDisruptionBudget", "poddisruptionbudgets", ResourceScope::Namespaced),
            ("rbac.authorization.k8s.io/v1", "ClusterRole", "clusterroles", ResourceScope::Cluster),
            ("rbac.authorization.k8s.io/v1", "ClusterRoleBinding", "clusterrolebindings", ResourceScope::Cluster),
            ("rbac.authorization.k8s.io/v1", "Role", "roles", ResourceScope::Namespaced),
            ("rbac.authorization.k8s.io/v1", "RoleBinding", "rolebindings", ResourceScope::Namespaced),
        ] {
            cluster.add_mapping(api_version, kind, plural, scope);
        }
        cluster
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_version(&self, version: &str) {
        self.lock().version = version.to_string();
    }

    pub fn add_mapping(&self, api_version: &str, kind: &str, plural: &str, scope: ResourceScope) {
        let gvk = ObjectGvk::from_api_version(api_version, kind).unwrap();
        let resource = ApiResource {
            group: gvk.group.clone(),
            version: gvk.version.clone(),
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            plural: plural.to_string(),
        };
        self.lock().mappings.push((gvk, RestMapping::new(resource, scope)));
    }

    pub fn break_discovery(&self) {
        self.lock().discovery_broken = true;
    }

    /// Make `verb` (GET, LIST, PATCH, DELETE, PATCH-NAMESPACE) fail for `target`,
    /// which is `namespace/name`, or the namespace alone for LIST.
    pub fn fail(&self, verb: &str, target: &str) {
        self.lock()
            .failures
            .push((verb.to_string(), target.to_string()));
    }

    /// Cancel `token` once a `verb` request has been served
    pub fn cancel_after(&self, verb: &str, token: CancellationToken) {
        self.lock().cancel_after = Some((verb.to_string(), token));
    }

    pub fn add_namespace(&self, name: &str) {
        self.lock().namespaces.insert(
            name.to_string(),
            json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": name}}),
        );
    }

    pub fn add_namespace_annotation(&self, namespace: &str, key: &str, value: &str) {
        let mut state = self.lock();
        let ns = state
            .namespaces
            .entry(namespace.to_string())
            .or_insert_with(|| json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": namespace}}));
        ns["metadata"]["annotations"][key] = Value::String(value.to_string());
    }

    pub fn namespace_annotations(&self, namespace: &str) -> BTreeMap<String, String> {
        self.lock()
            .namespaces
            .get(namespace)
            .and_then(|ns| ns.pointer("/metadata/annotations"))
            .and_then(Value::as_object)
            .map(|a| {
                a.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Store an object as-is, bypassing apply semantics
    pub fn add_object(&self, object: Value) {
        let gvk = ObjectGvk::from_api_version(
            object["apiVersion"].as_str().unwrap(),
            object["kind"].as_str().unwrap(),
        )
        .unwrap();
        let mut state = self.lock();
        let mapping = state
            .mappings
            .iter()
            .find(|(g, _)| *g == gvk)
            .map(|(_, m)| m.clone())
            .expect("kind registered in fake cluster");
        let namespace = object
            .pointer("/metadata/namespace")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let name = object["metadata"]["name"].as_str().unwrap().to_string();
        state
            .objects
            .insert(store_key(&mapping, Some(&namespace), &name), object);
    }

    pub fn object(&self, api_version: &str, kind: &str, namespace: &str, name: &str) -> Option<Value> {
        let gvk = ObjectGvk::from_api_version(api_version, kind).unwrap();
        let state = self.lock();
        let (_, mapping) = state.mappings.iter().find(|(g, _)| *g == gvk)?;
        state
            .objects
            .get(&store_key(mapping, Some(namespace), name))
            .cloned()
    }

    /// `namespace/name` of every stored object of `kind`
    pub fn object_names(&self, kind: &str) -> Vec<String> {
        self.lock()
            .objects
            .iter()
            .filter(|(_, v)| v["kind"] == kind)
            .map(|((_, _, ns, name), _)| format!("{}/{}", ns, name))
            .collect()
    }

    pub fn requests(&self) -> Vec<String> {
        self.lock().requests.clone()
    }

    pub fn patches(&self) -> Vec<(String, PatchType, Value)> {
        self.lock().patches.clone()
    }

    fn record(&self, verb: &str, target: String) -> Result<(), ClusterError> {
        let mut state = self.lock();
        state.requests.push(format!("{} {}", verb, target));
        let failed = state
            .failures
            .iter()
            .any(|(v, t)| v == verb && target.ends_with(&format!(" {}", t)));
        if failed {
            return Err(ClusterError::Rejected(format!("injected failure for {} {}", verb, target)));
        }
        if let Some((_, token)) = state.cancel_after.as_ref().filter(|(v, _)| v == verb) {
            token.cancel();
        }
        Ok(())
    }
}

fn store_key(mapping: &RestMapping, namespace: Option<&str>, name: &str) -> StoreKey {
    let namespace = if mapping.is_namespaced() {
        namespace.unwrap_or_default().to_string()
    } else {
        String::new()
    };
    (
        mapping.resource.group.clone(),
        mapping.resource.plural.clone(),
        namespace,
        name.to_string(),
    )
}

fn describe(mapping: &RestMapping, namespace: Option<&str>, name: &str) -> String {
    format!("{} {}/{}", mapping.resource.plural, namespace.unwrap_or_default(), name)
}

fn decode(value: &Value) -> Result<DynamicObject, ClusterError> {
    serde_json::from_value(value.clone()).map_err(|source| ClusterError::Decode {
        what: "object".to_string(),
        source,
    })
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn server_version(&self) -> Result<String, ClusterError> {
        Ok(self.lock().version.clone())
    }

    async fn rest_mapping(&self, gvk: &ObjectGvk) -> Result<RestMapping, ClusterError> {
        let state = self.lock();
        if state.discovery_broken {
            return Err(ClusterError::Discovery("discovery unavailable".to_string()));
        }
        state
            .mappings
            .iter()
            .find(|(g, _)| g == gvk)
            .map(|(_, m)| m.clone())
            .ok_or_else(|| ClusterError::UnknownKind(gvk.to_string()))
    }

    async fn rest_mapping_for_kind(&self, gk: &GroupKind) -> Result<RestMapping, ClusterError> {
        let state = self.lock();
        if state.discovery_broken {
            return Err(ClusterError::Discovery("discovery unavailable".to_string()));
        }
        state
            .mappings
            .iter()
            .find(|(g, _)| g.group_kind() == *gk)
            .map(|(_, m)| m.clone())
            .ok_or_else(|| ClusterError::UnknownKind(gk.to_string()))
    }

    async fn get(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<DynamicObject>, ClusterError> {
        self.record("GET", describe(mapping, namespace, name))?;
        let state = self.lock();
        state
            .objects
            .get(&store_key(mapping, namespace, name))
            .map(decode)
            .transpose()
    }

    async fn list(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        label_selector: &str,
        field_selector: &str,
    ) -> Result<Vec<DynamicObject>, ClusterError> {
        self.record(
            "LIST",
            format!("{} {}", mapping.resource.plural, namespace.unwrap_or_default()),
        )?;
        let labels = LabelSelector::parse(label_selector)
            .map_err(|e| ClusterError::Rejected(e.to_string()))?;
        let fields = FieldSelector::parse(field_selector)
            .map_err(|e| ClusterError::Rejected(e.to_string()))?;

        let state = self.lock();
        let mut items = Vec::new();
        for ((group, plural, ns, name), value) in &state.objects {
            if *group != mapping.resource.group || *plural != mapping.resource.plural {
                continue;
            }
            if let Some(wanted) = namespace
                && mapping.is_namespaced()
                && wanted != ns
            {
                continue;
            }
            let object = decode(value)?;
            let object_labels = object.metadata.labels.clone().unwrap_or_default();
            if labels.matches(&object_labels) && fields.matches(ns, name) {
                items.push(object);
            }
        }
        Ok(items)
    }

    async fn patch(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
        patch_type: &PatchType,
        body: &Value,
    ) -> Result<DynamicObject, ClusterError> {
        let target = describe(mapping, namespace, name);
        self.record("PATCH", target.clone())?;

        let mut state = self.lock();
        state
            .patches
            .push((target.clone(), patch_type.clone(), body.clone()));
        let key = store_key(mapping, namespace, name);
        let resource_version = state.next_resource_version;
        state.next_resource_version += 1;

        let updated = match patch_type {
            PatchType::Apply { field_manager, .. } => {
                let mut updated = body.clone();
                let mut managed_fields = Vec::new();
                if let Some(existing) = state.objects.get(&key) {
                    if let Some(status) = existing.get("status")
                        && updated.get("status").is_none()
                    {
                        updated["status"] = status.clone();
                    }
                    if let Some(entries) = existing
                        .pointer("/metadata/managedFields")
                        .and_then(Value::as_array)
                    {
                        managed_fields = entries.clone();
                    }
                }
                let owned = managed_fields
                    .iter()
                    .any(|e| e["manager"] == field_manager.as_str() && e["operation"] == "Apply");
                if !owned {
                    managed_fields.push(json!({
                        "manager": field_manager,
                        "operation": "Apply",
                        "apiVersion": mapping.resource.api_version,
                        "fieldsType": "FieldsV1",
                        "fieldsV1": {},
                    }));
                }
                updated["metadata"]["managedFields"] = Value::Array(managed_fields);
                updated
            }
            PatchType::Merge | PatchType::Strategic => {
                let Some(existing) = state.objects.get(&key) else {
                    return Err(ClusterError::NotFound {
                        resource: mapping.resource.plural.clone(),
                        name: name.to_string(),
                    });
                };
                if let Some(expected) = body.pointer("/metadata/resourceVersion")
                    && existing.pointer("/metadata/resourceVersion") != Some(expected)
                {
                    return Err(ClusterError::Rejected(format!("conflict on {}", target)));
                }
                let mut updated = existing.clone();
                json_patch::merge(&mut updated, body);
                updated
            }
        };

        let mut updated = updated;
        updated["metadata"]["resourceVersion"] = Value::String(resource_version.to_string());
        let object = decode(&updated)?;
        state.objects.insert(key, updated);
        Ok(object)
    }

    async fn delete(
        &self,
        mapping: &RestMapping,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<(), ClusterError> {
        self.record("DELETE", describe(mapping, namespace, name))?;
        self.lock()
            .objects
            .remove(&store_key(mapping, namespace, name))
            .map(|_| ())
            .ok_or_else(|| ClusterError::NotFound {
                resource: mapping.resource.plural.clone(),
                name: name.to_string(),
            })
    }

    async fn get_namespace(&self, name: &str) -> Result<Option<Namespace>, ClusterError> {
        self.record("GET-NAMESPACE", format!("namespaces /{}", name))?;
        self.lock()
            .namespaces
            .get(name)
            .map(|ns| {
                serde_json::from_value(ns.clone()).map_err(|source| ClusterError::Decode {
                    what: "namespace".to_string(),
                    source,
                })
            })
            .transpose()
    }

    async fn list_namespaces(&self) -> Result<Vec<Namespace>, ClusterError> {
        self.record("LIST-NAMESPACE", "namespaces ".to_string())?;
        self.lock()
            .namespaces
            .values()
            .map(|ns| {
                serde_json::from_value(ns.clone()).map_err(|source| ClusterError::Decode {
                    what: "namespace".to_string(),
                    source,
                })
            })
            .collect()
    }

    async fn patch_namespace(&self, name: &str, body: &Value) -> Result<(), ClusterError> {
        let target = format!("namespaces /{}", name);
        self.record("PATCH-NAMESPACE", target.clone())?;
        let mut state = self.lock();
        state
            .patches
            .push((target, PatchType::Strategic, body.clone()));
        let Some(ns) = state.namespaces.get_mut(name) else {
            return Err(ClusterError::NotFound {
                resource: "namespaces".to_string(),
                name: name.to_string(),
            });
        };
        json_patch::merge(ns, body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_namespace_patch_removes_nulls() {
        let cluster = FakeCluster::new();
        cluster.add_namespace_annotation("default", "a", "1");
        cluster.add_namespace_annotation("default", "b", "2");
        cluster
            .patch_namespace(
                "default",
                &json!({"metadata": {"annotations": {"a": null, "c": "3"}}}),
            )
            .await
            .unwrap();
        let annotations = cluster.namespace_annotations("default");
        assert_eq!(annotations.keys().collect::<Vec<_>>(), vec!["b", "c"]);
    }

    #[tokio::test]
    async fn test_cancel_after_verb() {
        let cluster = FakeCluster::new();
        let token = CancellationToken::new();
        cluster.add_namespace("default");
        cluster.cancel_after("GET-NAMESPACE", token.clone());

        cluster.list_namespaces().await.unwrap();
        assert!(!token.is_cancelled());
        cluster.get_namespace("default").await.unwrap();
        assert!(token.is_cancelled());
    }

    #[tokio::test]
    async fn test_list_honours_selectors() {
        let cluster = FakeCluster::new();
        for (name, app) in [("a", "x"), ("b", "y")] {
            cluster.add_object(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": name, "namespace": "default", "labels": {"app": app}},
            }));
        }
        let mapping = cluster
            .rest_mapping_for_kind(&GroupKind::new("", "ConfigMap"))
            .await
            .unwrap();
        let items = cluster
            .list(&mapping, Some("default"), "app=x", "")
            .await
            .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].metadata.name.as_deref(), Some("a"));
    }
}
