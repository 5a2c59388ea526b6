//! Planning: which addons need updating and which should be removed

use std::collections::BTreeMap;

use tokio_util::sync::CancellationToken;

use super::addon::{Addon, AddonError, AddonUpdate};
use super::channel::Channel;
use super::menu::AddonMenu;
use super::pruner::{PruneError, Pruner, deletion_prune_spec};
use super::version::ChannelVersion;
use crate::k8s::ClusterClient;

/// Updates required by `menu`, with the addons they belong to at matching
/// positions. Any error aborts the plan.
pub async fn plan_updates<'a>(
    menu: &'a AddonMenu,
    client: &dyn ClusterClient,
    system_generation: u64,
    cancel: &CancellationToken,
) -> Result<(Vec<AddonUpdate>, Vec<&'a Addon>), AddonError> {
    let mut updates = Vec::new();
    let mut addons = Vec::new();
    for addon in menu.iter() {
        if let Some(update) = addon.get_required_update(client, system_generation, cancel).await? {
            updates.push(update);
            addons.push(addon);
        }
    }
    Ok((updates, addons))
}

/// Installed addons `(namespace, name)` that no longer appear in `menu`
pub fn find_deletions(
    menu: &AddonMenu,
    installed: &BTreeMap<(String, String), ChannelVersion>,
) -> Vec<(String, String)> {
    installed
        .keys()
        .filter(|(namespace, name)| {
            tracing::debug!(addon = %name, %namespace, "checking for deletion");
            menu.find_addon(name, namespace).is_none()
        })
        .cloned()
        .collect()
}

/// Prune everything labelled as part of addon `name`, then drop its record
pub async fn delete_addon(
    client: &dyn ClusterClient,
    pruner: &Pruner,
    namespace: &str,
    name: &str,
    field_manager: &str,
    cancel: &CancellationToken,
) -> Result<(), AddonError> {
    let spec = deletion_prune_spec(name, field_manager).map_err(|source| PruneError::Selector {
        kind: format!("addon {}", name),
        source,
    })?;
    let deleted = pruner.prune(&[], &spec, cancel).await?;
    tracing::info!(addon = name, namespace, deleted, "deleted addon objects");
    Channel::new(namespace, name).remove(client, cancel).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AddonSpec;
    use crate::k8s::fake::FakeCluster;
    use serde_json::json;
    use std::sync::Arc;
    use tokio_test::{assert_err, assert_ok};
    use url::Url;

    fn addon(name: &str, version: &str) -> Addon {
        let url = Url::parse("https://example.com/m.yaml").unwrap();
        Addon {
            name: name.to_string(),
            channel_name: "c".to_string(),
            channel_location: url.clone(),
            manifest: url,
            spec: AddonSpec {
                name: Some(name.to_string()),
                version: version.to_string(),
                ..AddonSpec::default()
            },
        }
    }

    #[tokio::test]
    async fn test_plan_lists_only_changed_addons() {
        let cluster = FakeCluster::new();
        cluster.add_namespace_annotation("kube-system", "addons.k8s.io/dns", r#"{"version":"1.0.0","channel":"c"}"#);
        cluster.add_namespace_annotation("kube-system", "addons.k8s.io/proxy", r#"{"version":"1.0.0"}"#);

        let mut menu = AddonMenu::new();
        menu.insert(addon("dns", "1.0.0")).unwrap();
        menu.insert(addon("proxy", "1.1.0")).unwrap();
        menu.insert(addon("new", "0.1.0")).unwrap();

        let (updates, addons) = plan_updates(&menu, &cluster, 0, &CancellationToken::new()).await.unwrap();
        let names: Vec<&str> = updates.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["new", "proxy"]);
        assert_eq!(addons.len(), updates.len());
        assert_eq!(addons[1].name, "proxy");
        assert!(updates[0].existing_version.is_none());
    }

    #[tokio::test]
    async fn test_plan_fails_on_bad_annotation() {
        let cluster = FakeCluster::new();
        cluster.add_namespace_annotation("kube-system", "addons.k8s.io/dns", "garbage");
        let mut menu = AddonMenu::new();
        menu.insert(addon("dns", "1.0.0")).unwrap();
        assert_err!(plan_updates(&menu, &cluster, 0, &CancellationToken::new()).await);
    }

    #[test]
    fn test_find_deletions() {
        let mut menu = AddonMenu::new();
        menu.insert(addon("dns", "1.0.0")).unwrap();
        let mut installed = BTreeMap::new();
        for (ns, name) in [("kube-system", "dns"), ("kube-system", "old"), ("default", "dns")] {
            installed.insert((ns.to_string(), name.to_string()), ChannelVersion::default());
        }
        assert_eq!(
            find_deletions(&menu, &installed),
            vec![
                ("default".to_string(), "dns".to_string()),
                ("kube-system".to_string(), "old".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_delete_addon() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_namespace_annotation("kube-system", "addons.k8s.io/old", r#"{"version":"1.0.0"}"#);
        cluster.add_object(json!({
            "apiVersion": "v1",
            "kind": "ServiceAccount",
            "metadata": {
                "name": "old",
                "namespace": "kube-system",
                "labels": {"app.kubernetes.io/managed-by": "kops", "addon.kops.k8s.io/name": "old"},
            },
        }));

        let pruner = Pruner::new(cluster.clone());
        let cancel = CancellationToken::new();
        assert_ok!(delete_addon(cluster.as_ref(), &pruner, "kube-system", "old", "kops", &cancel).await);
        assert!(cluster.object_names("ServiceAccount").is_empty());
        assert!(cluster.namespace_annotations("kube-system").is_empty());
    }

    #[tokio::test]
    async fn test_delete_addon_stops_when_cancelled() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.add_namespace_annotation("kube-system", "addons.k8s.io/old", r#"{"version":"1.0.0"}"#);
        let labels = json!({"app.kubernetes.io/managed-by": "kops", "addon.kops.k8s.io/name": "old"});
        for name in ["one", "two"] {
            cluster.add_object(json!({
                "apiVersion": "v1",
                "kind": "ConfigMap",
                "metadata": {"name": name, "namespace": "kube-system", "labels": labels},
            }));
        }
        let cancel = CancellationToken::new();
        cluster.cancel_after("DELETE", cancel.clone());

        let pruner = Pruner::new(cluster.clone());
        let err = assert_err!(delete_addon(cluster.as_ref(), &pruner, "kube-system", "old", "kops", &cancel).await);
        assert!(matches!(err, AddonError::Cancelled));
        assert_eq!(cluster.object_names("ConfigMap"), vec!["kube-system/two"]);
        assert!(cluster.namespace_annotations("kube-system").contains_key("addons.k8s.io/old"));
    }
}
