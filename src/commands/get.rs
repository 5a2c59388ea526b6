//! `get addons`: list the addon versions recorded on the cluster

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::channels::{ChannelVersion, installed_versions};
use crate::k8s::{ClusterClient, KubeCluster, create_client};
use crate::utils::print_table;

const HEADERS: [&str; 5] = ["NAMESPACE", "NAME", "VERSION", "ID", "MANIFEST-HASH"];

pub async fn addons(kubeconfig: Option<&Path>) -> Result<()> {
    let client: Arc<dyn ClusterClient> = Arc::new(KubeCluster::new(create_client(kubeconfig).await?));
    let installed = installed_versions(client.as_ref(), &CancellationToken::new())
        .await
        .context("cannot fetch channel versions from namespaces")?;
    print_table(&HEADERS, &addon_rows(&installed));
    Ok(())
}

/// One row per installed addon, ordered by namespace then name
pub fn addon_rows(installed: &BTreeMap<(String, String), ChannelVersion>) -> Vec<Vec<String>> {
    let cell = |value: &Option<String>| value.clone().unwrap_or_else(|| "-".to_string());
    installed
        .iter()
        .map(|((namespace, name), version)| {
            vec![
                namespace.clone(),
                name.clone(),
                cell(&version.version),
                cell(&version.id),
                cell(&version.manifest_hash),
            ]
        })
        .collect()
}
