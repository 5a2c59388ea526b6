//! `apply channel`: converge the cluster onto the addons of one or more channels

use anyhow::{Context, Result, anyhow, bail};
use semver::Version;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::channels::version::parse_kubernetes_version;
use crate::channels::{
    Addon, AddonMenu, AddonUpdate, Applier, ChannelVersion, KubectlApplier, Pruner, ServerSideApplier,
    UpdateContext, delete_addon, find_deletions, installed_versions, load_addons, plan_updates,
};
use crate::config::{ApplyStrategy, Settings};
use crate::k8s::{ClusterClient, KubeCluster, create_client, kubectl};
use crate::utils::progress::AddonProgress;
use crate::utils::table::render_table;
use crate::vfs::{DefaultFetcher, Fetcher, parse_location};

/// Kubernetes release from which bare well-known channel names are refused
const WELL_KNOWN_CUTOFF: Version = Version::new(1, 23, 0);

/// Options for `apply channel`
#[derive(Debug, Clone, Default)]
pub struct ApplyChannelOptions {
    /// Channel URLs or well-known names
    pub channels: Vec<String>,
    /// Channel files on the local disk
    pub files: Vec<String>,
    pub yes: bool,
    pub kubeconfig: Option<PathBuf>,
    pub field_manager: Option<String>,
    pub strategy: Option<ApplyStrategy>,
}

pub async fn run(options: ApplyChannelOptions, mut settings: Settings) -> Result<()> {
    if let Some(field_manager) = options.field_manager.clone() {
        settings.apply.field_manager = field_manager;
    }
    if let Some(strategy) = options.strategy {
        settings.apply.strategy = strategy;
    }

    let client: Arc<dyn ClusterClient> = Arc::new(KubeCluster::new(
        create_client(options.kubeconfig.as_deref()).await?,
    ));
    let fetcher: Arc<dyn Fetcher> = Arc::new(DefaultFetcher::new());

    let git_version = client
        .server_version()
        .await
        .context("error querying kubernetes version")?;
    let kubernetes_version = parse_kubernetes_version(&git_version)?;
    crate::log_info!("Cluster is running Kubernetes {}", kubernetes_version);

    let cwd = std::env::current_dir().context("error getting current directory")?;
    let base = &settings.channels.well_known_base;
    let mut menu = build_menu(fetcher.as_ref(), &kubernetes_version, &options.channels, false, base, &cwd)
        .await
        .context("cannot build the addon menu from args")?;
    let files_menu = build_menu(fetcher.as_ref(), &kubernetes_version, &options.files, true, base, &cwd)
        .await
        .context("cannot build the addon menu from files")?;
    menu.merge(files_menu)?;

    let applier: Arc<dyn Applier> = match settings.apply.strategy {
        ApplyStrategy::ServerSide => Arc::new(ServerSideApplier::new(
            client.clone(),
            settings.apply.apply_set_options(),
        )),
        ApplyStrategy::Kubectl => {
            kubectl::ensure_available()?;
            Arc::new(KubectlApplier::new(
                options.kubeconfig.clone(),
                settings.apply.field_manager.clone(),
            ))
        }
    };

    let ctx = UpdateContext {
        pruner: Pruner::new(client.clone()),
        client,
        fetcher,
        applier,
        system_generation: settings.apply.system_generation,
    };

    let cancel = CancellationToken::new();
    let watcher = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            crate::log_warn!("Interrupted, cancelling apply");
            watcher.cancel();
        }
    });

    let mut stdout = std::io::stdout();
    apply_menu(&menu, &ctx, &settings.apply.field_manager, options.yes, &cancel, &mut stdout).await
}

/// Load every channel in `args` and merge the addons current for
/// `kubernetes_version` into one menu
pub async fn build_menu(
    fetcher: &dyn Fetcher,
    kubernetes_version: &Version,
    args: &[String],
    local_files: bool,
    well_known_base: &str,
    cwd: &Path,
) -> Result<AddonMenu> {
    let mut menu = AddonMenu::new();
    for name in args {
        let location = if local_files {
            parse_location(name, cwd)?
        } else {
            match url::Url::parse(name) {
                Ok(url) => url,
                Err(_) => well_known_location(name, well_known_base, kubernetes_version)?,
            }
        };

        let channel = load_addons(fetcher, name, &location)
            .await
            .with_context(|| format!("error loading channel {:?}", location.as_str()))?;
        let current = channel
            .get_current(kubernetes_version)
            .with_context(|| format!("error processing latest versions in {:?}", location.as_str()))?;
        menu.merge(current)?;
    }
    Ok(menu)
}

/// Expand a bare channel name to its location under `base`
fn well_known_location(name: &str, base: &str, kubernetes_version: &Version) -> Result<url::Url> {
    if name.contains('/') {
        bail!(
            "channel format not recognized (did you mean to use `-f` to specify a local file?): {:?}",
            name
        );
    }
    let expanded = format!("{}{}/addon.yaml", base, name);
    let location = url::Url::parse(&expanded)
        .with_context(|| format!("unable to parse expanded argument {:?} as url", expanded))?;

    if *kubernetes_version >= WELL_KNOWN_CUTOFF {
        bail!(
            "legacy addons are deprecated and unmaintained, use managed addons instead of {}",
            expanded
        );
    }
    crate::log_warn!(
        "Legacy addons are deprecated and unmaintained, use managed addons instead of {}",
        expanded
    );
    Ok(location)
}

fn version_cell(version: Option<&ChannelVersion>) -> String {
    version
        .and_then(|v| v.manifest_hash.clone().or_else(|| v.version.clone()))
        .unwrap_or_else(|| "-".to_string())
}

/// Rows for the update plan table
pub fn plan_rows(updates: &[AddonUpdate]) -> Vec<Vec<String>> {
    updates
        .iter()
        .map(|update| {
            vec![
                update.name.clone(),
                version_cell(update.existing_version.as_ref()),
                version_cell(Some(&update.new_version)),
                if update.needs_rolling_update.is_none() {
                    "-".to_string()
                } else {
                    update.needs_rolling_update.as_str().to_string()
                },
                (if update.needs_pki { "yes" } else { "no" }).to_string(),
            ]
        })
        .collect()
}

/// Plan against the cluster, print the plan and, when `yes`, carry it out.
/// Every addon is attempted; failures are reported together at the end.
pub async fn apply_menu(
    menu: &AddonMenu,
    ctx: &UpdateContext,
    field_manager: &str,
    yes: bool,
    cancel: &CancellationToken,
    out: &mut dyn Write,
) -> Result<()> {
    let installed = installed_versions(ctx.client.as_ref(), cancel)
        .await
        .context("cannot fetch channel versions from namespaces")?;
    let (updates, needs_update) = plan_updates(menu, ctx.client.as_ref(), ctx.system_generation, cancel)
        .await
        .context("failed to get updates")?;
    let deletions = find_deletions(menu, &installed);

    if updates.is_empty() && deletions.is_empty() {
        writeln!(out, "No update required")?;
        return Ok(());
    }

    if !updates.is_empty() {
        let headers = ["NAME", "CURRENT", "UPDATE", "ROLLING-UPDATE", "PKI"];
        write!(out, "{}", render_table(&headers, &plan_rows(&updates)))?;
    }
    for (namespace, name) in &deletions {
        writeln!(out, "Will delete addon {:?} in namespace {:?}", name, namespace)?;
    }

    if !yes {
        writeln!(out, "\nMust specify --yes to update")?;
        return Ok(());
    }

    let mut failures = Vec::new();
    for addon in needs_update {
        match ensure_updated(addon, ctx, cancel).await {
            Ok(Some(update)) => writeln!(out, "Updated {:?}", update.name)?,
            Ok(None) => {}
            Err(err) => {
                crate::log_error!("Failed to update {:?}: {:#}", addon.name, err);
                failures.push(err.context(format!("updating {:?}", addon.name)));
            }
        }
        if cancel.is_cancelled() {
            break;
        }
    }

    for (namespace, name) in &deletions {
        if cancel.is_cancelled() {
            break;
        }
        match delete_addon(ctx.client.as_ref(), &ctx.pruner, namespace, name, field_manager, cancel).await {
            Ok(()) => writeln!(out, "Deleted {:?}", name)?,
            Err(err) => {
                crate::log_error!("Failed to delete {:?} in {:?}: {}", name, namespace, err);
                failures.push(anyhow::Error::new(err).context(format!("failed to prune {}/{}", namespace, name)));
            }
        }
    }

    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        n => {
            let joined: Vec<String> = failures.iter().map(|e| format!("{:#}", e)).collect();
            Err(anyhow!("{} addons failed: {}", n, joined.join("; ")))
        }
    }
}

async fn ensure_updated(
    addon: &Addon,
    ctx: &UpdateContext,
    cancel: &CancellationToken,
) -> Result<Option<AddonUpdate>> {
    let progress = AddonProgress::new(&addon.name);
    match addon.ensure_updated(ctx, cancel).await {
        Ok(update) => {
            progress.finish_success();
            Ok(update)
        }
        Err(err) => {
            progress.finish_error();
            Err(err.into())
        }
    }
}
