//! Channel loading and per-channel addon selection

use semver::Version;
use url::Url;

use super::ChannelError;
use super::addon::Addon;
use super::menu::AddonMenu;
use super::version::{VersionPredicate, parse_addon_version};
use crate::api::{ADDONS_KIND, Addons};
use crate::vfs::{Fetcher, resolve_location};

/// A loaded channel document
#[derive(Debug, Clone)]
pub struct AddonsChannel {
    pub name: String,
    pub location: Url,
    pub api_object: Addons,
}

/// Fetch and parse the channel at `location`
pub async fn load_addons(
    fetcher: &dyn Fetcher,
    name: &str,
    location: &Url,
) -> Result<AddonsChannel, ChannelError> {
    tracing::info!(channel = name, %location, "loading channel");
    let data = fetcher
        .read(location)
        .await
        .map_err(|source| ChannelError::Fetch {
            location: location.to_string(),
            source,
        })?;
    parse_addons(name, location, &data)
}

/// Parse channel bytes. An empty document yields a channel with no addons.
pub fn parse_addons(name: &str, location: &Url, data: &[u8]) -> Result<AddonsChannel, ChannelError> {
    let parse_err = |source| ChannelError::Parse {
        location: location.to_string(),
        source,
    };
    let value: serde_yaml::Value = serde_yaml::from_slice(data).map_err(parse_err)?;
    let api_object: Addons = if value.is_null() {
        Addons::default()
    } else {
        serde_yaml::from_value(value).map_err(parse_err)?
    };

    if !api_object.kind.is_empty() && api_object.kind != ADDONS_KIND {
        return Err(ChannelError::InvalidKind {
            location: location.to_string(),
            kind: api_object.kind,
        });
    }

    let channel = AddonsChannel {
        name: name.to_string(),
        location: location.clone(),
        api_object,
    };
    channel.verify()?;
    Ok(channel)
}

impl AddonsChannel {
    fn invalid(&self, message: String) -> ChannelError {
        ChannelError::InvalidAddon {
            location: self.location.to_string(),
            message,
        }
    }

    /// Check that every addon is named and that every version is valid semver
    pub fn verify(&self) -> Result<(), ChannelError> {
        for (i, spec) in self.api_object.spec.addons.iter().enumerate() {
            let name = spec
                .name
                .as_deref()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| self.invalid(format!("addon {} has no name", i)))?;
            if !spec.version.is_empty() {
                parse_addon_version(name, &spec.version).map_err(|source| ChannelError::Version {
                    location: self.location.to_string(),
                    source,
                })?;
            }
        }
        Ok(())
    }

    /// Every addon of the channel, with manifest locations resolved
    pub fn addons(&self) -> Result<Vec<Addon>, ChannelError> {
        let mut out = Vec::with_capacity(self.api_object.spec.addons.len());
        for spec in &self.api_object.spec.addons {
            let name = spec
                .name
                .clone()
                .filter(|n| !n.is_empty())
                .ok_or_else(|| self.invalid("addon has no name".to_string()))?;
            let manifest = spec
                .manifest
                .as_deref()
                .filter(|m| !m.is_empty())
                .ok_or_else(|| self.invalid(format!("addon {:?} has no manifest", name)))?;
            let manifest = resolve_location(&self.location, manifest).map_err(|e| ChannelError::InvalidUrl {
                location: manifest.to_string(),
                message: e.to_string(),
            })?;
            out.push(Addon {
                name,
                channel_name: self.name.clone(),
                channel_location: self.location.clone(),
                manifest,
                spec: spec.clone(),
            });
        }
        Ok(out)
    }

    /// The addons applicable to `kubernetes_version`, one per name
    pub fn get_current(&self, kubernetes_version: &Version) -> Result<AddonMenu, ChannelError> {
        let version_err = |source| ChannelError::Version {
            location: self.location.to_string(),
            source,
        };
        let mut menu = AddonMenu::new();
        for addon in self.addons()? {
            if !addon.spec.kubernetes_version.is_empty() {
                let predicate =
                    VersionPredicate::parse(&addon.spec.kubernetes_version).map_err(version_err)?;
                if !predicate.matches(kubernetes_version) {
                    tracing::debug!(
                        addon = %addon.name,
                        predicate = %addon.spec.kubernetes_version,
                        %kubernetes_version,
                        "skipping addon for kubernetes version"
                    );
                    continue;
                }
            }
            menu.insert(addon).map_err(version_err)?;
        }
        Ok(menu)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn location() -> Url {
        Url::parse("https://example.com/addons/channel.yaml").unwrap()
    }

    const CHANNEL: &str = r#"
kind: Addons
metadata:
  name: example
spec:
  addons:
  - name: dns
    version: 1.4.0
    manifest: dns/k8s-1.4.yaml
    kubernetesVersion: ">=1.4.0 <1.6.0"
  - name: dns
    version: 1.6.0
    manifest: dns/k8s-1.6.yaml
    kubernetesVersion: ">=1.6.0"
  - name: proxy
    version: 2.0.0
    manifest: https://other.example.com/proxy.yaml
"#;

    #[test]
    fn test_empty_document_has_no_addons() {
        let channel = parse_addons("empty", &location(), b"").unwrap();
        assert!(channel.addons().unwrap().is_empty());
        let channel = parse_addons("empty", &location(), b"# nothing here\n").unwrap();
        assert!(channel.api_object.spec.addons.is_empty());
    }

    #[test]
    fn test_manifest_resolved_against_channel() {
        let channel = parse_addons("c", &location(), CHANNEL.as_bytes()).unwrap();
        let addons = channel.addons().unwrap();
        assert_eq!(addons[0].manifest.as_str(), "https://example.com/addons/dns/k8s-1.4.yaml");
        assert_eq!(addons[2].manifest.as_str(), "https://other.example.com/proxy.yaml");
        assert_eq!(addons[0].channel_name, "c");
    }

    #[test]
    fn test_kubernetes_version_filter() {
        let channel = parse_addons("c", &location(), CHANNEL.as_bytes()).unwrap();

        let menu = channel.get_current(&Version::new(1, 5, 9)).unwrap();
        assert_eq!(menu.get("dns").unwrap().spec.version, "1.4.0");
        assert!(menu.get("proxy").is_some());

        let menu = channel.get_current(&Version::new(1, 6, 0)).unwrap();
        assert_eq!(menu.get("dns").unwrap().spec.version, "1.6.0");
    }

    #[test]
    fn test_dropped_when_out_of_range() {
        let doc = r#"
spec:
  addons:
  - name: legacy
    version: 1.0.0
    manifest: legacy.yaml
    kubernetesVersion: ">=1.4.0 <1.6.0"
"#;
        let channel = parse_addons("c", &location(), doc.as_bytes()).unwrap();
        assert_eq!(channel.get_current(&Version::new(1, 5, 9)).unwrap().len(), 1);
        assert!(channel.get_current(&Version::new(1, 6, 0)).unwrap().is_empty());
    }

    #[test]
    fn test_unparseable_version_aborts_channel() {
        let doc = r#"
spec:
  addons:
  - name: good
    version: 1.0.0
    manifest: good.yaml
  - name: bad
    version: not-a-version
    manifest: bad.yaml
"#;
        let err = parse_addons("c", &location(), doc.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("bad"));
        assert!(matches!(err, ChannelError::Version { .. }));
    }

    #[test]
    fn test_missing_required_fields() {
        let unnamed = "spec:\n  addons:\n  - manifest: x.yaml\n";
        assert!(matches!(
            parse_addons("c", &location(), unnamed.as_bytes()).unwrap_err(),
            ChannelError::InvalidAddon { .. }
        ));

        let no_manifest = "spec:\n  addons:\n  - name: x\n";
        let channel = parse_addons("c", &location(), no_manifest.as_bytes()).unwrap();
        assert!(matches!(channel.addons().unwrap_err(), ChannelError::InvalidAddon { .. }));
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let doc = "kind: Cluster\nspec: {}\n";
        assert!(matches!(
            parse_addons("c", &location(), doc.as_bytes()).unwrap_err(),
            ChannelError::InvalidKind { .. }
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("channel.yaml");
        std::fs::write(&path, CHANNEL).unwrap();
        let url = Url::from_file_path(&path).unwrap();

        let channel = load_addons(&crate::vfs::DefaultFetcher::new(), "local", &url)
            .await
            .unwrap();
        let addons = channel.addons().unwrap();
        assert_eq!(
            addons[0].manifest,
            Url::from_file_path(dir.path().join("dns/k8s-1.4.yaml")).unwrap()
        );
    }
}
