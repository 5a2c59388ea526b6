//! The menu: one dominant addon per name across all loaded channels

use std::collections::BTreeMap;

use super::addon::Addon;
use super::version::VersionError;

#[derive(Debug, Clone, Default)]
pub struct AddonMenu {
    addons: BTreeMap<String, Addon>,
}

impl AddonMenu {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `addon`, keeping whichever of it and the current entry the
    /// arbiter prefers. On a tie the entry loaded first stays.
    pub fn insert(&mut self, addon: Addon) -> Result<(), VersionError> {
        match self.addons.get(&addon.name) {
            Some(existing) => {
                let existing_version = existing.channel_version();
                if addon
                    .channel_version()
                    .replaces(&addon.name, Some(&existing_version))?
                {
                    tracing::debug!(
                        addon = %addon.name,
                        from = %existing.channel_name,
                        to = %addon.channel_name,
                        "addon replaced by later channel"
                    );
                    self.addons.insert(addon.name.clone(), addon);
                }
            }
            None => {
                self.addons.insert(addon.name.clone(), addon);
            }
        }
        Ok(())
    }

    pub fn merge(&mut self, other: AddonMenu) -> Result<(), VersionError> {
        for addon in other.addons.into_values() {
            self.insert(addon)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Addon> {
        self.addons.get(name)
    }

    /// The addon named `name` whose annotation lives in `namespace`
    pub fn find_addon(&self, name: &str, namespace: &str) -> Option<&Addon> {
        self.addons.get(name).filter(|a| a.namespace() == namespace)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Addon> {
        self.addons.values()
    }

    pub fn len(&self) -> usize {
        self.addons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addons.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::AddonSpec;
    use url::Url;

    fn addon(channel: &str, name: &str, version: &str, id: &str) -> Addon {
        Addon {
            name: name.to_string(),
            channel_name: channel.to_string(),
            channel_location: Url::parse("https://example.com/c.yaml").unwrap(),
            manifest: Url::parse("https://example.com/m.yaml").unwrap(),
            spec: AddonSpec {
                name: Some(name.to_string()),
                version: version.to_string(),
                id: id.to_string(),
                ..AddonSpec::default()
            },
        }
    }

    #[test]
    fn test_newer_version_wins_regardless_of_order() {
        for (first, second) in [("1.0.0", "1.2.0"), ("1.2.0", "1.0.0")] {
            let mut menu = AddonMenu::new();
            menu.insert(addon("a", "dns", first, "")).unwrap();
            menu.insert(addon("b", "dns", second, "")).unwrap();
            assert_eq!(menu.get("dns").unwrap().spec.version, "1.2.0");
            assert_eq!(menu.len(), 1);
        }
    }

    #[test]
    fn test_tie_keeps_first_loaded() {
        let mut menu = AddonMenu::new();
        menu.insert(addon("first", "dns", "1.0.0", "")).unwrap();
        menu.insert(addon("second", "dns", "1.0.0", "")).unwrap();
        assert_eq!(menu.get("dns").unwrap().channel_name, "first");
    }

    #[test]
    fn test_merge_menus() {
        let mut urls = AddonMenu::new();
        urls.insert(addon("url", "dns", "1.0.0", "")).unwrap();
        urls.insert(addon("url", "proxy", "1.0.0", "")).unwrap();
        let mut files = AddonMenu::new();
        files.insert(addon("file", "dns", "1.1.0", "")).unwrap();

        urls.merge(files).unwrap();
        assert_eq!(urls.get("dns").unwrap().channel_name, "file");
        assert_eq!(urls.get("proxy").unwrap().channel_name, "url");
    }

    #[test]
    fn test_find_addon_checks_namespace() {
        let mut menu = AddonMenu::new();
        menu.insert(addon("a", "dns", "1.0.0", "")).unwrap();
        assert!(menu.find_addon("dns", "kube-system").is_some());
        assert!(menu.find_addon("dns", "default").is_none());
    }
}
