use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};

use keel_sync::SyncConfig;

pub const DEFAULT_STORE_PATH: &str = "keel-storage.json";

/// Settings read from `--config`.
///
/// ```toml
/// store = "wallet.json"
///
/// [sync]
/// notify_mode = "keyed"
/// discard_stale_fetches = true
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub store: PathBuf,
    pub sync: SyncConfig,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            store: PathBuf::from(DEFAULT_STORE_PATH),
            sync: SyncConfig::default(),
        }
    }
}

impl CliConfig {
    pub fn parse(text: &str) -> anyhow::Result<Self> {
        toml::from_str(text).context("invalid configuration")
    }

    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config {}", path.display()))?;
        Self::parse(&text)
    }

    /// Resolve the effective configuration from the command-line overrides.
    pub fn resolve(config: Option<&Path>, store: Option<&Path>) -> anyhow::Result<Self> {
        let mut resolved = match config {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        if let Some(store) = store {
            resolved.store = store.to_path_buf();
        }
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_sync::NotifyMode;

    #[test]
    fn empty_config_is_default() {
        assert_eq!(CliConfig::parse("").unwrap(), CliConfig::default());
    }

    #[test]
    fn parses_sync_section() {
        let config = CliConfig::parse(
            "store = \"w.json\"\n[sync]\nnotify_mode = \"keyed\"\ndiscard_stale_fetches = false\n",
        )
        .unwrap();
        assert_eq!(config.store, PathBuf::from("w.json"));
        assert_eq!(config.sync.notify_mode, NotifyMode::Keyed);
        assert!(!config.sync.discard_stale_fetches);
    }

    #[test]
    fn store_flag_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keel.toml");
        std::fs::write(&path, "store = \"from-file.json\"\n").unwrap();

        let config = CliConfig::resolve(Some(&path), Some(Path::new("flag.json"))).unwrap();
        assert_eq!(config.store, PathBuf::from("flag.json"));

        let config = CliConfig::resolve(Some(&path), None).unwrap();
        assert_eq!(config.store, PathBuf::from("from-file.json"));
    }

    #[test]
    fn unknown_notify_mode_is_rejected() {
        assert!(CliConfig::parse("[sync]\nnotify_mode = \"sometimes\"\n").is_err());
    }
}
