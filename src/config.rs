use std::path::{Path, PathBuf};

use homedir::my_home;
use serde::{Deserialize, Serialize};

use crate::catalog::{ScanOptions, DEFAULT_EXCLUDED_FRAGMENTS};

/// Default embedding model (CLIP ViT-B-32, 512-dim image/text space)
const DEFAULT_MODEL: &str = "clip-vit-b-32";
/// Default similarity threshold for search results
const DEFAULT_THRESHOLD: f32 = 0.25;
/// Default maximum number of search results
const DEFAULT_LIMIT: usize = 20;
/// Files below this size are almost never real photos
const DEFAULT_MIN_FILE_SIZE_KB: u64 = 1;
const DEFAULT_MAX_FILE_SIZE_MB: u64 = 50;

const CONFIG_FILE: &str = "config.yaml";

/// Configuration for the indexing pipeline
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexingConfig {
    /// Embedding model name (e.g., "clip-vit-b-32")
    #[serde(default = "default_model")]
    pub model: String,

    /// Directory-name fragments excluded from scans (substring match,
    /// case-insensitive)
    #[serde(default = "default_excluded_fragments")]
    pub excluded_fragments: Vec<String>,

    #[serde(default = "default_min_file_size_kb")]
    pub min_file_size_kb: u64,

    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            excluded_fragments: default_excluded_fragments(),
            min_file_size_kb: DEFAULT_MIN_FILE_SIZE_KB,
            max_file_size_mb: DEFAULT_MAX_FILE_SIZE_MB,
        }
    }
}

/// Configuration for search behavior
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Minimum similarity [0.0, 1.0] for a result to be returned
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    /// Maximum results per query
    #[serde(default = "default_limit")]
    pub default_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_threshold: DEFAULT_THRESHOLD,
            default_limit: DEFAULT_LIMIT,
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_excluded_fragments() -> Vec<String> {
    DEFAULT_EXCLUDED_FRAGMENTS
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_min_file_size_kb() -> u64 {
    DEFAULT_MIN_FILE_SIZE_KB
}

fn default_max_file_size_mb() -> u64 {
    DEFAULT_MAX_FILE_SIZE_MB
}

fn default_threshold() -> f32 {
    DEFAULT_THRESHOLD
}

fn default_limit() -> usize {
    DEFAULT_LIMIT
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub search: SearchConfig,

    #[serde(skip_serializing, skip_deserializing)]
    base_path: PathBuf,
}

impl Config {
    fn validate(&self) {
        if !(0.0..=1.0).contains(&self.search.default_threshold) {
            panic!(
                "search.default_threshold must be between 0.0 and 1.0, got {}",
                self.search.default_threshold
            );
        }

        if self.search.default_limit == 0 {
            panic!("search.default_limit must be greater than 0");
        }

        if self.indexing.model.trim().is_empty() {
            panic!("indexing.model must not be empty");
        }

        let min = self.indexing.min_file_size_kb;
        let max_kb = self.indexing.max_file_size_mb * 1024;
        if max_kb < min {
            panic!(
                "indexing.max_file_size_mb ({} MB) is below min_file_size_kb ({} KB)",
                self.indexing.max_file_size_mb, min
            );
        }
    }

    pub fn load_with(base_path: &Path) -> Self {
        let config_path = base_path.join(CONFIG_FILE);

        // create new if does not exist
        if !config_path.exists() {
            let default = serde_yml::to_string(&Self::default()).expect("serializable default");
            if let Err(err) = std::fs::write(&config_path, default) {
                log::warn!("could not write default config: {err}");
            }
        }

        let config_str = match std::fs::read_to_string(&config_path) {
            Ok(s) => s,
            Err(err) => {
                log::warn!("could not read config ({err}), using defaults");
                let mut config = Self::default();
                config.base_path = base_path.to_path_buf();
                return config;
            }
        };

        let mut config: Self = serde_yml::from_str(&config_str).expect("config is malformed");
        config.base_path = base_path.to_path_buf();
        config.validate();

        // resave in case config version needs an upgrade
        if config_str != serde_yml::to_string(&config).expect("serializable config") {
            config.save();
        }

        config
    }

    pub fn save(&self) {
        let config_str = serde_yml::to_string(&self).expect("serializable config");
        if let Err(err) = std::fs::write(self.base_path.join(CONFIG_FILE), config_str) {
            log::warn!("could not save config: {err}");
        }
    }

    /// Scan options from config plus ad-hoc exclusions from the CLI.
    pub fn scan_options(&self, extra_excluded: &[String]) -> ScanOptions {
        let mut excluded_fragments: Vec<String> = self
            .indexing
            .excluded_fragments
            .iter()
            .chain(extra_excluded)
            .map(|s| s.to_lowercase())
            .collect();
        excluded_fragments.dedup();

        ScanOptions {
            excluded_fragments,
            min_file_size: self.indexing.min_file_size_kb * 1024,
            max_file_size: self.indexing.max_file_size_mb * 1024 * 1024,
        }
    }
}

/// Data directory: `LOOKALIKE_BASE_PATH` env override, else
/// `~/.local/share/lookalike`.
pub fn base_dir() -> PathBuf {
    match std::env::var("LOOKALIKE_BASE_PATH") {
        Ok(path) => PathBuf::from(path),
        Err(_) => {
            let home = my_home()
                .expect("could not determine home directory")
                .expect("home directory path is empty");
            home.join(".local/share/lookalike")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path());

        assert!(dir.path().join(CONFIG_FILE).exists());
        assert_eq!(config.indexing.model, DEFAULT_MODEL);
        assert_eq!(config.search.default_limit, DEFAULT_LIMIT);

        // A second load reads back the same values.
        let reloaded = Config::load_with(dir.path());
        assert_eq!(reloaded.indexing.model, config.indexing.model);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "search:\n  default_limit: 5\n",
        )
        .unwrap();

        let config = Config::load_with(dir.path());
        assert_eq!(config.search.default_limit, 5);
        assert_eq!(config.indexing.model, DEFAULT_MODEL);
    }

    #[test]
    #[should_panic(expected = "default_threshold")]
    fn test_out_of_range_threshold_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "search:\n  default_threshold: 3.5\n",
        )
        .unwrap();

        let _ = Config::load_with(dir.path());
    }

    #[test]
    fn test_scan_options_merge_cli_excludes() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_with(dir.path());

        let options = config.scan_options(&["Screenshots".to_string()]);
        assert!(options
            .excluded_fragments
            .contains(&"screenshots".to_string()));
        assert!(options.excluded_fragments.contains(&"tmp".to_string()));
        assert_eq!(options.min_file_size, 1024);
    }
}
