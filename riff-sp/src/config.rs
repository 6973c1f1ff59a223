//! Runtime configuration for riff-sp
//!
//! Built once at startup from the resolved [`TomlConfig`] and the command-line
//! overrides, then shared read-only through `AppState`.

use riff_common::config::{
    expand_home, CompiledDefaults, LoggingConfig, SeparatorConfig, TomlConfig,
};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::HubConfig;

const MIB: u64 = 1024 * 1024;
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Effective service settings
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub cache_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub bind_address: String,
    pub max_cache_bytes: u64,
    pub max_upload_bytes: u64,
    pub cache_max_age: Duration,
    pub prune_interval: Duration,
    pub hub: HubConfig,
    pub cors_origins: Vec<String>,
    pub separator: SeparatorConfig,
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Derive settings from TOML; `cache_dir` is resolved separately
    /// (CLI → ENV → TOML → default).
    pub fn from_toml(toml: &TomlConfig, cache_dir: PathBuf) -> Self {
        let upload_dir = toml
            .upload_dir
            .as_ref()
            .map(|p| expand_home(&p.to_string_lossy()))
            .unwrap_or_else(|| CompiledDefaults::for_current_platform().upload_dir);

        Self {
            cache_dir,
            upload_dir,
            bind_address: toml.bind_address.clone(),
            max_cache_bytes: toml.max_cache_size_mb.saturating_mul(MIB),
            max_upload_bytes: toml.max_upload_mb.saturating_mul(MIB),
            cache_max_age: Duration::from_secs(toml.cache_max_age_days.saturating_mul(SECS_PER_DAY)),
            prune_interval: Duration::from_secs(toml.prune_interval_secs.max(1)),
            hub: HubConfig {
                sweep_interval: Duration::from_secs(toml.sweep_interval_secs.max(1)),
                stale_timeout: Duration::from_secs(toml.stale_timeout_secs),
                ..HubConfig::default()
            },
            cors_origins: toml.cors_origins.clone(),
            separator: toml.separator.clone(),
            logging: toml.logging.clone(),
        }
    }

    /// Defaults rooted under `root` (cache in `root/cache`, uploads in `root/uploads`)
    pub fn rooted_at(root: &Path) -> Self {
        let toml = TomlConfig {
            upload_dir: Some(root.join("uploads")),
            ..TomlConfig::default()
        };
        Self::from_toml(&toml, root.join("cache"))
    }
}
