//! Configuration loading and cache folder resolution
//!
//! Two tiers, resolved once at startup:
//! 1. **TOML bootstrap**: `~/.config/riffroom/<module>.toml` (optional)
//! 2. **Compiled defaults**: used for anything the TOML file leaves out
//!
//! Command-line arguments and environment variables are layered on top by the
//! service binary (see `riff-sp`'s `Args`), giving the priority order
//! CLI → ENV → TOML → compiled default.
//!
//! A missing TOML file is not an error: a warning is logged and defaults are
//! used. A TOML file that exists but cannot be parsed is a configuration error.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable overriding the cache folder
pub const CACHE_DIR_ENV: &str = "RIFF_CACHE_DIR";

/// Environment variable overriding the TOML config path
pub const CONFIG_PATH_ENV: &str = "RIFF_CONFIG";

/// Bootstrap configuration loaded from TOML
///
/// Every field is optional in the file; `#[serde(default)]` fills gaps from
/// [`CompiledDefaults`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Root of the content-addressed stem cache
    pub cache_dir: Option<PathBuf>,

    /// Where uploads are spooled while a job runs
    pub upload_dir: Option<PathBuf>,

    /// HTTP listen address
    pub bind_address: String,

    /// Cache size ceiling in megabytes
    pub max_cache_size_mb: u64,

    /// Upload size ceiling in megabytes
    pub max_upload_mb: u64,

    /// Entries not accessed for this many days are pruned
    pub cache_max_age_days: u64,

    /// How often the prune task runs (seconds)
    pub prune_interval_secs: u64,

    /// Subscribers idle longer than this are reclaimed (seconds)
    pub stale_timeout_secs: u64,

    /// How often idle subscribers are swept (seconds)
    pub sweep_interval_secs: u64,

    /// Allowed CORS origins for the web client
    pub cors_origins: Vec<String>,

    /// External separation tool
    pub separator: SeparatorConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// External separation tool invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeparatorConfig {
    /// Executable to run
    pub program: String,

    /// Extra arguments placed before the output/input arguments
    pub args: Vec<String>,

    /// Model name; the tool writes into `<out>/<model>/<track>/`
    pub model: String,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log file path (optional, logs to stderr only if not specified)
    pub file: Option<PathBuf>,
}

impl Default for TomlConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            upload_dir: None,
            bind_address: "127.0.0.1:8007".to_string(),
            max_cache_size_mb: 1000,
            max_upload_mb: 100,
            cache_max_age_days: 30,
            prune_interval_secs: 3600,
            stale_timeout_secs: 300,
            sweep_interval_secs: 60,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://localhost:3000".to_string(),
            ],
            separator: SeparatorConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for SeparatorConfig {
    fn default() -> Self {
        Self {
            program: "demucs".to_string(),
            args: Vec::new(),
            model: "htdemucs_ft".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

/// OS-dependent compiled defaults
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub cache_dir: PathBuf,
    pub upload_dir: PathBuf,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let cache_dir = dirs::home_dir()
            .map(|home| home.join(".riffroom").join("stems"))
            .unwrap_or_else(|| PathBuf::from("./riffroom_data/stems"));

        Self {
            cache_dir,
            upload_dir: std::env::temp_dir().join("riffroom"),
            log_level: "info".to_string(),
        }
    }
}

/// Default TOML path for a module: `<config_dir>/riffroom/<module>.toml`
pub fn default_config_path(module_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("riffroom").join(format!("{}.toml", module_name)))
}

/// Load TOML configuration, falling back to defaults when the file is absent
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            "Config file {} not found, using compiled defaults",
            path.display()
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed ({}): {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed ({}): {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write TOML configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Cache folder resolution
///
/// Priority order:
/// 1. Command-line argument (highest priority)
/// 2. `RIFF_CACHE_DIR` environment variable
/// 3. `cache_dir` in the TOML config
/// 4. Compiled default (`~/.riffroom/stems`)
pub struct CacheDirResolver<'a> {
    cli_arg: Option<&'a Path>,
    toml: Option<&'a TomlConfig>,
}

impl<'a> CacheDirResolver<'a> {
    pub fn new() -> Self {
        Self {
            cli_arg: None,
            toml: None,
        }
    }

    pub fn with_cli_arg(mut self, path: Option<&'a Path>) -> Self {
        self.cli_arg = path;
        self
    }

    pub fn with_toml(mut self, config: &'a TomlConfig) -> Self {
        self.toml = Some(config);
        self
    }

    pub fn resolve(&self) -> PathBuf {
        if let Some(path) = self.cli_arg {
            return path.to_path_buf();
        }

        if let Ok(path) = std::env::var(CACHE_DIR_ENV) {
            if !path.trim().is_empty() {
                return expand_home(&path);
            }
        }

        if let Some(path) = self.toml.and_then(|c| c.cache_dir.as_ref()) {
            return expand_home(&path.to_string_lossy());
        }

        CompiledDefaults::for_current_platform().cache_dir
    }
}

impl Default for CacheDirResolver<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Expand a leading `~/` to the user's home directory
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
