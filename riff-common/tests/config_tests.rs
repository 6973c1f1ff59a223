//! Unit tests for configuration loading and graceful degradation
//!
//! - Missing TOML files SHALL NOT cause termination
//! - Missing fields fall back to compiled defaults
//! - Cache folder priority: CLI → ENV → TOML → default
//!
//! Note: Uses serial_test crate to prevent ENV variable race conditions.
//! Tests that manipulate RIFF_CACHE_DIR are marked with #[serial].

use riff_common::config::{
    expand_home, load_toml_config, write_toml_config, CacheDirResolver, CompiledDefaults,
    LoggingConfig, TomlConfig, CACHE_DIR_ENV,
};
use serial_test::serial;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_compiled_defaults_for_current_platform() {
    let defaults = CompiledDefaults::for_current_platform();

    assert!(!defaults.cache_dir.as_os_str().is_empty());
    assert!(defaults.cache_dir.ends_with("stems"));
    assert!(defaults.upload_dir.ends_with("riffroom"));
    assert_eq!(defaults.log_level, "info");
}

#[test]
fn test_missing_toml_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = load_toml_config(&temp_dir.path().join("absent.toml")).unwrap();

    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.max_cache_size_mb, 1000);
    assert_eq!(config.max_upload_mb, 100);
    assert_eq!(config.cache_max_age_days, 30);
    assert_eq!(config.stale_timeout_secs, 300);
    assert_eq!(config.sweep_interval_secs, 60);
}

#[test]
fn test_partial_toml_fills_gaps_from_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("riff-sp.toml");
    std::fs::write(
        &path,
        r#"
max_cache_size_mb = 250
cache_dir = "/srv/stems"

[logging]
level = "debug"
"#,
    )
    .unwrap();

    let config = load_toml_config(&path).unwrap();
    assert_eq!(config.max_cache_size_mb, 250);
    assert_eq!(config.cache_dir, Some(PathBuf::from("/srv/stems")));
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.logging.file, None);
    assert_eq!(config.bind_address, "127.0.0.1:8007");
    assert_eq!(config.separator.program, "demucs");
}

#[test]
fn test_malformed_toml_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("bad.toml");
    std::fs::write(&path, "max_cache_size_mb = [not a number").unwrap();

    let err = load_toml_config(&path).unwrap_err();
    assert!(matches!(err, riff_common::Error::Config(_)));
}

#[test]
fn test_write_then_load_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("riff-sp.toml");

    let config = TomlConfig {
        cache_dir: Some(PathBuf::from("/tmp/stems")),
        max_upload_mb: 42,
        logging: LoggingConfig {
            level: "warn".to_string(),
            file: Some(PathBuf::from("/tmp/riff.log")),
        },
        ..TomlConfig::default()
    };

    write_toml_config(&config, &path).unwrap();
    assert!(!path.with_extension("toml.tmp").exists());
    assert_eq!(load_toml_config(&path).unwrap(), config);
}

#[test]
#[serial]
fn test_resolver_with_no_overrides_uses_default() {
    env::remove_var(CACHE_DIR_ENV);

    let resolved = CacheDirResolver::new().resolve();
    assert_eq!(resolved, CompiledDefaults::for_current_platform().cache_dir);
}

#[test]
#[serial]
fn test_resolver_env_beats_toml() {
    env::set_var(CACHE_DIR_ENV, "/tmp/riff-env-cache");
    let toml = TomlConfig {
        cache_dir: Some(PathBuf::from("/tmp/riff-toml-cache")),
        ..TomlConfig::default()
    };

    let resolved = CacheDirResolver::new().with_toml(&toml).resolve();
    env::remove_var(CACHE_DIR_ENV);

    assert_eq!(resolved, PathBuf::from("/tmp/riff-env-cache"));
}

#[test]
#[serial]
fn test_resolver_cli_beats_env() {
    env::set_var(CACHE_DIR_ENV, "/tmp/riff-env-cache");

    let cli = Path::new("/tmp/riff-cli-cache");
    let resolved = CacheDirResolver::new().with_cli_arg(Some(cli)).resolve();
    env::remove_var(CACHE_DIR_ENV);

    assert_eq!(resolved, PathBuf::from("/tmp/riff-cli-cache"));
}

#[test]
#[serial]
fn test_resolver_uses_toml_when_env_absent() {
    env::remove_var(CACHE_DIR_ENV);
    let toml = TomlConfig {
        cache_dir: Some(PathBuf::from("/tmp/riff-toml-cache")),
        ..TomlConfig::default()
    };

    let resolved = CacheDirResolver::new().with_toml(&toml).resolve();
    assert_eq!(resolved, PathBuf::from("/tmp/riff-toml-cache"));
}

#[test]
fn test_expand_home_leaves_absolute_paths() {
    assert_eq!(expand_home("/var/cache"), PathBuf::from("/var/cache"));
    if let Some(home) = dirs_home() {
        assert_eq!(expand_home("~/stems"), home.join("stems"));
    }
}

fn dirs_home() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}
