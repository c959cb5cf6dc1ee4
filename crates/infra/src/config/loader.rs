//! Configuration loader
//!
//! Loads agent configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. If any `HIBENCH_*` variable is set, load from the environment
//! 2. Otherwise probe the standard paths for a config file
//! 3. Otherwise fall back to the built-in defaults
//!
//! The loaded configuration is validated before it is returned.
//!
//! ## Environment Variables
//! Every variable is optional; unset ones keep their default.
//! - `HIBENCH_THREAD_STACK_SIZE`: Worker thread stack size in bytes
//! - `HIBENCH_DUPLICATE_LOOKUP`: `most_recent` or `first_registered`
//! - `HIBENCH_MAX_VARIABLE_LENGTH`: Longest composite variable key in bytes
//! - `HIBENCH_LOG_FILTER`: `EnvFilter` directives
//! - `HIBENCH_LOG_JSON`: JSON log output (true/false)
//! - `HIBENCH_LOCK_TRACING`: Lock call-site tracing (true/false)
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./config.json` or `./config.toml` (current working directory)
//! 2. `./hibench.json` or `./hibench.toml` (current working directory)
//! 3. `../config.json` or `../config.toml` (parent directory)
//! 4. `../../config.json` or `../../config.toml` (grandparent directory)
//! 5. Relative to executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use hibench_domain::constants::{CONFIG_FILE_STEM, ENV_PREFIX};
use hibench_domain::{Config, DuplicateLookup, HibenchError, Result};

pub const ENV_THREAD_STACK_SIZE: &str = "HIBENCH_THREAD_STACK_SIZE";
pub const ENV_DUPLICATE_LOOKUP: &str = "HIBENCH_DUPLICATE_LOOKUP";
pub const ENV_MAX_VARIABLE_LENGTH: &str = "HIBENCH_MAX_VARIABLE_LENGTH";
pub const ENV_LOG_FILTER: &str = "HIBENCH_LOG_FILTER";
pub const ENV_LOG_JSON: &str = "HIBENCH_LOG_JSON";
pub const ENV_LOCK_TRACING: &str = "HIBENCH_LOCK_TRACING";

/// Load configuration with automatic fallback strategy
///
/// # Errors
/// Returns `HibenchError::Config` if the selected source is unreadable,
/// malformed or fails validation. A missing config file is not an error.
pub fn load() -> Result<Config> {
    let config = if env_configured() {
        let config = load_from_env()?;
        tracing::info!("Configuration loaded from environment variables");
        config
    } else if let Some(path) = probe_config_paths() {
        load_from_file(Some(path))?
    } else {
        tracing::info!("No configuration found, using defaults");
        Config::default()
    };

    config.validate()?;
    Ok(config)
}

/// Load configuration from environment variables
///
/// Starts from the defaults and overrides every field whose variable is
/// set. At least one `HIBENCH_*` variable must be present.
///
/// # Environment Variables
/// See module documentation for the complete list.
///
/// # Errors
/// Returns `HibenchError::Config` if no variable is set or a value does not
/// parse.
pub fn load_from_env() -> Result<Config> {
    if !env_configured() {
        return Err(HibenchError::Config(format!("No {ENV_PREFIX}* environment variables set")));
    }

    let mut config = Config::default();

    if let Some(raw) = env_opt(ENV_THREAD_STACK_SIZE) {
        let size = raw
            .parse::<usize>()
            .map_err(|e| HibenchError::Config(format!("Invalid thread stack size: {e}")))?;
        config.threads.stack_size_bytes = Some(size);
    }

    if let Some(raw) = env_opt(ENV_DUPLICATE_LOOKUP) {
        config.registry.duplicate_lookup = DuplicateLookup::from_str(&raw)
            .map_err(|e| HibenchError::Config(format!("Invalid duplicate lookup policy: {e}")))?;
    }

    if let Some(raw) = env_opt(ENV_MAX_VARIABLE_LENGTH) {
        config.registry.max_variable_length = raw
            .parse::<usize>()
            .map_err(|e| HibenchError::Config(format!("Invalid max variable length: {e}")))?;
    }

    if let Some(filter) = env_opt(ENV_LOG_FILTER) {
        config.logging.filter = filter;
    }
    config.logging.json = env_bool(ENV_LOG_JSON, config.logging.json);
    config.logging.lock_tracing = env_bool(ENV_LOCK_TRACING, config.logging.lock_tracing);

    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
///
/// # Arguments
/// * `path` - Optional path to config file. If `None`, uses
///   [`probe_config_paths`].
///
/// # Errors
/// Returns `HibenchError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
pub fn load_from_file(path: Option<PathBuf>) -> Result<Config> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(HibenchError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            HibenchError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| HibenchError::Config(format!("Failed to read config file: {e}")))?;

    parse_config(&contents, &config_path)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`); sections and
/// fields left out keep their defaults.
///
/// # Errors
/// Returns `HibenchError::Config` if format is invalid or parsing fails.
fn parse_config(contents: &str, path: &Path) -> Result<Config> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents).map_err(|e| HibenchError::Config(format!("Invalid TOML format: {e}"))),
        "json" => {
            serde_json::from_str(contents).map_err(|e| HibenchError::Config(format!("Invalid JSON format: {e}")))
        }
        _ => Err(HibenchError::Config(format!("Unsupported config format: {extension}"))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches for config files in the following locations (in order):
/// 1. Current working directory (`./config.{json,toml}`,
///    `./hibench.{json,toml}`)
/// 2. Parent directories (up to 2 levels)
/// 3. Relative to executable location
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(candidates_in(&cwd));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(candidates_in(exe_dir));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

fn candidates_in(dir: &Path) -> Vec<PathBuf> {
    vec![
        dir.join("config.json"),
        dir.join("config.toml"),
        dir.join(format!("{CONFIG_FILE_STEM}.json")),
        dir.join(format!("{CONFIG_FILE_STEM}.toml")),
        dir.join("../config.json"),
        dir.join("../config.toml"),
        dir.join("../../config.json"),
        dir.join("../../config.toml"),
    ]
}

fn env_configured() -> bool {
    std::env::vars_os().any(|(key, _)| key.to_str().is_some_and(|key| key.starts_with(ENV_PREFIX)))
}

/// Non-empty value of an environment variable
fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse boolean from environment variable
///
/// Accepts: `1`/`0`, `true`/`false`, `yes`/`no`, `on`/`off` (case-insensitive)
///
/// # Returns
/// The parsed boolean value, or `default` if not set.
fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|s| matches!(s.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Mutex;

    use once_cell::sync::Lazy;
    use tempfile::NamedTempFile;

    use super::*;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    const ALL_VARS: [&str; 6] = [
        ENV_THREAD_STACK_SIZE,
        ENV_DUPLICATE_LOOKUP,
        ENV_MAX_VARIABLE_LENGTH,
        ENV_LOG_FILTER,
        ENV_LOG_JSON,
        ENV_LOCK_TRACING,
    ];

    fn clear_env() {
        for key in ALL_VARS {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn test_env_bool_parsing() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        for (key, value) in [("TEST_HB_BOOL_1", "1"), ("TEST_HB_BOOL_YES", "yes"), ("TEST_HB_BOOL_UPPER", " TRUE ")] {
            std::env::set_var(key, value);
            assert!(env_bool(key, false), "{value} should parse as true");
            std::env::remove_var(key);
        }

        for (key, value) in [("TEST_HB_BOOL_0", "0"), ("TEST_HB_BOOL_OFF", "off"), ("TEST_HB_BOOL_JUNK", "maybe")] {
            std::env::set_var(key, value);
            assert!(!env_bool(key, true), "{value} should parse as false");
            std::env::remove_var(key);
        }

        std::env::remove_var("TEST_HB_BOOL_MISSING");
        assert!(env_bool("TEST_HB_BOOL_MISSING", true));
        assert!(!env_bool("TEST_HB_BOOL_MISSING", false));
    }

    #[test]
    fn test_load_from_env_all_vars_set() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var(ENV_THREAD_STACK_SIZE, "8388608");
        std::env::set_var(ENV_DUPLICATE_LOOKUP, "first-registered");
        std::env::set_var(ENV_MAX_VARIABLE_LENGTH, "256");
        std::env::set_var(ENV_LOG_FILTER, "debug,hibench::variables=trace");
        std::env::set_var(ENV_LOG_JSON, "true");
        std::env::set_var(ENV_LOCK_TRACING, "on");

        let result = load_from_env();
        clear_env();

        let config = result.expect("config from env vars");
        assert_eq!(config.threads.stack_size_bytes, Some(8_388_608));
        assert_eq!(config.registry.duplicate_lookup, DuplicateLookup::FirstRegistered);
        assert_eq!(config.registry.max_variable_length, 256);
        assert_eq!(config.logging.filter, "debug,hibench::variables=trace");
        assert!(config.logging.json);
        assert!(config.logging.lock_tracing);
    }

    #[test]
    fn test_load_from_env_partial_keeps_defaults() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var(ENV_LOG_JSON, "yes");
        let result = load_from_env();
        clear_env();

        let config = result.expect("config from env vars");
        assert!(config.logging.json);
        assert_eq!(config.registry, Config::default().registry);
        assert_eq!(config.threads.stack_size_bytes, None);
    }

    #[test]
    fn test_load_from_env_nothing_set() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        if env_configured() {
            // another HIBENCH_ variable leaked in from the outer environment
            return;
        }
        let err = load_from_env().unwrap_err();
        assert!(matches!(err, HibenchError::Config(_)), "Should be a Config error");
    }

    #[test]
    fn test_load_from_env_invalid_values() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");

        for (key, value) in [
            (ENV_THREAD_STACK_SIZE, "big"),
            (ENV_DUPLICATE_LOOKUP, "random"),
            (ENV_MAX_VARIABLE_LENGTH, "-1"),
        ] {
            clear_env();
            std::env::set_var(key, value);
            let result = load_from_env();
            clear_env();
            assert!(matches!(result, Err(HibenchError::Config(_))), "{key}={value} should be rejected");
        }
    }

    #[test]
    fn test_load_validates_env_config() {
        let _guard = ENV_LOCK.lock().expect("env mutex poisoned");
        clear_env();

        std::env::set_var(ENV_MAX_VARIABLE_LENGTH, "4");
        let result = load();
        clear_env();

        assert!(matches!(result, Err(HibenchError::Config(msg)) if msg.contains("max_variable_length")));
    }

    #[test]
    fn test_load_from_file_toml() {
        let toml_content = r#"
[threads]
stack_size_bytes = 4194304

[registry]
duplicate_lookup = "first_registered"

[logging]
filter = "warn"
"#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();
        let path = temp_file.path().with_extension("toml");
        std::fs::copy(temp_file.path(), &path).unwrap();

        let result = load_from_file(Some(path.clone()));
        std::fs::remove_file(path).ok();

        let config = result.expect("config from TOML file");
        assert_eq!(config.threads.stack_size_bytes, Some(4_194_304));
        assert_eq!(config.registry.duplicate_lookup, DuplicateLookup::FirstRegistered);
        assert_eq!(config.registry.max_variable_length, 1024);
        assert_eq!(config.logging.filter, "warn");
    }

    #[test]
    fn test_load_from_file_not_found() {
        let result = load_from_file(Some(PathBuf::from("/nonexistent/hibench.json")));
        assert!(matches!(result, Err(HibenchError::Config(_))), "Should be a Config error");
    }

    #[test]
    fn test_parse_config_json() {
        let json_content = r#"{ "logging": { "json": true, "lock_tracing": true } }"#;

        let config = parse_config(json_content, &PathBuf::from("hibench.json")).expect("valid JSON");
        assert!(config.logging.json);
        assert!(config.logging.lock_tracing);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn test_parse_config_rejects_unknown_policy() {
        let toml_content = "[registry]\nduplicate_lookup = \"newest\"\n";
        let result = parse_config(toml_content, &PathBuf::from("hibench.toml"));
        assert!(matches!(result, Err(HibenchError::Config(msg)) if msg.contains("TOML")));
    }

    #[test]
    fn test_parse_config_unsupported_format() {
        let result = parse_config("threads: {}", &PathBuf::from("hibench.yaml"));
        assert!(result.is_err(), "Should fail with unsupported format");
    }

    #[test]
    fn test_candidates_cover_both_stems() {
        let names: Vec<String> = candidates_in(Path::new("/etc/hibench"))
            .iter()
            .map(|path| path.display().to_string())
            .collect();
        assert_eq!(names[0], "/etc/hibench/config.json");
        assert!(names.contains(&"/etc/hibench/hibench.toml".to_string()));
        assert_eq!(names.len(), 8);
    }
}
