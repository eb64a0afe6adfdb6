//! Configuration for the executor.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (CONFIGURATION_SERVICE, EVENTBROKER, GENEXEC_*, env=runlocal)
//! 2. Config file (.genexec/config.yaml)
//! 3. Defaults
//!
//! Config file discovery:
//! - Searches current directory and parents for .genexec/config.yaml
//! - Falls back to ~/.genexec/config.yaml
//!
//! The resolved [`Settings`] are passed explicitly to the components that
//! need them; nothing is cached process-wide.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::{Interpreters, MatchPolicy, SecretFilter, StorageErrorPolicy};

/// Default resource repository inside the cluster
pub const DEFAULT_CONFIGURATION_SERVICE: &str = "http://configuration-service:8080";

/// Default resource repository in local mode
pub const LOCAL_CONFIGURATION_SERVICE: &str = "http://localhost:8080";

const CONFIG_DIR: &str = ".genexec";
const CONFIG_FILE: &str = "config.yaml";

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigFile {
    pub service_name: Option<String>,
    /// Folder holding the scripts within each scope
    pub resource_folder: Option<String>,
    pub configuration_service: Option<String>,
    pub event_broker: Option<String>,
    /// Directory in which per-event files are materialized
    pub work_dir: Option<String>,
    #[serde(default)]
    pub local: bool,
    #[serde(default)]
    pub verbose: bool,
    #[serde(default)]
    pub interpreters: Option<Interpreters>,
    #[serde(default)]
    pub match_policy: Option<MatchPolicy>,
    #[serde(default)]
    pub storage_error_policy: Option<StorageErrorPolicy>,
    /// Extra secret patterns, added to `secret_*`
    #[serde(default)]
    pub secret_patterns: Vec<String>,
}

/// Resolved settings
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    pub service_name: String,
    pub resource_folder: String,
    pub configuration_service: String,
    /// Outbound broker; required only for the broker sink
    pub event_broker: Option<String>,
    pub work_dir: PathBuf,
    /// Read files from `local_root` instead of the repository
    pub local_mode: bool,
    pub local_root: PathBuf,
    pub verbose: bool,
    pub interpreters: Interpreters,
    pub match_policy: MatchPolicy,
    pub storage_error_policy: StorageErrorPolicy,
    pub secret_patterns: Vec<String>,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            service_name: "generic-executor-service".to_string(),
            resource_folder: "generic-executor/".to_string(),
            configuration_service: DEFAULT_CONFIGURATION_SERVICE.to_string(),
            event_broker: None,
            work_dir: std::env::temp_dir().join("genexec"),
            local_mode: false,
            local_root: PathBuf::from("."),
            verbose: false,
            interpreters: Interpreters::default(),
            match_policy: MatchPolicy::default(),
            storage_error_policy: StorageErrorPolicy::default(),
            secret_patterns: Vec::new(),
            config_file: None,
        }
    }
}

impl Settings {
    /// Merge a config file and environment lookups over the defaults
    pub fn from_sources<F>(file: Option<(PathBuf, ConfigFile)>, cwd: &Path, env: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Settings {
            local_root: cwd.to_path_buf(),
            ..Settings::default()
        };
        let mut repository_set = false;

        if let Some((path, config)) = file {
            if let Some(name) = config.service_name {
                settings.service_name = name;
            }
            if let Some(folder) = config.resource_folder {
                settings.resource_folder = folder;
            }
            if let Some(url) = config.configuration_service {
                settings.configuration_service = url;
                repository_set = true;
            }
            if let Some(dir) = config.work_dir {
                let base = path
                    .parent()
                    .and_then(|p| p.parent())
                    .unwrap_or(Path::new("."));
                settings.work_dir = resolve_path(base, &dir);
            }
            settings.event_broker = config.event_broker;
            settings.local_mode = config.local;
            settings.verbose = config.verbose;
            settings.interpreters = config.interpreters.unwrap_or_default();
            settings.match_policy = config.match_policy.unwrap_or_default();
            settings.storage_error_policy = config.storage_error_policy.unwrap_or_default();
            settings.secret_patterns = config.secret_patterns;
            settings.config_file = Some(path);
        }

        if env("env").as_deref() == Some("runlocal") || env("GENEXEC_LOCAL").map_or(false, |v| is_truthy(&v)) {
            settings.local_mode = true;
        }
        if let Some(v) = env("GENEXEC_VERBOSE") {
            settings.verbose = is_truthy(&v);
        }
        if let Some(dir) = env("GENEXEC_WORK_DIR").filter(|d| !d.is_empty()) {
            settings.work_dir = PathBuf::from(dir);
        }
        if let Some(broker) = env("EVENTBROKER").filter(|b| !b.is_empty()) {
            settings.event_broker = Some(broker);
        }

        match env("CONFIGURATION_SERVICE").filter(|u| !u.is_empty()) {
            Some(url) => settings.configuration_service = url,
            None if settings.local_mode && !repository_set => {
                settings.configuration_service = LOCAL_CONFIGURATION_SERVICE.to_string();
            }
            None => {}
        }

        settings
    }

    /// Secret denylist with the configured extra patterns
    pub fn secret_filter(&self) -> SecretFilter {
        SecretFilter::with_patterns(&self.secret_patterns)
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Find config file by searching `start` and its parents, then the home directory
fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        let config_path = current.join(CONFIG_DIR).join(CONFIG_FILE);
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    let home = dirs::home_dir()?.join(CONFIG_DIR).join(CONFIG_FILE);
    home.exists().then_some(home)
}

/// Load and parse config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's project root
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
    }
}

/// Load settings from the config file and the process environment
pub fn load_settings() -> Result<Settings> {
    let cwd = std::env::current_dir().context("Failed to determine current directory")?;

    let file = match find_config_file(&cwd) {
        Some(path) => {
            let config = load_config_file(&path)?;
            Some((path, config))
        }
        None => None,
    };

    Ok(Settings::from_sources(file, &cwd, |key| std::env::var(key).ok()))
}
