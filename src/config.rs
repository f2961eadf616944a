use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::system::apps::UninstallPolicy;
use crate::system::process::MemoryPolicy;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub processes: ProcessesConfig,
    pub applications: ApplicationsConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub refresh_interval_ms: u64,
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            refresh_interval_ms: 2000,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ProcessesConfig {
    /// Overrides the identifier read from the monitor's own bundle.
    pub self_bundle_id: Option<String>,
    pub memory_virtual_divisor: u64,
    pub memory_resident_divisor: u64,
}

impl Default for ProcessesConfig {
    fn default() -> Self {
        ProcessesConfig {
            self_bundle_id: None,
            memory_virtual_divisor: 8,
            memory_resident_divisor: 4,
        }
    }
}

impl ProcessesConfig {
    pub fn memory_policy(&self) -> MemoryPolicy {
        MemoryPolicy {
            virtual_divisor: self.memory_virtual_divisor.max(1),
            resident_divisor: self.memory_resident_divisor.max(1),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ApplicationsConfig {
    /// Listed one level deep, in order. A leading `~/` means the home directory.
    pub search_roots: Vec<String>,
    pub protected_roots: Vec<String>,
    pub bundle_extension: String,
    pub skip_hidden: bool,
}

impl Default for ApplicationsConfig {
    fn default() -> Self {
        ApplicationsConfig {
            search_roots: vec![
                "/Applications".to_string(),
                "/System/Applications".to_string(),
                "~/Applications".to_string(),
            ],
            protected_roots: vec!["/System".to_string(), "/usr".to_string()],
            bundle_extension: "app".to_string(),
            skip_hidden: true,
        }
    }
}

impl ApplicationsConfig {
    /// Search roots with `~` expanded; home-relative roots are dropped when
    /// there is no home directory.
    pub fn resolved_search_roots(&self) -> Vec<PathBuf> {
        self.search_roots
            .iter()
            .filter_map(|root| expand_home(root))
            .collect()
    }

    pub fn uninstall_policy(&self) -> UninstallPolicy {
        UninstallPolicy::new(
            self.protected_roots
                .iter()
                .filter_map(|root| expand_home(root))
                .collect(),
        )
    }
}

fn expand_home(raw: &str) -> Option<PathBuf> {
    if raw == "~" {
        return dirs::home_dir();
    }
    match raw.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map(|home| home.join(rest)),
        None => Some(PathBuf::from(raw)),
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("appwatch").join("config.toml"))
}

/// A config file that exists but could not be read or parsed.
#[derive(Debug)]
pub struct ConfigError {
    pub path: PathBuf,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

impl std::error::Error for ConfigError {}

/// Parse the file at `path`. A missing file is not an error.
pub fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let error = |message: String| ConfigError {
        path: path.to_path_buf(),
        message,
    };
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(err) => return Err(error(err.to_string())),
    };
    toml::from_str(&contents).map_err(|err| error(err.to_string()))
}

/// Config from `path`, else from [`config_path`]. On failure the defaults
/// come back together with the error, so the caller can report it once
/// logging is installed.
pub fn load_config(path: Option<&Path>) -> (Config, Option<ConfigError>) {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => match config_path() {
            Some(path) => path,
            None => return (Config::default(), None),
        },
    };
    match read_config_file(&path) {
        Ok(config) => (config, None),
        Err(err) => (Config::default(), Some(err)),
    }
}
