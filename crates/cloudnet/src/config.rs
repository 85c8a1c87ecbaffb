//! Node configuration.
//!
//! Read from a JSON file, which is created with defaults on first start, then
//! overridden field by field from `CLOUDNET_*` environment variables.

use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug)]
pub enum ConfigError {
    Io { path: PathBuf, source: io::Error },
    Parse { path: PathBuf, source: serde_json::Error },
    InvalidValue { key: String, value: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io { path, source } => write!(f, "{}: {}", path.display(), source),
            ConfigError::Parse { path, source } => {
                write!(f, "{}: invalid configuration: {}", path.display(), source)
            }
            ConfigError::InvalidValue { key, value, reason } => {
                write!(f, "invalid configuration for {}: '{}' ({})", key, value, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::InvalidValue { .. } => None,
        }
    }
}

mod defaults {
    use std::path::PathBuf;

    pub fn node_id() -> String {
        "Node-1".to_string()
    }

    pub fn dispatcher_threads() -> usize {
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2).max(2)
    }

    pub fn io_threads() -> usize {
        2
    }

    pub fn query_timeout_ms() -> u64 {
        30_000
    }

    pub fn group_directory() -> PathBuf {
        PathBuf::from("local/groups")
    }

    pub fn legacy_group_file() -> PathBuf {
        PathBuf::from("local/groups.json")
    }

    pub fn task_directory() -> PathBuf {
        PathBuf::from("local/tasks")
    }

    pub fn legacy_task_file() -> PathBuf {
        PathBuf::from("local/tasks.json")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConfig {
    #[serde(default = "defaults::node_id")]
    pub node_id: String,
    #[serde(default = "defaults::dispatcher_threads")]
    pub dispatcher_threads: usize,
    #[serde(default = "defaults::io_threads")]
    pub io_threads: usize,
    #[serde(default = "defaults::query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "defaults::group_directory")]
    pub group_directory: PathBuf,
    #[serde(default = "defaults::legacy_group_file")]
    pub legacy_group_file: PathBuf,
    #[serde(default = "defaults::task_directory")]
    pub task_directory: PathBuf,
    #[serde(default = "defaults::legacy_task_file")]
    pub legacy_task_file: PathBuf,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            node_id: defaults::node_id(),
            dispatcher_threads: defaults::dispatcher_threads(),
            io_threads: defaults::io_threads(),
            query_timeout_ms: defaults::query_timeout_ms(),
            group_directory: defaults::group_directory(),
            legacy_group_file: defaults::legacy_group_file(),
            task_directory: defaults::task_directory(),
            legacy_task_file: defaults::legacy_task_file(),
        }
    }
}

impl NodeConfig {
    /// Reads `path`, or writes the defaults there if it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let io_err = |source| ConfigError::Io { path: path.to_path_buf(), source };

        if !path.exists() {
            let config = Self::default();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
            let text = serde_json::to_string_pretty(&config)
                .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
            fs::write(path, text).map_err(io_err)?;
            tracing::info!(path = %path.display(), "wrote default configuration");
            return Ok(config);
        }

        let text = fs::read_to_string(path).map_err(io_err)?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })
    }

    /// Applies `CLOUDNET_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    pub(crate) fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(val) = var("CLOUDNET_NODE_ID") {
            self.node_id = val;
        }
        if let Some(val) = var("CLOUDNET_GROUPS_DIRECTORY") {
            self.group_directory = PathBuf::from(val);
        }
        if let Some(val) = var("CLOUDNET_GROUPS_FILE") {
            self.legacy_group_file = PathBuf::from(val);
        }
        if let Some(val) = var("CLOUDNET_TASKS_DIRECTORY") {
            self.task_directory = PathBuf::from(val);
        }
        if let Some(val) = var("CLOUDNET_TASKS_FILE") {
            self.legacy_task_file = PathBuf::from(val);
        }
        if let Some(val) = var("CLOUDNET_DISPATCHER_THREADS") {
            self.dispatcher_threads = match val.parse::<usize>() {
                Ok(n) if n > 0 => n,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "CLOUDNET_DISPATCHER_THREADS".to_string(),
                        value: val,
                        reason: "must be a positive integer".to_string(),
                    });
                }
            };
        }
        Ok(())
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms)
    }

    /// Places every relative path under `root`.
    pub fn rooted_at(mut self, root: &Path) -> Self {
        for path in [
            &mut self.group_directory,
            &mut self.legacy_group_file,
            &mut self.task_directory,
            &mut self.legacy_task_file,
        ] {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        }
        self
    }
}
