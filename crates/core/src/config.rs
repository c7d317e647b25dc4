//! Project configuration (`taskmemo.toml`)
//!
//! ```toml
//! [cache]
//! dir = ".cache/taskmemo"
//! max_size_bytes = 1073741824
//!
//! [cache.remote]
//! url = "https://cache.example.com"
//! push = true
//! token_env = "TASKMEMO_REMOTE_TOKEN"
//!
//! [executor]
//! max_parallel = 4
//!
//! [[tasks]]
//! name = "stub"
//! command = "kapt-stub"
//! args = ["src", "stubs"]
//! inputs = [{ path = "src" }, { property = "jvm-target", value = "17" }]
//! outputs = ["stubs"]
//! ```

use crate::tasks::{CommandAction, CopyAction, CopySpec, ExecutorConfig, InputDescriptor, Task, TaskAction};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use taskmemo_cache::{
    CacheRootInputs, CacheStore, DirectoryRemoteStore, HttpRemoteStore, LocalStore, RemoteStore,
    RetryConfig, resolve_cache_root,
};

/// Default configuration file name in the project root
pub const CONFIG_FILE_NAME: &str = "taskmemo.toml";

fn default_true() -> bool {
    true
}

fn default_remote_timeout_secs() -> u64 {
    30
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Scheduling settings
    #[serde(default)]
    pub executor: ExecutorSettings,

    /// Task definitions
    #[serde(default)]
    pub tasks: Vec<TaskConfig>,
}

/// `[cache]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Cache root; relative paths are resolved against the project root
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,

    /// Upper bound of the local cache, enforced in LRU order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size_bytes: Option<u64>,

    /// Shared remote tier
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
}

/// `[cache.remote]`: exactly one of `url` and `path`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// HTTP endpoint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Shared directory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Upload new entries
    #[serde(default = "default_true")]
    pub push: bool,

    /// Environment variable holding a bearer token
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,

    /// Per-request timeout
    #[serde(default = "default_remote_timeout_secs")]
    pub timeout_secs: u64,

    /// Retry policy for transient failures
    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[executor]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(deny_unknown_fields)]
pub struct ExecutorSettings {
    /// Maximum tasks running at once
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Stop launching tasks after the first failure (default true)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abort_on_failure: Option<bool>,

    /// Timeout for tasks without their own
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_timeout_secs: Option<u64>,
}

impl ExecutorSettings {
    /// Executor configuration with unset values defaulted
    #[must_use]
    pub fn to_config(&self) -> ExecutorConfig {
        let defaults = ExecutorConfig::default();
        ExecutorConfig {
            max_parallel: self.max_parallel.unwrap_or(defaults.max_parallel).max(1),
            abort_on_failure: self.abort_on_failure.unwrap_or(defaults.abort_on_failure),
            default_timeout: self.default_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// `[[tasks]]`: a command task or a copy task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    /// Unique name
    pub name: String,

    /// Program to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Program arguments
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra environment for the program
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Tool version token folded into the fingerprint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Copies to perform instead of a command
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub copy: Vec<CopySpec>,

    /// Declared inputs, in order
    #[serde(default)]
    pub inputs: Vec<InputDescriptor>,

    /// Declared outputs
    #[serde(default)]
    pub outputs: Vec<String>,

    /// Tasks that must finish first
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Wall-clock limit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    /// Store and load results through the cache
    #[serde(default = "default_true")]
    pub cacheable: bool,
}

impl TaskConfig {
    /// Build the validated task.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless exactly one of `command` and
    /// `copy` is set, or when a declared path is invalid.
    pub fn to_task(&self) -> Result<Task> {
        let action: TaskAction = match (&self.command, self.copy.is_empty()) {
            (Some(program), true) => CommandAction {
                program: program.clone(),
                args: self.args.clone(),
                env: self.env.clone(),
                version: self.version.clone(),
            }
            .into(),
            (None, false) => CopyAction {
                copies: self.copy.clone(),
            }
            .into(),
            (Some(_), false) => {
                return Err(Error::configuration(format!(
                    "Task '{}' sets both `command` and `copy`",
                    self.name
                )));
            }
            (None, true) => {
                return Err(Error::configuration(format!(
                    "Task '{}' needs either `command` or `copy`",
                    self.name
                )));
            }
        };

        Task {
            name: self.name.clone(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.clone(),
            depends_on: self.depends_on.clone(),
            action,
            timeout: self.timeout_secs.map(Duration::from_secs),
            cacheable: self.cacheable,
        }
        .validate()
    }
}

impl ProjectConfig {
    /// Read and parse a configuration file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read and a configuration
    /// error if it is not valid.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(e, path, "read config"))?;
        Self::from_toml_str(&text)
            .map_err(|e| Error::configuration(format!("{}: {e}", path.display())))
    }

    /// Parse configuration text.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid TOML or unknown keys.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text).map_err(|e| Error::configuration(e.to_string()))?;
        tracing::debug!(tasks = config.tasks.len(), "Parsed project configuration");
        Ok(config)
    }

    /// All tasks, validated.
    ///
    /// # Errors
    ///
    /// Returns the first task configuration error.
    pub fn tasks(&self) -> Result<Vec<Task>> {
        self.tasks.iter().map(TaskConfig::to_task).collect()
    }

    /// Resolve the local cache root for the project at `project_root`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if no candidate directory is writable.
    pub fn cache_root(&self, project_root: &Path) -> Result<PathBuf> {
        let configured = self.cache.dir.as_ref().map(|dir| project_root.join(dir));
        resolve_cache_root(CacheRootInputs::from_env(configured)).map_err(Error::from)
    }

    /// Open the cache store described by `[cache]`.
    ///
    /// With `use_remote` false any configured remote is ignored.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an invalid remote section and an
    /// I/O error if the local store cannot be opened.
    pub fn open_cache(&self, project_root: &Path, use_remote: bool) -> Result<CacheStore> {
        let root = self.cache_root(project_root)?;
        let store = CacheStore::new(LocalStore::open(root, self.cache.max_size_bytes)?);
        match self.cache.remote.as_ref().filter(|_| use_remote) {
            Some(remote) => {
                let (backend, push) = remote.open()?;
                Ok(store.with_remote(backend, push))
            }
            None => Ok(store),
        }
    }
}

impl RemoteConfig {
    /// Build the remote backend and return it with the push flag.
    ///
    /// # Errors
    ///
    /// Returns a configuration error unless exactly one of `url` and `path`
    /// is set.
    pub fn open(&self) -> Result<(Arc<dyn RemoteStore>, bool)> {
        let backend: Arc<dyn RemoteStore> = match (&self.url, &self.path) {
            (Some(url), None) => {
                let token = self
                    .token_env
                    .as_deref()
                    .and_then(|var| std::env::var(var).ok())
                    .filter(|token| !token.is_empty());
                Arc::new(HttpRemoteStore::new(
                    url.clone(),
                    token,
                    Duration::from_secs(self.timeout_secs),
                    self.retry.clone(),
                )?)
            }
            (None, Some(path)) => Arc::new(DirectoryRemoteStore::new(path.clone())),
            _ => {
                return Err(Error::configuration(
                    "[cache.remote] needs exactly one of `url` and `path`",
                ));
            }
        };
        tracing::debug!(remote = backend.name(), push = self.push, "Configured remote cache");
        Ok((backend, self.push))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{Action, PathSensitivity};
    use tempfile::TempDir;

    const EXAMPLE: &str = r#"
[cache]
dir = ".cache/taskmemo"
max_size_bytes = 1073741824

[cache.remote]
path = "/mnt/shared-cache"
push = false

[executor]
max_parallel = 2
abort_on_failure = false
default_timeout_secs = 600

[[tasks]]
name = "stub"
command = "kapt-stub"
args = ["src", "stubs"]
version = "1.9"
inputs = [{ path = "src" }, { property = "jvm-target", value = "17" }]
outputs = ["stubs"]

[[tasks]]
name = "process"
command = "kapt-process"
inputs = [{ path = "stubs", sensitivity = "name-only" }]
outputs = ["gen"]
depends_on = ["stub"]
timeout_secs = 60

[[tasks]]
name = "stage"
copy = [{ from = "gen", to = "staged" }]
inputs = [{ path = "gen" }]
outputs = ["staged"]
depends_on = ["process"]
cacheable = false
"#;

    #[test]
    fn test_parse_full_example() {
        let config = ProjectConfig::from_toml_str(EXAMPLE).unwrap();
        assert_eq!(config.cache.max_size_bytes, Some(1_073_741_824));
        let remote = config.cache.remote.as_ref().unwrap();
        assert!(!remote.push);
        assert_eq!(remote.timeout_secs, 30);
        assert_eq!(remote.retry, RetryConfig::default());

        let executor = config.executor.to_config();
        assert_eq!(executor.max_parallel, 2);
        assert!(!executor.abort_on_failure);
        assert_eq!(executor.default_timeout, Some(Duration::from_secs(600)));

        let tasks = config.tasks().unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].action.identity()["version"], "1.9");
        assert_eq!(
            tasks[1].inputs[0],
            InputDescriptor::path("stubs").with_sensitivity(PathSensitivity::NameOnly)
        );
        assert_eq!(tasks[1].timeout, Some(Duration::from_secs(60)));
        assert!(matches!(tasks[2].action, TaskAction::Copy(_)));
        assert!(!tasks[2].cacheable);
    }

    #[test]
    fn test_empty_config() {
        let config = ProjectConfig::from_toml_str("").unwrap();
        assert!(config.tasks.is_empty());
        assert!(config.executor.to_config().abort_on_failure);
    }

    #[test]
    fn test_unknown_key_rejected() {
        let err = ProjectConfig::from_toml_str("[cache]\nsize = 1\n").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_task_action_must_be_unambiguous() {
        let both = ProjectConfig::from_toml_str(
            r#"[[tasks]]
name = "x"
command = "true"
copy = [{ from = "a", to = "b" }]
"#,
        )
        .unwrap();
        assert!(both.tasks().unwrap_err().to_string().contains("both"));

        let neither = ProjectConfig::from_toml_str("[[tasks]]\nname = \"x\"\n").unwrap();
        assert!(neither.tasks().unwrap_err().to_string().contains("either"));
    }

    #[test]
    fn test_escaping_path_rejected() {
        let config = ProjectConfig::from_toml_str(
            r#"[[tasks]]
name = "x"
command = "true"
inputs = [{ path = "../secret" }]
"#,
        )
        .unwrap();
        assert!(config.tasks().unwrap_err().is_configuration());
    }

    #[test]
    fn test_remote_needs_exactly_one_target() {
        let remote = RemoteConfig {
            url: Some("https://cache.example.com".into()),
            path: Some("/mnt".into()),
            push: true,
            token_env: None,
            timeout_secs: 30,
            retry: RetryConfig::default(),
        };
        assert!(remote.open().is_err());
    }

    #[test]
    fn test_open_cache_uses_configured_dir() {
        let project = TempDir::new().unwrap();
        let config = ProjectConfig::from_toml_str("[cache]\ndir = \".cache/tm\"\n").unwrap();
        let store = config.open_cache(project.path(), true).unwrap();
        assert_eq!(store.local().root(), project.path().join(".cache/tm"));
        assert!(store.remote_name().is_none());
    }

    #[test]
    fn test_open_cache_without_remote() {
        let project = TempDir::new().unwrap();
        let shared = TempDir::new().unwrap();
        let config = ProjectConfig::from_toml_str(&format!(
            "[cache]\ndir = \"c\"\n[cache.remote]\npath = \"{}\"\n",
            shared.path().display()
        ))
        .unwrap();
        assert!(config.open_cache(project.path(), true).unwrap().remote_name().is_some());
        assert!(config.open_cache(project.path(), false).unwrap().remote_name().is_none());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "[[tasks]]\nname = 1\n").unwrap();
        let err = ProjectConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains(CONFIG_FILE_NAME));
    }
}
