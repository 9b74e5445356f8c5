//! TOML configuration.
//!
//! Every command reads one file (default `./config/tutor.toml`). Sections
//! that are omitted fall back to the defaults below; `[db]` and `[server]`
//! are required.
//!
//! ```toml
//! [db]
//! path = "./data/queue.sqlite"
//!
//! [server]
//! bind = "127.0.0.1:7071"
//!
//! [storage]
//! backend = "filesystem"
//! root = "./data/blobs"
//!
//! [engine]
//! command = "python"
//! args = ["main.py"]
//! ```

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub github: GithubConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_storage_root")]
    pub root: PathBuf,
    #[serde(default = "default_artifacts_namespace")]
    pub artifacts_namespace: String,
    #[serde(default = "default_errors_namespace")]
    pub errors_namespace: String,
    #[serde(default)]
    pub s3: Option<S3StorageConfig>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            root: default_storage_root(),
            artifacts_namespace: default_artifacts_namespace(),
            errors_namespace: default_errors_namespace(),
            s3: None,
        }
    }
}

fn default_backend() -> String {
    "filesystem".to_string()
}
fn default_storage_root() -> PathBuf {
    PathBuf::from("./data/blobs")
}
fn default_artifacts_namespace() -> String {
    "tutorials".to_string()
}
fn default_errors_namespace() -> String {
    "errors".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct S3StorageConfig {
    pub bucket: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct QueueConfig {
    /// How long a received message stays hidden before it is redelivered.
    #[serde(default = "default_visibility_timeout")]
    pub visibility_timeout_secs: u64,
    /// Deliveries after which a message is dropped as poison.
    #[serde(default = "default_max_dequeue_count")]
    pub max_dequeue_count: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout(),
            max_dequeue_count: default_max_dequeue_count(),
        }
    }
}

fn default_visibility_timeout() -> u64 {
    600
}
fn default_max_dequeue_count() -> u32 {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct WorkerConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_engine_timeout")]
    pub engine_timeout_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            poll_interval_ms: default_poll_interval(),
            engine_timeout_secs: default_engine_timeout(),
        }
    }
}

fn default_concurrency() -> usize {
    2
}
fn default_poll_interval() -> u64 {
    1000
}
fn default_engine_timeout() -> u64 {
    300
}

#[derive(Debug, Deserialize, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_engine_command")]
    pub command: String,
    #[serde(default = "default_engine_args")]
    pub args: Vec<String>,
    /// Scratch space for engine output before it is published.
    #[serde(default = "default_engine_work_dir")]
    pub work_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            command: default_engine_command(),
            args: default_engine_args(),
            work_dir: default_engine_work_dir(),
        }
    }
}

fn default_engine_command() -> String {
    "python".to_string()
}
fn default_engine_args() -> Vec<String> {
    vec!["main.py".to_string()]
}
fn default_engine_work_dir() -> PathBuf {
    PathBuf::from("./data/engine")
}

#[derive(Debug, Deserialize, Clone)]
pub struct GithubConfig {
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_github_timeout")]
    pub timeout_secs: u64,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            timeout_secs: default_github_timeout(),
        }
    }
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_github_timeout() -> u64 {
    30
}

impl Config {
    /// A config backed by in-memory storage, for tests and one-off tools.
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/queue.sqlite"),
            },
            server: ServerConfig {
                bind: "127.0.0.1:7071".to_string(),
            },
            storage: StorageConfig {
                backend: "memory".to_string(),
                ..StorageConfig::default()
            },
            queue: QueueConfig::default(),
            worker: WorkerConfig::default(),
            engine: EngineConfig::default(),
            github: GithubConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    match config.storage.backend.as_str() {
        "memory" | "filesystem" => {}
        "s3" => {
            if config.storage.s3.is_none() {
                bail!("storage.s3 must be configured when backend is 's3'");
            }
        }
        other => bail!(
            "Unknown storage backend: '{}'. Must be memory, filesystem, or s3.",
            other
        ),
    }

    if config.storage.artifacts_namespace.trim_matches('/').is_empty()
        || config.storage.errors_namespace.trim_matches('/').is_empty()
    {
        bail!("storage namespaces must not be empty");
    }

    if config.queue.max_dequeue_count < 1 {
        bail!("queue.max_dequeue_count must be >= 1");
    }

    if config.worker.concurrency < 1 {
        bail!("worker.concurrency must be >= 1");
    }

    if config.worker.engine_timeout_secs < 1 {
        bail!("worker.engine_timeout_secs must be >= 1");
    }

    // A lease that lapses mid-generation would hand the job to a second worker.
    if config.queue.visibility_timeout_secs <= config.worker.engine_timeout_secs {
        bail!(
            "queue.visibility_timeout_secs ({}) must be greater than worker.engine_timeout_secs ({})",
            config.queue.visibility_timeout_secs,
            config.worker.engine_timeout_secs
        );
    }

    if config.engine.command.trim().is_empty() {
        bail!("engine.command must not be empty");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &str) -> Result<Config> {
        let content = format!(
            r#"
[db]
path = "/tmp/q.sqlite"

[server]
bind = "127.0.0.1:0"
{}
"#,
            extra
        );
        let config: Config = toml::from_str(&content)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn defaults_apply_to_omitted_sections() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.storage.backend, "filesystem");
        assert_eq!(cfg.storage.artifacts_namespace, "tutorials");
        assert_eq!(cfg.storage.errors_namespace, "errors");
        assert_eq!(cfg.worker.engine_timeout_secs, 300);
        assert_eq!(cfg.queue.max_dequeue_count, 5);
        assert_eq!(cfg.github.api_base, "https://api.github.com");
    }

    #[test]
    fn s3_backend_requires_table() {
        let err = parse("[storage]\nbackend = \"s3\"\n").unwrap_err();
        assert!(err.to_string().contains("storage.s3"));

        let cfg = parse("[storage]\nbackend = \"s3\"\n[storage.s3]\nbucket = \"b\"\n").unwrap();
        assert_eq!(cfg.storage.s3.unwrap().region, "us-east-1");
    }

    #[test]
    fn rejects_unknown_backend_and_zero_concurrency() {
        assert!(parse("[storage]\nbackend = \"ftp\"\n").is_err());
        assert!(parse("[worker]\nconcurrency = 0\n").is_err());
        assert!(parse("[engine]\ncommand = \" \"\n").is_err());
    }

    #[test]
    fn lease_must_outlive_engine_timeout() {
        let err = parse("[queue]\nvisibility_timeout_secs = 600\n[worker]\nengine_timeout_secs = 900\n")
            .unwrap_err();
        assert!(err.to_string().contains("visibility_timeout_secs"));
        assert!(parse("[queue]\nvisibility_timeout_secs = 300\n").is_err());
        assert!(parse("[queue]\nvisibility_timeout_secs = 301\n").is_ok());
    }

    #[test]
    fn minimal_is_valid() {
        validate(&Config::minimal()).unwrap();
    }
}
