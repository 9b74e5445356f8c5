//! Tutorial flow engine boundary.
//!
//! The engine turns a repository into a set of Markdown tutorial files. It
//! is an external collaborator: this crate only defines the
//! [`TutorialFlowEngine`] contract and one adapter, [`CommandFlowEngine`],
//! which drives a generator program as a child process.
//!
//! # Command contract
//!
//! ```text
//! <command> <args…> --repo <url> --name <repo_name> --output <staging>
//!                   --max-size <bytes> [--include <glob>…] [--exclude <glob>…]
//! ```
//!
//! Each pattern flag appears at most once, followed by all of its globs.
//!
//! Credentials reach the child only through its own environment
//! (`GEMINI_API_KEY`, `GITHUB_TOKEN`). The program writes its tutorial under
//! `<staging>/<repo_name>/`; every file found there is then published into
//! the artifact namespace as `<repo_name>/<relative path>`.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::process::Command;

use crate::artifacts::ArtifactRepository;
use crate::config::EngineConfig;

/// Lines of stderr kept when the command fails.
const STDERR_TAIL_LINES: usize = 20;

/// Per-job secrets. Never logged.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct EngineCredentials {
    pub gen_key: String,
    pub source_token: Option<String>,
}

impl fmt::Debug for EngineCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCredentials")
            .field("gen_key", &"<redacted>")
            .field(
                "source_token",
                &self.source_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowRequest {
    pub repo_url: String,
    pub repo_name: String,
    pub include_patterns: BTreeSet<String>,
    pub exclude_patterns: BTreeSet<String>,
    pub max_file_size: u64,
    pub credentials: EngineCredentials,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlowOutcome {
    /// Artifact prefix the tutorial was published under.
    pub output_location: String,
    /// Chapter directories written, in name order.
    pub chapters: Vec<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TutorialFlowEngine: Send + Sync {
    /// Generate and publish the tutorial for one repository.
    async fn generate(&self, request: FlowRequest) -> Result<FlowOutcome>;
}

/// Runs an external generator program and publishes what it writes.
pub struct CommandFlowEngine {
    config: EngineConfig,
    artifacts: ArtifactRepository,
}

impl CommandFlowEngine {
    pub fn new(config: EngineConfig, artifacts: ArtifactRepository) -> Self {
        Self { config, artifacts }
    }

    fn command(&self, request: &FlowRequest, staging: &Path) -> Command {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .arg("--repo")
            .arg(&request.repo_url)
            .arg("--name")
            .arg(&request.repo_name)
            .arg("--output")
            .arg(staging)
            .arg("--max-size")
            .arg(request.max_file_size.to_string());
        if !request.include_patterns.is_empty() {
            cmd.arg("--include").args(&request.include_patterns);
        }
        if !request.exclude_patterns.is_empty() {
            cmd.arg("--exclude").args(&request.exclude_patterns);
        }

        cmd.env("GEMINI_API_KEY", &request.credentials.gen_key);
        match &request.credentials.source_token {
            Some(token) => cmd.env("GITHUB_TOKEN", token),
            None => cmd.env_remove("GITHUB_TOKEN"),
        };

        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    async fn run(&self, request: &FlowRequest, staging: &Path) -> Result<FlowOutcome> {
        tokio::fs::create_dir_all(staging)
            .await
            .with_context(|| format!("Failed to create staging dir {}", staging.display()))?;

        let output = self
            .command(request, staging)
            .output()
            .await
            .with_context(|| format!("Failed to execute '{}'", self.config.command))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            bail!(
                "engine exited with {}: {}",
                output.status,
                tail_lines(&stderr, STDERR_TAIL_LINES)
            );
        }

        let tutorial_dir = staging.join(&request.repo_name);
        if !tutorial_dir.is_dir() {
            bail!(
                "engine produced no output under {}",
                tutorial_dir.display()
            );
        }

        let files = collect_files(tutorial_dir).await?;
        let mut chapters = BTreeSet::new();
        for (relative, path) in &files {
            let body = tokio::fs::read(path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            self.artifacts
                .publish(&request.repo_name, relative, &body)
                .await
                .with_context(|| format!("Failed to publish {}/{}", request.repo_name, relative))?;

            if let Some((dir, _)) = relative.split_once('/') {
                if dir.starts_with("chapter_") {
                    chapters.insert(dir.to_string());
                }
            }
        }

        tracing::info!(
            repo = %request.repo_name,
            files = files.len(),
            chapters = chapters.len(),
            "published tutorial"
        );

        Ok(FlowOutcome {
            output_location: format!("{}/", request.repo_name),
            chapters: chapters.into_iter().collect(),
        })
    }
}

#[async_trait]
impl TutorialFlowEngine for CommandFlowEngine {
    async fn generate(&self, request: FlowRequest) -> Result<FlowOutcome> {
        let work_dir = &self.config.work_dir;
        tokio::fs::create_dir_all(work_dir)
            .await
            .with_context(|| format!("Failed to create work dir {}", work_dir.display()))?;

        // Removed on drop, including when the caller's deadline cancels us.
        let staging = tempfile::Builder::new()
            .prefix("job-")
            .tempdir_in(work_dir)
            .with_context(|| format!("Failed to create staging dir in {}", work_dir.display()))?;

        self.run(&request, staging.path()).await
    }
}

/// Regular files under `root` as `(relative key, absolute path)`, sorted.
async fn collect_files(root: PathBuf) -> Result<Vec<(String, PathBuf)>> {
    tokio::task::spawn_blocking(move || {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&root).follow_links(false) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&root)
                .with_context(|| format!("{} escaped {}", entry.path().display(), root.display()))?;
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push((key, entry.path().to_path_buf()));
        }
        files.sort();
        Ok::<_, anyhow::Error>(files)
    })
    .await?
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.trim().lines().collect();
    lines[lines.len().saturating_sub(n)..].join("\n")
}
