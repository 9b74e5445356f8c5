//! # Codebase Tutor CLI (`tutor`)
//!
//! ## Usage
//!
//! ```bash
//! tutor --config ./config/tutor.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `tutor init` | Create the queue database |
//! | `tutor serve` | Start the HTTP server only |
//! | `tutor worker` | Consume generation jobs only |
//! | `tutor run` | HTTP server and worker in one process |
//! | `tutor patterns <repo_url>` | Print pattern suggestions for a GitHub repo |
//! | `tutor structure <repo_name>` | Print a tutorial's chapter tree |
//! | `tutor content <repo_name> <path>` | Print one tutorial file |

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use codebase_tutor::artifacts::ArtifactRepository;
use codebase_tutor::config::{self, Config};
use codebase_tutor::engine::CommandFlowEngine;
use codebase_tutor::error_sink::ErrorSink;
use codebase_tutor::github::{parse_github_url, GithubClient};
use codebase_tutor::migrate;
use codebase_tutor::patterns::suggest_patterns;
use codebase_tutor::queue::{JobQueue, SqliteJobQueue};
use codebase_tutor::server::{self, AppState};
use codebase_tutor::store::open_store;
use codebase_tutor::worker::GenerationWorker;

/// Codebase Tutor: generate and serve tutorials for source repositories.
#[derive(Parser)]
#[command(name = "tutor", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/tutor.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the queue database. Idempotent.
    Init,

    /// Start the HTTP server.
    Serve,

    /// Consume generation jobs from the queue.
    Worker,

    /// Run the HTTP server and a worker in one process.
    ///
    /// Required when `storage.backend = "memory"`, since both sides must
    /// share the same store.
    Run,

    /// Suggest include/exclude patterns for a GitHub repository.
    Patterns {
        repo_url: String,

        /// GitHub token for private repositories or higher rate limits.
        #[arg(long, env = "GITHUB_TOKEN")]
        token: Option<String>,
    },

    /// Print the chapter/lesson tree of a generated tutorial.
    Structure { repo_name: String },

    /// Print one file of a generated tutorial.
    Content { repo_name: String, path: String },
}

/// Handles opened once and shared by the server and the worker.
struct Runtime {
    queue: Arc<dyn JobQueue>,
    artifacts: ArtifactRepository,
    errors: ErrorSink,
}

impl Runtime {
    async fn open(cfg: &Config) -> anyhow::Result<Self> {
        let queue = SqliteJobQueue::connect(cfg).await?;
        Ok(Self {
            queue: Arc::new(queue),
            artifacts: ArtifactRepository::new(open_store(cfg, &cfg.storage.artifacts_namespace)?),
            errors: ErrorSink::new(open_store(cfg, &cfg.storage.errors_namespace)?),
        })
    }

    fn worker(&self, cfg: &Config) -> Arc<GenerationWorker> {
        let engine = CommandFlowEngine::new(cfg.engine.clone(), self.artifacts.clone());
        Arc::new(GenerationWorker::new(
            cfg,
            self.queue.clone(),
            Arc::new(engine),
            self.errors.clone(),
        ))
    }

    fn app_state(&self, cfg: &Config) -> anyhow::Result<AppState> {
        Ok(AppState::new(
            self.queue.clone(),
            self.artifacts.clone(),
            self.errors.clone(),
            Arc::new(GithubClient::new(&cfg.github)?),
        ))
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Queue database initialized at {}.", cfg.db.path.display());
        }
        Commands::Serve => {
            let runtime = Runtime::open(&cfg).await?;
            server::serve(&cfg, runtime.app_state(&cfg)?, shutdown_signal()).await?;
        }
        Commands::Worker => {
            let runtime = Runtime::open(&cfg).await?;
            runtime.worker(&cfg).run(shutdown_signal()).await?;
        }
        Commands::Run => {
            let runtime = Runtime::open(&cfg).await?;
            let worker = runtime.worker(&cfg);
            let state = runtime.app_state(&cfg)?;

            let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
            let worker_task = tokio::spawn(async move {
                let mut stop_rx = stop_rx;
                worker
                    .run(async move {
                        let _ = stop_rx.changed().await;
                    })
                    .await
            });

            let served = server::serve(&cfg, state, shutdown_signal()).await;
            let _ = stop_tx.send(true);
            worker_task.await??;
            served?;
        }
        Commands::Patterns { repo_url, token } => {
            let slug = parse_github_url(&repo_url)?;
            let github = GithubClient::new(&cfg.github)?;
            let files = github.list_files(&slug, token.as_deref()).await?;
            let patterns = suggest_patterns(&files);
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "patterns": patterns,
                    "file_count": files.len(),
                }))?
            );
        }
        Commands::Structure { repo_name } => {
            let artifacts =
                ArtifactRepository::new(open_store(&cfg, &cfg.storage.artifacts_namespace)?);
            let tree = artifacts.structure(&repo_name).await?;
            println!("{}", serde_json::to_string_pretty(&tree)?);
        }
        Commands::Content { repo_name, path } => {
            let artifacts =
                ArtifactRepository::new(open_store(&cfg, &cfg.storage.artifacts_namespace)?);
            print!("{}", artifacts.content(&repo_name, &path).await?);
        }
    }

    Ok(())
}
