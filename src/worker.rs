//! Queue consumer that runs tutorial generation.
//!
//! Each message goes through two phases:
//!
//! 1. **Validation** ([`GenerationJob::from_payload`]): cheap and
//!    idempotent. Bad payloads are recorded and dropped.
//! 2. **Generation**: one call to the [`TutorialFlowEngine`] under a
//!    deadline. Failures and timeouts are recorded, never retried.
//!
//! Every message that reaches a handler is acknowledged afterwards, whatever
//! the outcome. Only a worker crash leaves a message on the queue, and such
//! a message is dropped once its delivery count passes the configured limit.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::sync::Semaphore;

use crate::config::Config;
use crate::engine::{EngineCredentials, FlowOutcome, FlowRequest, TutorialFlowEngine};
use crate::error_sink::ErrorSink;
use crate::jobs::GenerationJob;
use crate::models::ErrorRecord;
use crate::queue::{JobQueue, QueuedMessage};
use crate::repo_id::repo_name_from_url;

/// What happened to one message.
#[derive(Debug)]
pub enum JobOutcome {
    Completed(FlowOutcome),
    /// The payload failed validation.
    Rejected(ErrorRecord),
    /// The engine failed or timed out.
    Failed(ErrorRecord),
    /// Delivered too many times.
    Poisoned(ErrorRecord),
}

pub struct GenerationWorker {
    queue: Arc<dyn JobQueue>,
    engine: Arc<dyn TutorialFlowEngine>,
    errors: ErrorSink,
    engine_timeout: Duration,
    max_dequeue_count: u32,
    concurrency: usize,
    poll_interval: Duration,
}

impl GenerationWorker {
    pub fn new(
        config: &Config,
        queue: Arc<dyn JobQueue>,
        engine: Arc<dyn TutorialFlowEngine>,
        errors: ErrorSink,
    ) -> Self {
        Self {
            queue,
            engine,
            errors,
            engine_timeout: Duration::from_secs(config.worker.engine_timeout_secs),
            max_dequeue_count: config.queue.max_dequeue_count,
            concurrency: config.worker.concurrency.max(1),
            poll_interval: Duration::from_millis(config.worker.poll_interval_ms),
        }
    }

    /// Process one raw payload. Never fails; problems become error records.
    pub async fn handle_payload(&self, payload: &str) -> JobOutcome {
        let job = match GenerationJob::from_payload(payload) {
            Ok(job) => job,
            Err(e) => {
                tracing::warn!(error = %e, "rejected job payload");
                return JobOutcome::Rejected(self.errors.record(e.to_string()).await);
            }
        };

        let repo_name = repo_name_from_url(&job.repo_url);
        tracing::info!(repo = %repo_name, url = %job.repo_url, "starting tutorial generation");

        let request = FlowRequest {
            repo_url: job.repo_url.clone(),
            repo_name: repo_name.clone(),
            include_patterns: job.include_patterns,
            exclude_patterns: job.exclude_patterns,
            max_file_size: job.max_file_size,
            credentials: EngineCredentials {
                gen_key: job.gemini_key,
                source_token: job.github_token,
            },
        };

        match tokio::time::timeout(self.engine_timeout, self.engine.generate(request)).await {
            Ok(Ok(outcome)) => {
                tracing::info!(
                    repo = %repo_name,
                    output = %outcome.output_location,
                    chapters = outcome.chapters.len(),
                    "tutorial generated"
                );
                JobOutcome::Completed(outcome)
            }
            Ok(Err(e)) => {
                tracing::error!(repo = %repo_name, error = %format!("{:#}", e), "generation failed");
                let message = format!("Error during generation: {:#}", e);
                JobOutcome::Failed(self.errors.record(message).await)
            }
            Err(_) => {
                tracing::error!(repo = %repo_name, "generation timed out");
                let message = format!(
                    "Generation timed out after {}s for {}",
                    self.engine_timeout.as_secs(),
                    job.repo_url
                );
                JobOutcome::Failed(self.errors.record(message).await)
            }
        }
    }

    /// Process a leased message and acknowledge it.
    pub async fn handle_message(&self, message: QueuedMessage) -> Result<JobOutcome> {
        let outcome = if message.dequeue_count > self.max_dequeue_count {
            tracing::warn!(
                id = %message.id,
                deliveries = message.dequeue_count,
                "dropping poison message"
            );
            JobOutcome::Poisoned(
                self.errors
                    .record(format!(
                        "Dropped queue message {} after {} deliveries (repo_url: {})",
                        message.id,
                        message.dequeue_count,
                        payload_repo_url(&message.payload)
                    ))
                    .await,
            )
        } else {
            self.handle_payload(&message.payload).await
        };

        if !self.queue.ack(&message).await? {
            tracing::warn!(id = %message.id, "lease expired before acknowledgement");
        }
        Ok(outcome)
    }

    /// Poll the queue until `shutdown` resolves, running up to
    /// `worker.concurrency` jobs at once. In-flight jobs finish before this
    /// returns.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) -> Result<()> {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        tokio::pin!(shutdown);

        tracing::info!(concurrency = self.concurrency, "worker started");

        loop {
            let permit = tokio::select! {
                _ = &mut shutdown => break,
                permit = permits.clone().acquire_owned() => permit?,
            };

            let message = match self.queue.receive().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    drop(permit);
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.poll_interval) => continue,
                    }
                }
                Err(e) => {
                    drop(permit);
                    tracing::error!(error = %format!("{:#}", e), "queue receive failed");
                    self.errors
                        .record(format!("Queue receive failed: {:#}", e))
                        .await;
                    tokio::select! {
                        _ = &mut shutdown => break,
                        _ = tokio::time::sleep(self.poll_interval) => continue,
                    }
                }
            };

            let worker = self.clone();
            tokio::spawn(async move {
                let id = message.id.clone();
                if let Err(e) = worker.handle_message(message).await {
                    tracing::error!(id = %id, error = %format!("{:#}", e), "failed to acknowledge job");
                }
                drop(permit);
            });
        }

        tracing::info!("worker stopping, waiting for in-flight jobs");
        let _all = permits.acquire_many(self.concurrency as u32).await?;
        Ok(())
    }
}

/// The only payload field safe to write to the error log; the rest may
/// carry credentials.
fn payload_repo_url(payload: &str) -> String {
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| v.get("repo_url").and_then(|u| u.as_str()).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockTutorialFlowEngine;
    use crate::queue::SqliteJobQueue;
    use crate::store::memory::InMemoryObjectStore;
    use crate::store::ObjectStore;
    use async_trait::async_trait;
    use tempfile::TempDir;

    const VALID: &str = r#"{"gemini_key":"k","github_token":"t","repo_url":"https://github.com/acme/widget.git","include_patterns":"*.rs"}"#;

    struct Harness {
        _tmp: TempDir,
        config: Config,
        queue: Arc<SqliteJobQueue>,
        errors: Arc<InMemoryObjectStore>,
    }

    async fn harness() -> Harness {
        let tmp = TempDir::new().unwrap();
        let mut config = Config::minimal();
        config.db.path = tmp.path().join("queue.sqlite");
        config.worker.poll_interval_ms = 10;
        let queue = Arc::new(SqliteJobQueue::connect(&config).await.unwrap());
        Harness {
            _tmp: tmp,
            config,
            queue,
            errors: Arc::new(InMemoryObjectStore::new()),
        }
    }

    fn worker(h: &Harness, engine: impl TutorialFlowEngine + 'static) -> GenerationWorker {
        GenerationWorker::new(
            &h.config,
            h.queue.clone(),
            Arc::new(engine),
            ErrorSink::new(h.errors.clone()),
        )
    }

    async fn only_error(store: &InMemoryObjectStore) -> String {
        let listed = store.list("log-").await.unwrap();
        assert_eq!(listed.len(), 1);
        String::from_utf8(store.get(&listed[0].key).await.unwrap().unwrap()).unwrap()
    }

    #[tokio::test]
    async fn valid_job_reaches_engine_with_credentials() {
        let h = harness().await;
        let mut engine = MockTutorialFlowEngine::new();
        engine
            .expect_generate()
            .withf(|req| {
                req.repo_name == "widget"
                    && req.credentials.gen_key == "k"
                    && req.credentials.source_token.as_deref() == Some("t")
                    && req.include_patterns.contains("*.rs")
                    && req.max_file_size == 100_000
            })
            .times(1)
            .returning(|req| {
                Ok(FlowOutcome {
                    output_location: format!("{}/", req.repo_name),
                    chapters: vec!["chapter_1".into()],
                })
            });

        let outcome = worker(&h, engine).handle_payload(VALID).await;
        assert!(matches!(outcome, JobOutcome::Completed(ref o) if o.output_location == "widget/"));
        assert!(h.errors.is_empty());
    }

    #[tokio::test]
    async fn invalid_payloads_never_reach_engine() {
        let h = harness().await;
        let mut engine = MockTutorialFlowEngine::new();
        engine.expect_generate().times(0);
        let w = worker(&h, engine);

        let outcome = w.handle_payload("{not json").await;
        assert!(matches!(outcome, JobOutcome::Rejected(_)));
        assert!(only_error(&h.errors).await.starts_with("Invalid JSON in queue message:"));

        let h = harness().await;
        let mut engine = MockTutorialFlowEngine::new();
        engine.expect_generate().times(0);
        let w = worker(&h, engine);
        w.handle_payload(r#"{"gemini_key":"k"}"#).await;
        assert_eq!(
            only_error(&h.errors).await,
            "Missing required fields: gemini_key, repo_url."
        );
    }

    #[tokio::test]
    async fn engine_failure_is_recorded() {
        let h = harness().await;
        let mut engine = MockTutorialFlowEngine::new();
        engine
            .expect_generate()
            .returning(|_| Err(anyhow::anyhow!("model quota exhausted")));

        let outcome = worker(&h, engine).handle_payload(VALID).await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert_eq!(
            only_error(&h.errors).await,
            "Error during generation: model quota exhausted"
        );
    }

    struct SlowEngine;

    #[async_trait]
    impl TutorialFlowEngine for SlowEngine {
        async fn generate(&self, _request: FlowRequest) -> Result<FlowOutcome> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(FlowOutcome::default())
        }
    }

    #[tokio::test]
    async fn engine_timeout_is_recorded() {
        let h = harness().await;
        let mut w = worker(&h, SlowEngine);
        w.engine_timeout = Duration::from_millis(20);

        let outcome = w.handle_payload(VALID).await;
        assert!(matches!(outcome, JobOutcome::Failed(_)));
        assert_eq!(
            only_error(&h.errors).await,
            "Generation timed out after 0s for https://github.com/acme/widget.git"
        );
    }

    #[tokio::test]
    async fn messages_are_acknowledged_after_failure() {
        let h = harness().await;
        let mut engine = MockTutorialFlowEngine::new();
        engine
            .expect_generate()
            .returning(|_| Err(anyhow::anyhow!("boom")));
        let w = worker(&h, engine);

        h.queue.send(VALID).await.unwrap();
        let message = h.queue.receive().await.unwrap().unwrap();
        w.handle_message(message).await.unwrap();
        assert_eq!(h.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn poison_messages_are_dropped() {
        let h = harness().await;
        let mut engine = MockTutorialFlowEngine::new();
        engine.expect_generate().times(0);
        let mut w = worker(&h, engine);
        w.max_dequeue_count = 1;

        h.queue.send(VALID).await.unwrap();
        let mut message = h.queue.receive().await.unwrap().unwrap();
        message.dequeue_count = 2;

        let outcome = w.handle_message(message).await.unwrap();
        assert!(matches!(outcome, JobOutcome::Poisoned(_)));
        assert_eq!(h.queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn poison_record_omits_credentials() {
        let h = harness().await;
        let mut engine = MockTutorialFlowEngine::new();
        engine.expect_generate().times(0);
        let mut w = worker(&h, engine);
        w.max_dequeue_count = 1;

        h.queue
            .send(r#"{"gemini_key":"SECRET-GEMINI","github_token":"SECRET-GH","repo_url":"https://github.com/acme/widget"}"#)
            .await
            .unwrap();
        let mut message = h.queue.receive().await.unwrap().unwrap();
        message.dequeue_count = 2;
        w.handle_message(message).await.unwrap();

        let record = only_error(&h.errors).await;
        assert!(!record.contains("SECRET-GEMINI"), "{record}");
        assert!(!record.contains("SECRET-GH"), "{record}");
        assert!(record.contains("after 2 deliveries"));
        assert!(record.contains("https://github.com/acme/widget"));
    }

    #[tokio::test]
    async fn run_drains_queue_then_stops() {
        let h = harness().await;
        let mut engine = MockTutorialFlowEngine::new();
        engine
            .expect_generate()
            .times(3)
            .returning(|_| Ok(FlowOutcome::default()));
        let w = Arc::new(worker(&h, engine));

        for _ in 0..3 {
            h.queue.send(VALID).await.unwrap();
        }

        let queue = h.queue.clone();
        let shutdown = async move {
            while queue.len().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(10), w.run(shutdown))
            .await
            .expect("worker did not stop")
            .unwrap();
        assert!(h.errors.is_empty());
    }
}
