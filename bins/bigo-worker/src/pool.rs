/// Worker Pool
///
/// Pops submission ids off the queue and runs the pipeline for each one on
/// its own task, at most `concurrency` at a time.
///
/// **Shutdown:**
/// The blocking pop uses a short timeout so the shutdown flag is observed
/// between polls; a pop is never cancelled mid-flight, so no id is lost.
/// In-flight tasks are drained before `run` returns.

use bigo_common::redis::publish_completion;
use bigo_common::types::CompletionEvent;
use bigo_common::SubmissionQueue;
use redis::aio::ConnectionManager;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::pipeline::{Pipeline, ProcessOutcome};

type TaskResult = (Uuid, Result<ProcessOutcome, PipelineError>, Duration);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    pub finished: u64,
    pub skipped: u64,
    pub errors: u64,
    pub panics: u64,
}

pub struct WorkerPool {
    pipeline: Arc<Pipeline>,
    queue: Arc<dyn SubmissionQueue>,
    concurrency: usize,
    poll_timeout: Duration,
    events: Option<ConnectionManager>,
    stats: PoolStats,
}

impl WorkerPool {
    pub fn new(pipeline: Arc<Pipeline>, queue: Arc<dyn SubmissionQueue>, concurrency: usize) -> Self {
        Self {
            pipeline,
            queue,
            concurrency: concurrency.max(1),
            poll_timeout: Duration::from_secs(5),
            events: None,
            stats: PoolStats::default(),
        }
    }

    /// Publish a completion event for every finished submission
    pub fn with_events(mut self, conn: ConnectionManager) -> Self {
        self.events = Some(conn);
        self
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> PoolStats {
        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut tasks: JoinSet<TaskResult> = JoinSet::new();

        info!(concurrency = self.concurrency, "Worker pool started");

        loop {
            while let Some(result) = tasks.try_join_next() {
                self.record(result).await;
            }
            if *shutdown.borrow() {
                break;
            }

            let permit = tokio::select! {
                permit = permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown.changed() => break,
            };

            match self.queue.dequeue(self.poll_timeout).await {
                Ok(Some(id)) => {
                    debug!(submission_id = %id, "Dequeued submission");
                    let pipeline = self.pipeline.clone();
                    tasks.spawn(async move {
                        let _permit = permit;
                        let started = Instant::now();
                        let result = pipeline.process(id).await;
                        (id, result, started.elapsed())
                    });
                }
                // Timeout: loop around to check for shutdown
                Ok(None) => continue,
                Err(e) => {
                    error!(error = %e, "Queue error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }

        info!(in_flight = tasks.len(), "Draining worker pool");
        while let Some(result) = tasks.join_next().await {
            self.record(result).await;
        }
        info!(stats = ?self.stats, "Worker pool stopped");
        self.stats
    }

    async fn record(&mut self, result: Result<TaskResult, JoinError>) {
        match result {
            Ok((id, Ok(ProcessOutcome::Finished { status, language }), elapsed)) => {
                self.stats.finished += 1;
                info!(
                    submission_id = %id,
                    %status,
                    %language,
                    duration_ms = elapsed.as_millis() as u64,
                    "Task finished"
                );
                if let Some(conn) = self.events.as_mut() {
                    let event = CompletionEvent {
                        submission_id: id,
                        language,
                        status,
                        duration_ms: elapsed.as_secs_f64() * 1000.0,
                    };
                    if let Err(e) = publish_completion(conn, &event).await {
                        warn!(submission_id = %id, error = %e, "Failed to publish completion");
                    }
                }
            }
            Ok((id, Ok(outcome), _)) => {
                self.stats.skipped += 1;
                debug!(submission_id = %id, ?outcome, "Task skipped");
            }
            Ok((id, Err(e), _)) => {
                self.stats.errors += 1;
                error!(submission_id = %id, error = %e, "Task failed");
            }
            Err(e) => {
                self.stats.panics += 1;
                error!(error = %e, "Worker task panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::WrapperCache;
    use crate::pipeline::PipelineDeps;
    use crate::testing::{cache_config, CountingGenerator, FakeEngine, StaticExplainer};
    use crate::transformer::CodeTransformer;
    use bigo_common::{
        LanguageRegistry, MemoryQueue, MemoryStore, NewSubmission, Submission, SubmissionStatus,
        SubmissionStore,
    };

    fn pipeline(store: Arc<MemoryStore>) -> Arc<Pipeline> {
        let generator = Arc::new(CountingGenerator::new());
        Arc::new(Pipeline::new(PipelineDeps {
            submissions: store.clone(),
            engine: Arc::new(FakeEngine::with_stdout("SMALL: 0.001\nMEDIUM: 0.002\nLARGE: 0.004\n")),
            cache: WrapperCache::new(store, generator.clone(), cache_config()),
            transformer: CodeTransformer::new(generator),
            explainer: Arc::new(StaticExplainer),
            registry: Arc::new(LanguageRegistry::builtin()),
            run_lock_ttl: Duration::from_secs(30),
        }))
    }

    #[tokio::test]
    async fn test_pool_processes_queue_and_drains() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());

        let mut ids = Vec::new();
        for _ in 0..4 {
            let submission = Submission::create(NewSubmission {
                code: "class Solution:\n    def solve(self, n: int):\n        return n\n".to_string(),
                language: "python".to_string(),
                mode: None,
                input: None,
            });
            let id = store.insert_submission(&submission).await.unwrap();
            queue.enqueue(id).await.unwrap();
            ids.push(id);
        }
        // Unknown ids are reported, not fatal
        queue.enqueue(Uuid::new_v4()).await.unwrap();

        let (tx, rx) = watch::channel(false);
        let pool = WorkerPool::new(pipeline(store.clone()), queue.clone(), 2)
            .with_poll_timeout(Duration::from_millis(20));
        let handle = tokio::spawn(pool.run(rx));

        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            let done = store.list_submissions(&ids).await.unwrap();
            if done.iter().all(|s| s.status == SubmissionStatus::Completed) && queue.depth().await.unwrap() == 0 {
                break;
            }
            assert!(Instant::now() < deadline, "pool did not finish in time");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        tx.send(true).unwrap();
        let stats = handle.await.unwrap();
        assert_eq!(stats.finished, 4);
        assert_eq!(stats.errors, 1);
        assert_eq!(stats.panics, 0);
    }

    #[tokio::test]
    async fn test_pool_stops_when_idle() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryQueue::new());
        let (tx, rx) = watch::channel(false);

        let pool = WorkerPool::new(pipeline(store), queue, 1).with_poll_timeout(Duration::from_millis(10));
        let handle = tokio::spawn(pool.run(rx));
        tx.send(true).unwrap();

        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stats, PoolStats::default());
    }
}
