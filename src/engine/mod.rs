pub mod queue;
pub mod runner;
pub mod wordlist;

use crate::error::FuzzError;
use crate::model::{ExecutionResult, FuzzEvent, RunConfig, SubstitutedCommand};
use crate::report::{classify, ReportPolicy};
use queue::{QueueReceiver, QueueSender};
use runner::CommandRunner;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// Owns the worker pool configuration and the stop flag shared between
/// workers and the producer.
pub struct FuzzEngine {
    cfg: Arc<RunConfig>,
    runner: Arc<dyn CommandRunner>,
    stop: Arc<AtomicBool>,
}

/// Handle over the running workers.
pub struct WorkerPool {
    workers: JoinSet<u64>,
}

impl FuzzEngine {
    pub fn new(cfg: Arc<RunConfig>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            cfg,
            runner,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether dispatching was stopped early (first match with stop-on-match,
    /// or the reporter went away).
    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    /// Start exactly `threads` workers pulling from `queue`.
    pub fn spawn_pool(
        &self,
        queue: QueueReceiver<SubstitutedCommand>,
        event_tx: mpsc::UnboundedSender<FuzzEvent>,
    ) -> WorkerPool {
        let policy = Arc::new(ReportPolicy::from_config(&self.cfg));
        let mut workers = JoinSet::new();
        for id in 0..self.cfg.threads.max(1) {
            workers.spawn(worker_loop(Worker {
                id,
                queue: queue.clone(),
                runner: self.runner.clone(),
                policy: policy.clone(),
                event_tx: event_tx.clone(),
                stop: self.stop.clone(),
                stop_on_match: self.cfg.stop_on_match,
            }));
        }
        WorkerPool { workers }
    }

    /// Feed every generated command into the queue from a blocking task.
    ///
    /// Resolves with the number of commands dispatched once the generator is
    /// exhausted or dispatching was stopped. Dropping the sender at the end
    /// closes the queue.
    pub fn spawn_producer<I>(
        &self,
        commands: I,
        queue: QueueSender<SubstitutedCommand>,
    ) -> JoinHandle<Result<u64, FuzzError>>
    where
        I: Iterator<Item = Result<SubstitutedCommand, FuzzError>> + Send + 'static,
    {
        let stop = self.stop.clone();
        tokio::task::spawn_blocking(move || {
            let mut dispatched = 0u64;
            for cmd in commands {
                if stop.load(Ordering::Relaxed) {
                    tracing::debug!(dispatched, "dispatch stopped early");
                    break;
                }
                if queue.enqueue_blocking(cmd?).is_err() {
                    tracing::debug!(dispatched, "work queue closed, producer exiting");
                    break;
                }
                dispatched += 1;
            }
            Ok(dispatched)
        })
    }
}

impl WorkerPool {
    /// Wait for every worker to observe the closed queue and exit.
    ///
    /// Returns the number of commands executed across all workers.
    pub async fn join(mut self) -> u64 {
        let mut executed = 0;
        while let Some(res) = self.workers.join_next().await {
            match res {
                Ok(n) => executed += n,
                Err(e) => tracing::error!(error = %e, "worker task failed"),
            }
        }
        executed
    }

    /// Cancel all workers, dropping (and killing) in-flight commands.
    pub async fn abort(mut self) {
        self.workers.abort_all();
        while self.workers.join_next().await.is_some() {}
    }
}

struct Worker {
    id: usize,
    queue: QueueReceiver<SubstitutedCommand>,
    runner: Arc<dyn CommandRunner>,
    policy: Arc<ReportPolicy>,
    event_tx: mpsc::UnboundedSender<FuzzEvent>,
    stop: Arc<AtomicBool>,
    stop_on_match: bool,
}

async fn worker_loop(w: Worker) -> u64 {
    tracing::debug!(worker = w.id, "worker started");
    let mut executed = 0u64;
    while let Some(cmd) = w.queue.dequeue().await {
        if w.event_tx.is_closed() {
            // Reporter is gone: drain without executing.
            w.stop.store(true, Ordering::Relaxed);
            w.queue.task_done();
            continue;
        }
        let _ = w.event_tx.send(FuzzEvent::Executing(cmd.clone()));

        let out = w.runner.run(&cmd.command).await;
        let completion = classify(
            ExecutionResult {
                command: cmd,
                stdout: out.stdout,
                stderr: out.stderr,
                status: out.status,
            },
            &w.policy,
        );
        if w.stop_on_match && completion.is_match() {
            w.stop.store(true, Ordering::Relaxed);
        }
        let _ = w.event_tx.send(FuzzEvent::Completed(completion));

        executed += 1;
        w.queue.task_done();
    }
    tracing::debug!(worker = w.id, executed, "worker finished");
    executed
}
