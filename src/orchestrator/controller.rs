//! Run lifecycle controller.
//!
//! Drives `Idle → Loading → Running → Draining → Shutdown` and races the
//! whole run against an interrupt future. An interrupt skips straight to
//! `Shutdown` and abandons in-flight work.

use crate::engine::queue;
use crate::engine::runner::CommandRunner;
use crate::engine::wordlist::{count_records, CommandGenerator};
use crate::engine::FuzzEngine;
use crate::model::{FuzzEvent, LifecycleState, RunConfig};
use anyhow::{bail, Context, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { dispatched: u64, stopped_early: bool },
    Interrupted,
}

/// Tracks the current lifecycle state and rejects illegal transitions.
#[derive(Debug)]
pub struct Lifecycle {
    state: LifecycleState,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self {
            state: LifecycleState::Idle,
        }
    }
}

impl Lifecycle {
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn advance(&mut self, next: LifecycleState) -> Result<()> {
        if !self.state.can_advance_to(next) {
            bail!("illegal lifecycle transition {:?} -> {:?}", self.state, next);
        }
        tracing::debug!(from = ?self.state, to = ?next, "lifecycle transition");
        self.state = next;
        Ok(())
    }
}

/// Run one fuzzing session to completion or interruption.
///
/// Wordlist errors surface before any worker is started. `event_tx` is
/// dropped on return, which lets the reporter finish.
pub async fn run_controller<F>(
    cfg: Arc<RunConfig>,
    runner: Arc<dyn CommandRunner>,
    event_tx: UnboundedSender<FuzzEvent>,
    interrupt: F,
) -> Result<RunOutcome>
where
    F: Future<Output = ()>,
{
    tokio::pin!(interrupt);
    let mut lifecycle = Lifecycle::default();

    lifecycle.advance(LifecycleState::Loading)?;
    let _ = event_tx.send(FuzzEvent::Loading);
    let path = cfg.wordlist.clone();
    let total = tokio::select! {
        counted = tokio::task::spawn_blocking(move || count_records(&path)) => {
            counted.context("line counter task failed")??
        }
        _ = &mut interrupt => {
            lifecycle.advance(LifecycleState::Shutdown)?;
            return Ok(RunOutcome::Interrupted);
        }
    };
    let generator = CommandGenerator::open(&cfg.wordlist, &cfg.template, cfg.sanitize)?;
    let _ = event_tx.send(FuzzEvent::Started { total });
    tracing::debug!(total, threads = cfg.threads, "wordlist loaded");

    lifecycle.advance(LifecycleState::Running)?;
    let engine = FuzzEngine::new(cfg.clone(), runner);
    let (queue_tx, queue_rx) = queue::bounded(cfg.threads);
    let pool = engine.spawn_pool(queue_rx.clone(), event_tx);
    tracing::debug!(workers = cfg.threads, "worker pool started");
    let producer = engine.spawn_producer(generator, queue_tx);

    let drained = async {
        let dispatched = producer.await.context("producer task failed")??;
        lifecycle.advance(LifecycleState::Draining)?;
        queue_rx.join().await;
        Ok::<u64, anyhow::Error>(dispatched)
    };

    let finished = tokio::select! {
        res = drained => Some(res),
        _ = &mut interrupt => None,
    };

    match finished {
        Some(Ok(dispatched)) => {
            let executed = pool.join().await;
            lifecycle.advance(LifecycleState::Shutdown)?;
            tracing::debug!(dispatched, executed, "run complete");
            Ok(RunOutcome::Completed {
                dispatched,
                stopped_early: engine.stopped(),
            })
        }
        Some(Err(e)) => {
            pool.abort().await;
            lifecycle.advance(LifecycleState::Shutdown)?;
            Err(e)
        }
        None => {
            pool.abort().await;
            lifecycle.advance(LifecycleState::Shutdown)?;
            tracing::debug!("run interrupted");
            Ok(RunOutcome::Interrupted)
        }
    }
}
