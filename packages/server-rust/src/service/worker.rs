//! Periodic worker tasks.
//!
//! A [`PeriodicWorker`] owns one spawned task that alternates between
//! on-demand requests and a fixed-interval tick. The outbox relay runs on it:
//! ticks sweep entries past their grace interval, requests force a sweep.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

/// Work driven by a [`PeriodicWorker`].
#[async_trait]
pub trait PeriodicTask: Send + 'static {
    type Request: Send + 'static;

    /// Handles one request submitted through [`PeriodicWorker::submit`].
    async fn handle(&mut self, request: Self::Request);

    /// Runs once per interval. The first tick fires one full interval after
    /// start.
    async fn tick(&mut self);

    /// Runs once after the loop exits.
    async fn finish(&mut self) {}
}

/// How a worker is started.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Label used in logs.
    pub name: &'static str,
    pub interval: Duration,
    /// Requests that may wait before `submit` blocks.
    pub queue_depth: usize,
}

impl WorkerConfig {
    #[must_use]
    pub fn new(name: &'static str, interval: Duration) -> Self {
        Self {
            name,
            interval,
            queue_depth: 64,
        }
    }
}

/// Errors from submitting to a worker.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker {0} has been stopped")]
    Stopped(&'static str),
    #[error("worker {0} exited")]
    Exited(&'static str),
}

/// Handle to a spawned periodic task.
pub struct PeriodicWorker<T: PeriodicTask> {
    name: &'static str,
    requests: Option<mpsc::Sender<T::Request>>,
    stop: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
}

impl<T: PeriodicTask> PeriodicWorker<T> {
    /// Spawns `task` on the current runtime.
    pub fn spawn(mut task: T, config: WorkerConfig) -> Self {
        let WorkerConfig {
            name,
            interval,
            queue_depth,
        } = config;
        let (requests, mut inbox) = mpsc::channel(queue_depth.max(1));
        let (stop, mut stopped) = watch::channel(false);
        let period = interval.max(Duration::from_millis(1));

        let join = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = stopped.changed() => break,
                    request = inbox.recv() => match request {
                        Some(request) => task.handle(request).await,
                        None => break,
                    },
                    _ = ticks.tick() => task.tick().await,
                }
            }
            task.finish().await;
            debug!(worker = name, "worker loop exited");
        });

        Self {
            name,
            requests: Some(requests),
            stop,
            join: Some(join),
        }
    }

    /// Queues a request, waiting for room if the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] once the worker is stopped or its loop has
    /// exited.
    pub async fn submit(&self, request: T::Request) -> Result<(), WorkerError> {
        let sender = self
            .requests
            .as_ref()
            .ok_or(WorkerError::Stopped(self.name))?;
        sender
            .send(request)
            .await
            .map_err(|_| WorkerError::Exited(self.name))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.requests.as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Signals the loop to exit and waits for `finish` to complete.
    pub async fn stop(&mut self) {
        self.requests = None;
        let _ = self.stop.send(true);
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(worker = self.name, error = %e, "worker task ended abnormally");
            }
        }
    }
}
