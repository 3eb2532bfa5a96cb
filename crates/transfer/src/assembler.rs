//! Bounded assembly pipeline.
//!
//! ```text
//!  post() ──► work queue ──► merge worker × N ──► result queue ──► notifier ──► callback
//! ```
//!
//! Workers share the work queue receiver. Each worker owns a clone of the
//! result sender and the pipeline keeps none, so the result queue closes
//! exactly when the last worker exits; the notifier then drains what is left
//! and stops. `stop()` only closes the work queue: queued tasks are still
//! merged and notified.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::{AssemblerConfig, AssemblerError, AssemblyTask};

type WorkQueue<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<AssemblyTask<T>>>>;

/// Runs merge workers and the completion notifier.
pub struct Assembler<T = ()> {
    config: AssemblerConfig,
    state: Mutex<PipelineState<T>>,
}

struct PipelineState<T> {
    /// Sender of the running generation; `None` while stopped.
    work_tx: Option<mpsc::Sender<AssemblyTask<T>>>,
    /// Workers and notifier of the running generation.
    running: Vec<JoinHandle<()>>,
    /// Workers and notifiers of stopped generations still draining.
    draining: Vec<JoinHandle<()>>,
}

impl<T: Send + 'static> Assembler<T> {
    /// Creates a stopped assembler.
    pub fn new(config: AssemblerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(PipelineState {
                work_tx: None,
                running: Vec::new(),
                draining: Vec::new(),
            }),
        }
    }

    /// Starts the workers and the notifier on the current tokio runtime.
    ///
    /// Does nothing if already running.
    pub fn start(&self) -> Result<(), AssemblerError<T>> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.work_tx.is_some() {
            return Ok(());
        }

        let runtime = Handle::try_current().map_err(|_| AssemblerError::NoRuntime)?;

        let workers = self.config.workers.max(1);
        let (work_tx, work_rx) = mpsc::channel(self.config.queue_capacity.max(1));
        let (result_tx, result_rx) = mpsc::channel(self.config.result_capacity.max(1));
        let work_rx: WorkQueue<T> = Arc::new(tokio::sync::Mutex::new(work_rx));

        for worker in 0..workers {
            state.running.push(runtime.spawn(run_worker(
                worker,
                Arc::clone(&work_rx),
                result_tx.clone(),
            )));
        }
        // Only the workers may keep the result queue open.
        drop(result_tx);
        state.running.push(runtime.spawn(run_notifier(result_rx)));

        state.work_tx = Some(work_tx);
        info!(workers, "assembler started");
        Ok(())
    }

    /// Closes the work queue. Queued and in-flight tasks still complete.
    ///
    /// Does nothing if already stopped. Call [`join`](Self::join) to wait
    /// for the queued tasks to be notified.
    pub fn stop(&self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(work_tx) = state.work_tx.take() else {
            return;
        };
        drop(work_tx);

        let running = std::mem::take(&mut state.running);
        state.draining.extend(running);
        info!("assembler stopped, draining queued tasks");
    }

    /// Returns `true` between [`start`](Self::start) and [`stop`](Self::stop).
    pub fn is_running(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.work_tx.is_some()
    }

    /// Submits a task, waiting for room in the work queue.
    ///
    /// Fails, handing the task back, if the assembler is stopped or the
    /// task's session is not complete.
    pub async fn post(&self, task: AssemblyTask<T>) -> Result<(), AssemblerError<T>> {
        if !task.session().is_complete() {
            return Err(AssemblerError::Incomplete(task));
        }

        let work_tx = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            match &state.work_tx {
                Some(tx) => tx.clone(),
                None => return Err(AssemblerError::Stopped(task)),
            }
        };

        debug!(session = task.session().id(), "assembly task queued");
        work_tx
            .send(task)
            .await
            .map_err(|e| AssemblerError::Stopped(e.0))
    }

    /// Waits until every stopped generation has drained and notified.
    ///
    /// Returns immediately for a generation that is still running; stop it
    /// first.
    pub async fn join(&self) {
        let draining = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut state.draining)
        };

        for handle in draining {
            if let Err(e) = handle.await {
                error!(error = %e, "assembler task ended abnormally");
            }
        }
    }
}

async fn run_worker<T: Send + 'static>(
    worker: usize,
    queue: WorkQueue<T>,
    results: mpsc::Sender<AssemblyTask<T>>,
) {
    debug!(worker, "merge worker started");

    loop {
        // Idle workers wait here; the lock is only held while receiving.
        let next = queue.lock().await.recv().await;
        let Some(mut task) = next else {
            break;
        };

        task.run().await;

        if let Err(e) = results.send(task).await {
            error!(
                worker,
                session = e.0.session().id(),
                "result queue closed, outcome dropped"
            );
        }
    }

    debug!(worker, "merge worker exiting");
}

async fn run_notifier<T: Send + 'static>(mut results: mpsc::Receiver<AssemblyTask<T>>) {
    while let Some(task) = results.recv().await {
        let session = task.session().id().to_string();
        if std::panic::catch_unwind(AssertUnwindSafe(|| task.notify())).is_err() {
            error!(session, "completion callback panicked");
        }
    }

    debug!("result queue closed, notifier exiting");
}
