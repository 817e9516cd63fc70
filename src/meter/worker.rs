//! Bounded background queue for trace and rollup writes.

use std::path::PathBuf;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{MeterError, Result};
use crate::rollup::{RollupStore, RollupTurnEntry};
use crate::trace::{TraceDump, TraceDumpRecord};

/// Work handed to the persistence worker.
#[derive(Debug)]
pub(crate) enum PersistJob {
    Trace {
        path: PathBuf,
        record: Box<TraceDumpRecord>,
    },
    Rollup {
        chat_id: Option<String>,
        entry: RollupTurnEntry,
    },
    Flush(oneshot::Sender<()>),
}

impl PersistJob {
    fn label(&self) -> &'static str {
        match self {
            Self::Trace { .. } => "trace",
            Self::Rollup { .. } => "rollup",
            Self::Flush(_) => "flush",
        }
    }

    fn execute(self, trace: &TraceDump, rollup: &RollupStore) -> Result<()> {
        match self {
            Self::Trace { path, record } => {
                trace.write(&path, &record)?;
                debug!(run_id = %record.run_id, path = %path.display(), "trace dump written");
                Ok(())
            }
            Self::Rollup { chat_id, entry } => {
                rollup.append(chat_id.as_deref(), entry)?;
                Ok(())
            }
            Self::Flush(ack) => {
                let _ = ack.send(());
                Ok(())
            }
        }
    }
}

/// Sending side of the persistence queue. Dropping it lets the worker
/// drain what is already queued and exit.
#[derive(Debug, Clone)]
pub(crate) struct PersistenceQueue {
    tx: mpsc::Sender<PersistJob>,
}

impl PersistenceQueue {
    /// Spawn the worker on `runtime` and return the queue feeding it.
    pub(crate) fn spawn(
        runtime: &tokio::runtime::Handle,
        capacity: usize,
        trace: TraceDump,
        rollup: RollupStore,
    ) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let handle = runtime.spawn(run_worker(rx, trace, rollup));
        (Self { tx }, handle)
    }

    /// Queue `job` without waiting. Returns `false` if it was dropped.
    pub(crate) fn enqueue(&self, job: PersistJob) -> bool {
        match self.tx.try_send(job) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(job)) => {
                warn!(job = job.label(), "persistence queue full, dropping job");
                false
            }
            Err(mpsc::error::TrySendError::Closed(job)) => {
                warn!(job = job.label(), "persistence queue closed, dropping job");
                false
            }
        }
    }

    /// Wait until every job queued before this call has been processed.
    pub(crate) async fn flush(&self) -> Result<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.tx
            .send(PersistJob::Flush(ack_tx))
            .await
            .map_err(|_| MeterError::QueueClosed)?;
        ack_rx.await.map_err(|_| MeterError::QueueClosed)
    }
}

async fn run_worker(mut rx: mpsc::Receiver<PersistJob>, trace: TraceDump, rollup: RollupStore) {
    while let Some(job) = rx.recv().await {
        if let PersistJob::Flush(ack) = job {
            let _ = ack.send(());
            continue;
        }

        let label = job.label();
        let trace = trace.clone();
        let rollup = rollup.clone();
        let outcome = tokio::task::spawn_blocking(move || job.execute(&trace, &rollup)).await;

        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                warn!(job = label, error = %err, transient = err.is_transient(), "persistence failed");
            }
            Err(join_err) => {
                warn!(job = label, error = %join_err, "persistence task panicked");
            }
        }
    }
    debug!("persistence worker stopped");
}
