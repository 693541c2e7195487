//! [`Archiver`] – background episodic writes.
//!
//! Accepted answers are written to the episodic log off the turn's critical
//! path.  Jobs travel over a bounded channel to a single worker task; the
//! sender never waits, so a stalled vector store can delay archival but never
//! a reply.
//!
//! Writes are best effort: a failed write is logged and dropped, and a job
//! that finds the queue full is discarded with a warning.

use std::sync::Arc;

use memos_memory::archival::ArchivalStore;
use memos_types::Role;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default number of pending jobs before new ones are dropped.
pub const DEFAULT_ARCHIVE_QUEUE: usize = 64;

#[derive(Debug)]
struct ArchiveJob {
    answer: String,
    turn: u64,
}

/// Handle to the archival worker.
pub struct Archiver {
    tx: mpsc::Sender<ArchiveJob>,
    worker: JoinHandle<()>,
}

impl Archiver {
    /// Spawn the worker on the current Tokio runtime.
    pub fn spawn(store: Arc<ArchivalStore>, queue_capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<ArchiveJob>(queue_capacity.max(1));
        let worker = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let content = format!("Bot: {}", job.answer);
                match store.add_memory(&content, Role::Assistant, job.turn).await {
                    Ok(id) => debug!(id = %id, turn = job.turn, "answer archived"),
                    Err(e) => warn!(turn = job.turn, error = %e, "background archival failed"),
                }
            }
        });
        Self { tx, worker }
    }

    /// Queue `answer` for archival under `turn` without waiting.
    pub fn submit(&self, answer: impl Into<String>, turn: u64) {
        let job = ArchiveJob {
            answer: answer.into(),
            turn,
        };
        match self.tx.try_send(job) {
            Ok(()) => {}
            Err(TrySendError::Full(job)) => {
                warn!(turn = job.turn, "archive queue full; dropping answer");
            }
            Err(TrySendError::Closed(job)) => {
                warn!(turn = job.turn, "archive worker stopped; dropping answer");
            }
        }
    }

    /// Close the queue and wait until every pending job has been written.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            warn!(error = %e, "archive worker terminated abnormally");
        }
    }
}
