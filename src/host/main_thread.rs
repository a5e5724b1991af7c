//! Single-threaded main-loop job queue.
//!
//! The host mutates game state from one logical thread. Work that must
//! touch host state from elsewhere is posted here as a job and executed
//! when the host drains the queue from its main thread.

use std::panic::{self, AssertUnwindSafe};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

/// A unit of work executed on the host main thread.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Errors returned when handing work to the main thread.
#[derive(Debug, thiserror::Error)]
pub enum MainThreadError {
    /// The main loop has been dropped.
    #[error("main loop is no longer running")]
    Closed,
    /// The job panicked on the main thread.
    #[error("main-thread job panicked")]
    Panicked,
}

/// Cloneable handle used to post jobs onto the main loop.
#[derive(Debug, Clone)]
pub struct MainThread {
    tx: mpsc::UnboundedSender<Job>,
}

impl MainThread {
    /// Post a job. Returns `false` when the main loop is gone.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }

    /// Run `f` on the main thread and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns [`MainThreadError::Closed`] when the loop is gone or drops the
    /// job, and [`MainThreadError::Panicked`] when `f` panics.
    pub async fn run<T, F>(&self, f: F) -> Result<T, MainThreadError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let posted = self.post(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(f));
            let _ = reply_tx.send(outcome.map_err(|_| MainThreadError::Panicked));
        });
        if !posted {
            return Err(MainThreadError::Closed);
        }
        reply_rx.await.map_err(|_| MainThreadError::Closed)?
    }
}

/// Receiving side of the queue, owned by the host main thread.
pub struct MainLoop {
    rx: mpsc::UnboundedReceiver<Job>,
}

impl std::fmt::Debug for MainLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MainLoop").finish_non_exhaustive()
    }
}

impl MainLoop {
    /// Create a connected handle/loop pair.
    pub fn channel() -> (MainThread, MainLoop) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MainThread { tx }, MainLoop { rx })
    }

    /// Execute every queued job without waiting. Returns the number run.
    ///
    /// Intended to be called once per host frame.
    pub fn drain(&mut self) -> usize {
        let mut ran: usize = 0;
        while let Ok(job) = self.rx.try_recv() {
            run_job(job);
            ran = ran.saturating_add(1);
        }
        ran
    }

    /// Execute jobs as they arrive until every [`MainThread`] handle is dropped.
    pub async fn run(mut self) {
        while let Some(job) = self.rx.recv().await {
            run_job(job);
        }
        debug!("main loop closed");
    }
}

fn run_job(job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("main-thread job panicked");
    }
}
