//! Start/stop control for one named background task.

use futures::FutureExt;
use parking_lot::Mutex;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Stopped = 0,
    Running = 1,
    Stopping = 2,
}

impl From<u8> for Status {
    fn from(x: u8) -> Self {
        match x {
            1 => Status::Running,
            2 => Status::Stopping,
            _ => Status::Stopped,
        }
    }
}

/// Why `stop` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The task had already returned on its own (or never ran).
    Finished,
    /// The task observed its token and returned within the timeout.
    Cancelled,
    /// The task ignored its token and was aborted.
    Timeout,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("task '{0}' already started")]
    AlreadyStarted(String),
}

struct Running {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Owns at most one spawned task at a time.
///
/// `status` is shared with the task so it can flip back to `Stopped` when the
/// future returns without being asked to.
pub struct Lifecycle {
    name: Arc<str>,
    status: Arc<AtomicU8>,
    task: Mutex<Option<Running>>,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle")
            .field("name", &self.name)
            .field("status", &self.status())
            .finish()
    }
}

impl Lifecycle {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            status: Arc::new(AtomicU8::new(Status::Stopped as u8)),
            task: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn status(&self) -> Status {
        Status::from(self.status.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.status() == Status::Running
    }

    /// Spawn with a fresh cancellation token.
    pub fn start<F, Fut>(&self, make: F) -> Result<(), LifecycleError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.start_with_token(CancellationToken::new(), make)
    }

    /// Spawn `make(token)`. Building and polling the future both happen under
    /// `catch_unwind`, so a panic still returns the status to `Stopped`.
    pub fn start_with_token<F, Fut>(
        &self,
        token: CancellationToken,
        make: F,
    ) -> Result<(), LifecycleError>
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.status
            .compare_exchange(
                Status::Stopped as u8,
                Status::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| LifecycleError::AlreadyStarted(self.name.to_string()))?;

        let name = self.name.clone();
        let status = self.status.clone();
        let cancel = token.clone();
        let handle = tokio::spawn(async move {
            let run = AssertUnwindSafe(async move { make(token).await }).catch_unwind();
            match run.await {
                Ok(Ok(())) => tracing::debug!(task = %name, "background task returned"),
                Ok(Err(e)) => tracing::error!(task = %name, error = %e, "background task failed"),
                Err(_) => tracing::error!(task = %name, "background task panicked"),
            }
            // a concurrent stop() owns the transition out of Stopping
            let _ = status.compare_exchange(
                Status::Running as u8,
                Status::Stopped as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        });

        *self.task.lock() = Some(Running { handle, cancel });
        Ok(())
    }

    /// Cancel the task and wait up to `timeout` for it to return, then abort.
    /// Concurrent callers after the first see `Finished`.
    pub async fn stop(&self, timeout: Duration) -> Result<StopReason, LifecycleError> {
        let Some(Running { mut handle, cancel }) = self.task.lock().take() else {
            return Ok(StopReason::Finished);
        };
        self.status.store(Status::Stopping as u8, Ordering::Release);

        let already_done = handle.is_finished();
        cancel.cancel();

        let reason = match tokio::time::timeout(timeout, &mut handle).await {
            Ok(joined) => {
                if let Err(e) = joined {
                    tracing::warn!(task = %self.name, error = %e, "task join error");
                }
                if already_done {
                    StopReason::Finished
                } else {
                    StopReason::Cancelled
                }
            }
            Err(_) => {
                tracing::warn!(task = %self.name, ?timeout, "stop timed out; aborting task");
                handle.abort();
                let _ = handle.await;
                StopReason::Timeout
            }
        };

        self.status.store(Status::Stopped as u8, Ordering::Release);
        tracing::info!(task = %self.name, ?reason, "background task stopped");
        Ok(reason)
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        if let Some(Running { handle, cancel }) = self.task.get_mut().take() {
            cancel.cancel();
            handle.abort();
        }
    }
}
