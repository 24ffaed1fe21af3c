//! Async Listener
//!
//! Runs a [`StreamController`] session on a background task so the caller is
//! not blocked.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::controller::StreamController;
use crate::error::StreamError;

/// Status of the background listener.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ListenerStatus {
    /// A listen task has been started and not stopped.
    pub running: bool,
    /// The listen task has not finished.
    pub alive: bool,
    /// Time since the task started.
    pub uptime: Option<Duration>,
}

struct Task {
    handle: JoinHandle<Result<(), StreamError>>,
    started_at: Instant,
}

/// Background wrapper around a [`StreamController`].
pub struct AsyncListener {
    controller: Arc<StreamController>,
    join_timeout: Duration,
    task: Mutex<Option<Task>>,
}

impl AsyncListener {
    /// Create a stopped listener. `join_timeout` bounds how long
    /// [`stop`](Self::stop) waits for the task.
    #[must_use]
    pub const fn new(controller: Arc<StreamController>, join_timeout: Duration) -> Self {
        Self {
            controller,
            join_timeout,
            task: Mutex::new(None),
        }
    }

    /// Start listening in the background.
    ///
    /// The session begins before this returns, so a following
    /// [`stop`](Self::stop) always ends it.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidArgument`] if a listen task is still
    /// running or the controller is already listening, and
    /// [`StreamError::Dispatch`] if the dispatcher cannot start.
    pub fn start(&self) -> Result<(), StreamError> {
        let mut task = self.task.lock();
        if task.as_ref().is_some_and(|t| !t.handle.is_finished()) {
            return Err(StreamError::InvalidArgument(
                "listener is already running".to_string(),
            ));
        }

        let run = self.controller.begin()?;
        let controller = Arc::clone(&self.controller);
        let handle = tokio::spawn(async move {
            let result = controller.run_session(run).await;
            if let Err(e) = &result {
                tracing::error!(error = %e, "Background listener exited with error");
            }
            result
        });
        *task = Some(Task {
            handle,
            started_at: Instant::now(),
        });
        tracing::info!("Background listener started");
        Ok(())
    }

    /// Stop the controller and wait for the task to finish.
    ///
    /// If the task outlives the join timeout a warning is logged and the
    /// task is left to finish on its own.
    ///
    /// # Errors
    ///
    /// Returns the error the listen task ended with.
    pub async fn stop(&self) -> Result<(), StreamError> {
        self.controller.stop().await;

        let Some(task) = self.task.lock().take() else {
            return Ok(());
        };

        let mut handle = task.handle;
        match tokio::time::timeout(self.join_timeout, &mut handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Background listener task failed");
                Ok(())
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = u64::try_from(self.join_timeout.as_millis()).unwrap_or(u64::MAX),
                    "Background listener did not stop before timeout"
                );
                Ok(())
            }
        }
    }

    /// Listener status.
    #[must_use]
    pub fn status(&self) -> ListenerStatus {
        let task = self.task.lock();
        task.as_ref().map_or_else(ListenerStatus::default, |t| ListenerStatus {
            running: true,
            alive: !t.handle.is_finished(),
            uptime: Some(t.started_at.elapsed()),
        })
    }
}
