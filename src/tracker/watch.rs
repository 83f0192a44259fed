use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::time::{self, Instant};
use tracing::debug;

use super::status::{JobHandle, WorkflowState, WorkflowStatus};
use crate::comfy::types::PushMessage;
use crate::comfy::{ComfyClient, ComfyError};
use crate::retry::RetryPolicy;

/// The tracker's view of the transport: probe a prompt's status, cancel a
/// prompt. Lets the wait/cancel machinery run against a scripted monitor in
/// tests.
#[allow(async_fn_in_trait)]
pub trait JobMonitor {
    async fn probe(&self, prompt_id: &str) -> Result<WorkflowStatus, ComfyError>;
    async fn cancel(&self, prompt_id: &str) -> Result<bool, ComfyError>;
}

impl JobMonitor for ComfyClient {
    async fn probe(&self, prompt_id: &str) -> Result<WorkflowStatus, ComfyError> {
        self.status(prompt_id).await
    }

    async fn cancel(&self, prompt_id: &str) -> Result<bool, ComfyError> {
        ComfyClient::cancel(self, prompt_id).await
    }
}

impl<M: JobMonitor + Sync> JobMonitor for Arc<M> {
    async fn probe(&self, prompt_id: &str) -> Result<WorkflowStatus, ComfyError> {
        (**self).probe(prompt_id).await
    }

    async fn cancel(&self, prompt_id: &str) -> Result<bool, ComfyError> {
        (**self).cancel(prompt_id).await
    }
}

/// Owns the lifecycle of submitted workflows: a job-id → status map driven
/// by polling and/or push notifications, with wait and cancel on top.
///
/// Safe to share across concurrently in-flight jobs; each job id is expected
/// to have a single coordinating task driving its poll loop. The map lock is
/// never held across an await.
pub struct WorkflowTracker<M> {
    monitor: M,
    retry: RetryPolicy,
    jobs: Mutex<HashMap<String, JobHandle>>,
}

impl<M: JobMonitor> WorkflowTracker<M> {
    pub fn new(monitor: M) -> Self {
        Self::with_retry(monitor, RetryPolicy::default())
    }

    pub fn with_retry(monitor: M, retry: RetryPolicy) -> Self {
        Self {
            monitor,
            retry,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    /// Start tracking a prompt in PENDING.
    pub fn register(&self, prompt_id: &str) {
        self.update_with(prompt_id, |_| {});
    }

    /// Record the PENDING → QUEUED transition after a successful submit.
    pub fn mark_queued(&self, prompt_id: &str) {
        self.update_with(prompt_id, |handle| {
            handle.status.absorb(WorkflowStatus::queued(None));
        });
    }

    pub fn status(&self, prompt_id: &str) -> Option<WorkflowStatus> {
        self.jobs
            .lock()
            .expect("tracker mutex poisoned")
            .get(prompt_id)
            .map(|handle| handle.status.clone())
    }

    /// Stop tracking a prompt. The remote job is unaffected: abandonment is
    /// not cancellation, and the id stays usable against the engine.
    pub fn discard(&self, prompt_id: &str) -> Option<JobHandle> {
        self.jobs
            .lock()
            .expect("tracker mutex poisoned")
            .remove(prompt_id)
    }

    fn update_with<R>(&self, prompt_id: &str, apply: impl FnOnce(&mut JobHandle) -> R) -> R {
        let mut jobs = self.jobs.lock().expect("tracker mutex poisoned");
        let handle = jobs
            .entry(prompt_id.to_string())
            .or_insert_with(|| JobHandle::new(prompt_id));
        let out = apply(handle);
        handle.updated_at = Utc::now();
        out
    }

    /// One probe of the engine, folded into the tracked status. The probe
    /// runs under the retry policy.
    pub async fn poll_once(&self, prompt_id: &str) -> Result<WorkflowStatus, ComfyError> {
        let observed = self.retry.run(|| self.monitor.probe(prompt_id)).await?;
        Ok(self.update_with(prompt_id, move |handle| {
            handle.status.absorb(observed);
            handle.status.clone()
        }))
    }

    /// Poll until the prompt reaches a terminal state, or fail with
    /// [`ComfyError::Timeout`] without altering the tracked state; the job
    /// may still complete later, and only an explicit [`cancel`] stops it.
    ///
    /// [`cancel`]: WorkflowTracker::cancel
    pub async fn wait(
        &self,
        prompt_id: &str,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<WorkflowStatus, ComfyError> {
        self.wait_until(prompt_id, poll_interval, Instant::now() + timeout)
            .await
    }

    async fn wait_until(
        &self,
        prompt_id: &str,
        poll_interval: Duration,
        deadline: Instant,
    ) -> Result<WorkflowStatus, ComfyError> {
        loop {
            if let Some(status) = self.status(prompt_id)
                && status.state.is_terminal()
            {
                return Ok(status);
            }

            let status = self.poll_once(prompt_id).await?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(ComfyError::Timeout);
            }

            let next = Instant::now() + poll_interval;
            time::sleep_until(next.min(deadline)).await;
        }
    }

    /// Like [`wait`], but consuming the prompt's push-notification stream.
    ///
    /// Notifications are advisory: the engine is still polled once per
    /// interval as a safety net, and a closed channel degrades to pure
    /// polling rather than failing.
    ///
    /// [`wait`]: WorkflowTracker::wait
    pub async fn wait_with_events(
        &self,
        prompt_id: &str,
        events: &mut mpsc::UnboundedReceiver<PushMessage>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<WorkflowStatus, ComfyError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = self.status(prompt_id)
                && status.state.is_terminal()
            {
                return Ok(status);
            }
            if Instant::now() >= deadline {
                return Err(ComfyError::Timeout);
            }

            tokio::select! {
                message = events.recv() => match message {
                    Some(message) => self.apply_push(prompt_id, &message),
                    None => {
                        debug!(prompt_id, "notification channel closed, falling back to polling");
                        return self.wait_until(prompt_id, poll_interval, deadline).await;
                    }
                },
                _ = time::sleep(poll_interval) => {
                    let status = self.poll_once(prompt_id).await?;
                    if status.state.is_terminal() {
                        return Ok(status);
                    }
                }
            }
        }
    }

    /// Translate one push message into a state transition for `prompt_id`.
    /// Messages about other prompts are ignored.
    pub fn apply_push(&self, prompt_id: &str, message: &PushMessage) {
        match message {
            PushMessage::ExecutionStart { prompt_id: id }
            | PushMessage::Executing { prompt_id: id, .. }
            | PushMessage::ExecutionCached { prompt_id: id, .. }
            | PushMessage::Executed { prompt_id: id, .. }
                if id == prompt_id =>
            {
                self.update_with(prompt_id, |handle| {
                    handle.status.absorb(WorkflowStatus::running());
                });
            }
            PushMessage::Progress {
                prompt_id: id,
                value,
                max,
            } if id.as_deref().is_none_or(|id| id == prompt_id) => {
                let progress = if *max == 0 {
                    0.0
                } else {
                    *value as f32 / *max as f32
                };
                self.update_with(prompt_id, |handle| handle.status.set_progress(progress));
            }
            PushMessage::ExecutionSuccess { prompt_id: id } if id == prompt_id => {
                self.update_with(prompt_id, |handle| {
                    handle.status.absorb(WorkflowStatus {
                        state: WorkflowState::Completed,
                        queue_position: None,
                        progress: 1.0,
                        result: None,
                        error: None,
                    });
                });
            }
            PushMessage::ExecutionError { prompt_id: id, .. } if id == prompt_id => {
                let payload = serde_json::to_value(message)
                    .ok()
                    .and_then(|v| v.get("data").cloned())
                    .map(|data| data.to_string())
                    .unwrap_or_else(|| "execution error".to_string());
                self.update_with(prompt_id, |handle| {
                    handle.status.absorb(WorkflowStatus::failed(payload));
                });
            }
            PushMessage::ExecutionInterrupted { prompt_id: id } if id == prompt_id => {
                self.update_with(prompt_id, |handle| {
                    handle.status.absorb(WorkflowStatus::cancelled());
                });
            }
            _ => {}
        }
    }

    /// Cancel a tracked prompt: notify the engine (never retried) and mark
    /// the handle CANCELLED. Cancelling an already-terminal prompt is a
    /// no-op success.
    pub async fn cancel(&self, prompt_id: &str) -> Result<bool, ComfyError> {
        if let Some(status) = self.status(prompt_id)
            && status.state.is_terminal()
        {
            return Ok(true);
        }

        let acknowledged = self.monitor.cancel(prompt_id).await?;
        self.update_with(prompt_id, |handle| {
            handle.status.absorb(WorkflowStatus::cancelled());
        });
        Ok(acknowledged)
    }
}
