use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::comfy::types::ArtifactRef;

/// The six states of a tracked workflow.
///
/// PENDING → QUEUED → RUNNING → COMPLETED | FAILED, with CANCELLED reachable
/// from QUEUED and RUNNING. The three right-hand states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowState {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Cancelled
        )
    }

    /// Position along the lifecycle; observations may only move forward.
    fn rank(&self) -> u8 {
        match self {
            WorkflowState::Pending => 0,
            WorkflowState::Queued => 1,
            WorkflowState::Running => 2,
            WorkflowState::Completed | WorkflowState::Failed | WorkflowState::Cancelled => 3,
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkflowState::Pending => write!(f, "PENDING"),
            WorkflowState::Queued => write!(f, "QUEUED"),
            WorkflowState::Running => write!(f, "RUNNING"),
            WorkflowState::Completed => write!(f, "COMPLETED"),
            WorkflowState::Failed => write!(f, "FAILED"),
            WorkflowState::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Observed status of one workflow: state, queue position, progress and,
/// once terminal, the produced artifacts or the engine's error payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub state: WorkflowState,
    pub queue_position: Option<u32>,
    pub progress: f32,
    pub result: Option<Vec<ArtifactRef>>,
    pub error: Option<String>,
}

impl WorkflowStatus {
    fn with_state(state: WorkflowState) -> Self {
        Self {
            state,
            queue_position: None,
            progress: 0.0,
            result: None,
            error: None,
        }
    }

    pub fn pending() -> Self {
        Self::with_state(WorkflowState::Pending)
    }

    pub fn queued(position: Option<u32>) -> Self {
        Self {
            queue_position: position,
            ..Self::with_state(WorkflowState::Queued)
        }
    }

    pub fn running() -> Self {
        Self::with_state(WorkflowState::Running)
    }

    pub fn completed(images: Vec<ArtifactRef>) -> Self {
        Self {
            progress: 1.0,
            result: Some(images),
            ..Self::with_state(WorkflowState::Completed)
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::with_state(WorkflowState::Failed)
        }
    }

    pub fn cancelled() -> Self {
        Self::with_state(WorkflowState::Cancelled)
    }

    /// Fold a newer observation into this one. Terminal states are frozen
    /// and stale observations (lower rank) are dropped, so an observer never
    /// sees RUNNING after COMPLETED. While both observations say RUNNING the
    /// furthest progress wins: a poll cannot see the finer-grained value
    /// push notifications carry.
    pub fn absorb(&mut self, incoming: WorkflowStatus) -> bool {
        if self.state.is_terminal() || incoming.state.rank() < self.state.rank() {
            return false;
        }
        let progress =
            if self.state == WorkflowState::Running && incoming.state == WorkflowState::Running {
                self.progress.max(incoming.progress)
            } else {
                incoming.progress
            };
        *self = incoming;
        self.progress = progress;
        true
    }

    /// Direct progress report. May regress: the engine restarted the
    /// execution (e.g. after cache invalidation), which is not an error.
    pub fn set_progress(&mut self, progress: f32) {
        if self.state.is_terminal() {
            return;
        }
        self.state = WorkflowState::Running;
        self.queue_position = None;
        self.progress = progress.clamp(0.0, 1.0);
    }
}

/// Client-side handle for a submitted workflow, owned by the tracker until
/// the job reaches a terminal state or the caller discards it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobHandle {
    pub prompt_id: String,
    pub status: WorkflowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobHandle {
    pub fn new(prompt_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            prompt_id: prompt_id.into(),
            status: WorkflowStatus::pending(),
            created_at: now,
            updated_at: now,
        }
    }
}
