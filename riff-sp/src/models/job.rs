//! Job lifecycle state machine
//!
//! QUEUED → RUNNING → {COMPLETED, FAILED, CANCELLED}
//!
//! A job may also finish straight from QUEUED: COMPLETED on a cache hit,
//! CANCELLED when cancellation arrives before dispatch, FAILED when the upload
//! cannot be fingerprinted. Terminal states are final.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::Fingerprint;

/// Client session id; jobs, subscribers and cancellation all key on it
pub type ClientId = Uuid;

/// Job lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobState {
    /// Upload accepted, compute not yet dispatched
    Queued,
    /// Compute stage dispatched to the worker pool
    Running,
    /// Stems available (computed or loaded from cache)
    Completed,
    /// Compute or cache write failed
    Failed,
    /// Cancelled by the client
    Cancelled,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: JobState) -> bool {
        match (self, next) {
            (JobState::Queued, JobState::Running) => true,
            (JobState::Queued, s) | (JobState::Running, s) => s.is_terminal(),
            _ => false,
        }
    }
}

/// Rejected state change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    pub from: JobState,
    pub to: JobState,
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    pub client_id: ClientId,
    pub old_state: JobState,
    pub new_state: JobState,
    pub transitioned_at: DateTime<Utc>,
}

/// In-memory bookkeeping for one job
#[derive(Debug, Clone)]
pub struct JobTracker {
    pub client_id: ClientId,
    pub state: JobState,
    pub filename: String,
    pub fingerprint: Option<Fingerprint>,
    /// Last reported percentage (0.0 - 100.0)
    pub progress: f64,
    /// Last reported status label
    pub status: String,
    pub submitted_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl JobTracker {
    pub fn new(client_id: ClientId, filename: String) -> Self {
        Self {
            client_id,
            state: JobState::Queued,
            filename,
            fingerprint: None,
            progress: 0.0,
            status: String::from("Queued"),
            submitted_at: riff_common::time::now(),
            ended_at: None,
        }
    }

    /// Transition to new state
    pub fn transition_to(&mut self, new_state: JobState) -> Result<StateTransition, InvalidTransition> {
        if !self.state.can_transition_to(new_state) {
            return Err(InvalidTransition {
                from: self.state,
                to: new_state,
            });
        }

        let transition = StateTransition {
            client_id: self.client_id,
            old_state: self.state,
            new_state,
            transitioned_at: riff_common::time::now(),
        };
        self.state = new_state;

        if new_state.is_terminal() {
            self.ended_at = Some(transition.transitioned_at);
        }

        Ok(transition)
    }

    /// Record reported progress; ignored once terminal
    pub fn record_progress(&mut self, progress: f64, status: &str) {
        if self.state.is_terminal() {
            return;
        }
        self.progress = progress;
        self.status = status.to_string();
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            client_id: self.client_id,
            state: self.state,
            filename: self.filename.clone(),
            fingerprint: self.fingerprint.clone(),
            progress: self.progress,
            status: self.status.clone(),
            submitted_at: self.submitted_at,
            elapsed_seconds: (riff_common::time::now() - self.submitted_at)
                .num_seconds()
                .max(0) as u64,
        }
    }
}

/// GET /api/jobs/{client_id} view of a tracked job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub client_id: ClientId,
    pub state: JobState,
    pub filename: String,
    pub fingerprint: Option<Fingerprint>,
    pub progress: f64,
    pub status: String,
    pub submitted_at: DateTime<Utc>,
    pub elapsed_seconds: u64,
}
