use std::time::Duration;

use chrono::{DateTime, Utc};
use tgconsole_process::{JobKind, JobRecord, OwnerId};

#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("{owner} already has a running {kind} job (pid {pid}, started {started_at})")]
    JobAlreadyRunning {
        owner: OwnerId,
        kind: JobKind,
        pid: u32,
        started_at: DateTime<Utc>,
    },

    #[error("failed to spawn worker: {reason}")]
    SpawnFailed { reason: String },

    #[error("worker produced no output within {}ms", .waited.as_millis())]
    StartupTimeout {
        waited: Duration,
        partial_output: Vec<String>,
    },

    #[error("failed to stop processes: {}", .errors.join(", "))]
    StopFailed { errors: Vec<String> },
}

impl JobError {
    pub(crate) fn already_running(existing: JobRecord) -> Self {
        JobError::JobAlreadyRunning {
            owner: existing.owner_id,
            kind: existing.kind,
            pid: existing.pid,
            started_at: existing.started_at,
        }
    }

    /// Stable machine-readable code for API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            JobError::JobAlreadyRunning { .. } => "job_already_running",
            JobError::SpawnFailed { .. } => "spawn_failed",
            JobError::StartupTimeout { .. } => "startup_timeout",
            JobError::StopFailed { .. } => "stop_failed",
        }
    }
}
