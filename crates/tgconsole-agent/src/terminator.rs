use tgconsole_process::{OwnerId, StopOutcome};

use crate::error::JobError;
use crate::manager::JobManager;
use crate::scan::scan_blocking;
use crate::signal::{self, SignalError};

impl JobManager {
    /// Kills `owner`'s worker: the tracked pid first, then any untracked
    /// process whose command line carries the owner's identity.
    pub async fn stop(&self, owner: &OwnerId) -> Result<StopOutcome, JobError> {
        let kind = self.kind();
        let registry = self.registry();
        let mut pids = Vec::new();
        let mut errors = Vec::new();

        if let Some(record) = registry.lookup(owner) {
            match signal::kill(record.pid) {
                Ok(()) => {
                    tracing::info!(kind = %kind, owner = %owner, pid = record.pid, "killed tracked worker");
                    pids.push(record.pid);
                }
                Err(SignalError::AlreadyExited(pid)) => {
                    tracing::info!(kind = %kind, owner = %owner, pid, "tracked worker already gone");
                }
                Err(err) => {
                    tracing::warn!(kind = %kind, owner = %owner, pid = record.pid, %err, "failed to kill tracked worker");
                    errors.push(err.to_string());
                }
            }
            registry.unregister_pid(owner, record.pid);
        }

        // The registry does not survive restarts; look for orphans too.
        let signature = self.program().signature();
        let found = match scan_blocking(self.inner.scanner.clone(), signature.clone()).await {
            Ok(found) => found,
            Err(err) => {
                tracing::warn!(kind = %kind, owner = %owner, %signature, %err, "process scan failed; skipping fallback");
                Vec::new()
            }
        };

        for proc in found.into_iter().filter(|p| p.is_owned_by(owner)) {
            if pids.contains(&proc.pid) {
                continue;
            }
            match signal::kill(proc.pid) {
                Ok(()) => {
                    tracing::info!(
                        kind = %kind,
                        owner = %owner,
                        pid = proc.pid,
                        command_line = %proc.command_line,
                        "killed untracked worker"
                    );
                    pids.push(proc.pid);
                }
                Err(SignalError::AlreadyExited(_)) => {}
                Err(err) => {
                    tracing::warn!(kind = %kind, owner = %owner, pid = proc.pid, %err, "failed to kill untracked worker");
                    errors.push(err.to_string());
                }
            }
        }

        if !pids.is_empty() {
            Ok(StopOutcome::Stopped { pids, errors })
        } else if errors.is_empty() {
            tracing::info!(kind = %kind, owner = %owner, "nothing to stop");
            Ok(StopOutcome::NothingToStop)
        } else {
            Err(JobError::StopFailed { errors })
        }
    }
}
