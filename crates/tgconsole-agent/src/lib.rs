//! Per-owner worker supervision: spawn, track, stop and inspect the external
//! automation workers that run on behalf of console users.

mod error;
mod launcher;
mod manager;
mod registry;
mod scan;
pub mod signal;
mod status;
mod support;
mod terminator;
pub mod worker;

#[cfg(test)]
mod test_support;

pub use error::JobError;
pub use launcher::StartedJob;
pub use manager::JobManager;
pub use registry::{AlreadyRegistered, ClaimError, ProcessRegistry};
pub use scan::{ProcessScanner, ScanError, SysinfoScanner};
pub use support::JobLimits;
pub use worker::{WorkerArgs, WorkerProgram};

pub use tgconsole_process::{
    JobEvent, JobExit, JobKind, JobRecord, OsProcess, OutputStream, OwnerId, StatusReport,
    StopOutcome,
};
