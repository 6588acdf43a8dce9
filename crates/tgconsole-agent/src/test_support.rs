use std::{path::Path, time::Duration};

use tgconsole_process::{JobEvent, JobKind, OsProcess};
use tokio::sync::mpsc;

use crate::scan::{ProcessScanner, ScanError, matches_signature};
use crate::support::JobLimits;
use crate::worker::{WorkerArgs, WorkerProgram};

pub(crate) struct NoArgs;

impl WorkerArgs for NoArgs {
    fn to_args(&self) -> Vec<String> {
        Vec::new()
    }
}

/// Writes `body` as a shell script and returns a program that runs it with `/bin/sh`.
pub(crate) fn stub_program(dir: &Path, name: &str, body: &str) -> WorkerProgram {
    let script = dir.join(name);
    std::fs::write(&script, body).unwrap();
    WorkerProgram {
        kind: JobKind::AutoChat,
        interpreter: "/bin/sh".into(),
        interpreter_args: Vec::new(),
        script,
        env: Vec::new(),
        working_dir: None,
    }
}

pub(crate) fn fast_limits() -> JobLimits {
    JobLimits {
        startup_timeout: Duration::from_secs(5),
        max_runtime: None,
        stderr_tail_lines: 50,
    }
}

pub(crate) async fn next_event(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> JobEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for job event")
        .expect("event channel closed")
}

#[derive(Debug, Default)]
pub(crate) struct FakeScanner {
    pub(crate) procs: Vec<OsProcess>,
    pub(crate) fail: bool,
}

impl ProcessScanner for FakeScanner {
    fn scan(&self, signature: &str) -> Result<Vec<OsProcess>, ScanError> {
        if self.fail {
            return Err(ScanError::Unavailable);
        }
        Ok(self
            .procs
            .iter()
            .filter(|p| matches_signature(&p.args, signature))
            .cloned()
            .collect())
    }
}
