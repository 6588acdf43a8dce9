use std::{collections::HashMap, fmt, path::Path, sync::Arc};

use sysinfo::{ProcessRefreshKind, ProcessStatus, System, UpdateKind};
use tgconsole_process::OsProcess;

#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    #[error("process table unavailable")]
    Unavailable,
    #[error("process scan task failed: {0}")]
    Join(String),
}

/// "List live processes whose command line names this worker."
pub trait ProcessScanner: Send + Sync + fmt::Debug {
    /// `signature` is the worker's script or executable file name.
    fn scan(&self, signature: &str) -> Result<Vec<OsProcess>, ScanError>;
}

/// Structured process enumeration backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoScanner;

impl ProcessScanner for SysinfoScanner {
    fn scan(&self, signature: &str) -> Result<Vec<OsProcess>, ScanError> {
        let mut sys = System::new();
        // argv is not loaded by default; without it nothing can match.
        sys.refresh_processes_specifics(ProcessRefreshKind::new().with_cmd(UpdateKind::Always));
        if sys.processes().is_empty() {
            return Err(ScanError::Unavailable);
        }

        let own_pid = std::process::id();
        let mut matched: HashMap<u32, (Option<u32>, Vec<String>)> = HashMap::new();
        for (pid, p) in sys.processes() {
            if matches!(p.status(), ProcessStatus::Zombie | ProcessStatus::Dead) {
                continue;
            }
            let pid = pid.as_u32();
            if pid == own_pid {
                continue;
            }
            let args = p.cmd().to_vec();
            if matches_signature(&args, signature) {
                matched.insert(pid, (p.parent().map(|pp| pp.as_u32()), args));
            }
        }

        Ok(collapse_threads(matched))
    }
}

/// Drops entries whose parent is also a match with an identical argv.
///
/// Thread entries of one worker show up this way on Linux.
fn collapse_threads(matched: HashMap<u32, (Option<u32>, Vec<String>)>) -> Vec<OsProcess> {
    let mut out: Vec<OsProcess> = matched
        .iter()
        .filter(|(_, (parent, args))| {
            !parent
                .and_then(|pp| matched.get(&pp))
                .is_some_and(|(_, parent_args)| parent_args == args)
        })
        .map(|(pid, (_, args))| OsProcess::new(*pid, args.clone()))
        .collect();
    out.sort_by_key(|p| p.pid);
    out
}

/// True when some argv element's file name equals `signature`.
pub(crate) fn matches_signature(args: &[String], signature: &str) -> bool {
    if signature.is_empty() {
        return false;
    }
    args.iter().any(|a| {
        Path::new(a)
            .file_name()
            .is_some_and(|name| name == signature)
    })
}

/// Runs a scan on the blocking pool.
pub(crate) async fn scan_blocking(
    scanner: Arc<dyn ProcessScanner>,
    signature: String,
) -> Result<Vec<OsProcess>, ScanError> {
    tokio::task::spawn_blocking(move || scanner.scan(&signature))
        .await
        .map_err(|e| ScanError::Join(e.to_string()))?
}
