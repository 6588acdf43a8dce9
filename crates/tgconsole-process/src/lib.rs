use std::fmt;

use chrono::{DateTime, Utc};

/// Stable per-tenant key under which jobs are tracked (the account email).
///
/// NOTE: The value is trusted as-is. Authentication happens in the web layer.
#[derive(
    Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct OwnerId(pub String);

impl OwnerId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which worker program a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobKind {
    AutoChat,
    Scrape,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            JobKind::AutoChat => "auto-chat",
            JobKind::Scrape => "scrape",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One tracked running worker.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct JobRecord {
    pub owner_id: OwnerId,
    pub kind: JobKind,
    pub pid: u32,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct JobExit {
    pub code: Option<i32>,
    pub success: bool,
    /// Tail of the worker's stderr, newline-joined.
    pub stderr: String,
    /// The worker outlived its run-time cap and was killed.
    pub deadline_exceeded: bool,
}

/// Progress of a running job, delivered in arrival order. `Exited` is always last.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    Output { stream: OutputStream, line: String },
    Exited(JobExit),
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobEvent::Exited(_))
    }
}

/// A live OS process whose command line matched a worker signature.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct OsProcess {
    pub pid: u32,
    pub command_line: String,
    #[serde(skip)]
    pub args: Vec<String>,
}

impl OsProcess {
    pub fn new(pid: u32, args: Vec<String>) -> Self {
        Self {
            pid,
            command_line: args.join(" "),
            args,
        }
    }

    /// True when the argv carries `--user-email <owner>` (or `--user-email=<owner>`).
    ///
    /// Exact argument match: `a@x.io` must not match `ba@x.io`.
    pub fn is_owned_by(&self, owner: &OwnerId) -> bool {
        let flag = "--user-email";
        self.args.iter().enumerate().any(|(i, arg)| {
            if arg == flag {
                return self.args.get(i + 1).is_some_and(|v| v == owner.as_str());
            }
            arg.strip_prefix(flag)
                .and_then(|rest| rest.strip_prefix('='))
                .is_some_and(|v| v == owner.as_str())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum StopOutcome {
    Stopped { pids: Vec<u32>, errors: Vec<String> },
    NothingToStop,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct StatusReport {
    pub owner_id: OwnerId,
    pub tracked: Option<JobRecord>,
    pub all_tracked: Vec<JobRecord>,
    pub os_matching: Vec<OsProcess>,
}
