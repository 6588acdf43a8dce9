use std::{collections::VecDeque, time::Duration};

use tgconsole_process::JobKind;

pub const DEFAULT_STARTUP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_SCRAPE_MAX_RUNTIME_MS: u64 = 900_000;
const DEFAULT_STDERR_TAIL_LINES: usize = 200;

pub(crate) fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<u64>().ok())
}

pub(crate) fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
}

pub(crate) fn format_error_chain(err: &anyhow::Error) -> String {
    let mut parts = Vec::<String>::new();
    for cause in err.chain() {
        let s = cause.to_string();
        if s.is_empty() {
            continue;
        }
        if parts.last() == Some(&s) {
            continue;
        }
        parts.push(s);
    }
    if parts.is_empty() {
        "unknown error".to_string()
    } else {
        parts.join(": ")
    }
}

/// Operational bounds applied to one worker kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JobLimits {
    /// Kill the worker if it prints nothing within this window.
    pub startup_timeout: Duration,
    /// Hard cap on total run time; `None` runs until exit or stop.
    pub max_runtime: Option<Duration>,
    /// How many trailing stderr lines are kept for the exit event.
    pub stderr_tail_lines: usize,
}

impl Default for JobLimits {
    fn default() -> Self {
        Self {
            startup_timeout: Duration::from_millis(DEFAULT_STARTUP_TIMEOUT_MS),
            max_runtime: None,
            stderr_tail_lines: DEFAULT_STDERR_TAIL_LINES,
        }
    }
}

impl JobLimits {
    pub fn from_env(kind: JobKind) -> Self {
        let startup_ms = env_u64("TGC_STARTUP_TIMEOUT_MS");
        let runtime_ms = match kind {
            JobKind::AutoChat => env_u64("TGC_AUTO_CHAT_MAX_RUNTIME_MS"),
            JobKind::Scrape => {
                Some(env_u64("TGC_SCRAPE_MAX_RUNTIME_MS").unwrap_or(DEFAULT_SCRAPE_MAX_RUNTIME_MS))
            }
        };
        Self::resolve(startup_ms, runtime_ms, env_usize("TGC_STDERR_TAIL_LINES"))
    }

    fn resolve(startup_ms: Option<u64>, runtime_ms: Option<u64>, tail: Option<usize>) -> Self {
        let startup_ms = startup_ms
            .map(|v| v.clamp(1_000, 600_000))
            .unwrap_or(DEFAULT_STARTUP_TIMEOUT_MS);
        // 0 disables the cap.
        let max_runtime = runtime_ms
            .filter(|v| *v > 0)
            .map(|v| Duration::from_millis(v.clamp(1_000, 7 * 24 * 60 * 60 * 1000)));
        let stderr_tail_lines = tail
            .map(|v| v.clamp(10, 10_000))
            .unwrap_or(DEFAULT_STDERR_TAIL_LINES);

        Self {
            startup_timeout: Duration::from_millis(startup_ms),
            max_runtime,
            stderr_tail_lines,
        }
    }
}

/// Bounded tail of recent lines.
#[derive(Debug)]
pub(crate) struct LineTail {
    max_lines: usize,
    lines: VecDeque<String>,
}

impl LineTail {
    pub(crate) fn new(max_lines: usize) -> Self {
        Self {
            max_lines: max_lines.max(1),
            lines: VecDeque::new(),
        }
    }

    pub(crate) fn push_line(&mut self, line: String) {
        self.lines.push_back(line);
        while self.lines.len() > self.max_lines {
            self.lines.pop_front();
        }
    }

    pub(crate) fn joined(&self) -> String {
        self.lines.iter().map(String::as_str).collect::<Vec<_>>().join("\n")
    }
}
