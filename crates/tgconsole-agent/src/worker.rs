//! Worker invocations.
//!
//! NOTE: Callers never pass a command. They pick a worker kind and typed
//! parameters; the program path comes from configuration.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::NaiveDate;
use tgconsole_process::{JobKind, OwnerId};
use tokio::process::Command;

/// Argument that carries the owner identity on every worker command line.
/// The stop fallback relies on it to find orphaned workers.
pub const OWNER_FLAG: &str = "--user-email";

pub const AUTO_CHAT_SCRIPT: &str = "auto_chat.py";
pub const SCRAPE_SCRIPT: &str = "scrape_messages.py";

/// Parameters that a worker kind turns into command-line arguments.
pub trait WorkerArgs: Send + Sync {
    fn to_args(&self) -> Vec<String>;
}

#[derive(Debug, Clone)]
pub struct WorkerProgram {
    pub kind: JobKind,
    pub interpreter: PathBuf,
    pub interpreter_args: Vec<String>,
    pub script: PathBuf,
    pub env: Vec<(String, String)>,
    pub working_dir: Option<PathBuf>,
}

impl WorkerProgram {
    /// Unbuffered UTF-8 Python worker.
    pub fn python(kind: JobKind, interpreter: impl Into<PathBuf>, script: impl Into<PathBuf>) -> Self {
        Self {
            kind,
            interpreter: interpreter.into(),
            interpreter_args: vec!["-u".to_string()],
            script: script.into(),
            env: vec![
                ("PYTHONUNBUFFERED".to_string(), "1".to_string()),
                ("PYTHONIOENCODING".to_string(), "utf-8".to_string()),
            ],
            working_dir: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// File name used to recognise this worker in the OS process table.
    pub fn signature(&self) -> String {
        self.script
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Full argv, interpreter first. The owner flag always follows the script.
    pub fn argv(&self, owner: &OwnerId, params: &dyn WorkerArgs) -> Vec<String> {
        let mut argv = Vec::with_capacity(self.interpreter_args.len() + 8);
        argv.push(self.interpreter.display().to_string());
        argv.extend(self.interpreter_args.iter().cloned());
        argv.push(self.script.display().to_string());
        argv.push(OWNER_FLAG.to_string());
        argv.push(owner.to_string());
        argv.extend(params.to_args());
        argv
    }

    /// Builds a detached command with piped output streams.
    pub(crate) fn command(&self, argv: &[String]) -> Command {
        let mut cmd = Command::new(&self.interpreter);
        cmd.args(argv.iter().skip(1))
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(false);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        #[cfg(unix)]
        {
            unsafe {
                cmd.pre_exec(|| {
                    // Own session: the worker outlives us and can be killed as a group.
                    if libc::setsid() == -1 {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        cmd
    }

    pub(crate) fn check_script(&self) -> anyhow::Result<()> {
        let meta = std::fs::metadata(&self.script)
            .with_context(|| format!("worker script not found: {}", self.script.display()))?;
        if !meta.is_file() {
            anyhow::bail!("worker script is not a file: {}", self.script.display());
        }
        Ok(())
    }
}

/// Parses `"min-max"` seconds, e.g. `"2-10"`.
pub fn parse_interval(raw: &str) -> anyhow::Result<(f64, f64)> {
    let (min, max) = raw
        .split_once('-')
        .ok_or_else(|| anyhow::anyhow!("invalid interval (expected min-max): {raw}"))?;
    let min: f64 = min
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid minimum interval: {min}"))?;
    let max: f64 = max
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid maximum interval: {max}"))?;
    if !min.is_finite() || !max.is_finite() || min < 0.0 {
        anyhow::bail!("interval out of range: {raw}");
    }
    if min > max {
        anyhow::bail!("minimum interval exceeds maximum: {raw}");
    }
    Ok((min, max))
}

#[derive(Debug, Clone, PartialEq)]
pub struct AutoChatParams {
    pub root_dir: PathBuf,
    pub target_group: String,
    pub message_source: String,
    pub min_interval: f64,
    pub max_interval: f64,
    pub topic_id: Option<i64>,
    pub enable_loop: bool,
}

impl AutoChatParams {
    pub fn new(
        root_dir: &Path,
        target_group: &str,
        message_source: &str,
        interval: &str,
    ) -> anyhow::Result<Self> {
        let target_group = target_group.trim();
        if target_group.is_empty() {
            anyhow::bail!("target group is required");
        }
        let message_source = message_source.trim();
        if message_source.is_empty() {
            anyhow::bail!("message source is required");
        }
        let (min_interval, max_interval) = parse_interval(interval)?;
        Ok(Self {
            root_dir: root_dir.to_path_buf(),
            target_group: target_group.to_string(),
            message_source: message_source.to_string(),
            min_interval,
            max_interval,
            topic_id: None,
            enable_loop: false,
        })
    }
}

impl WorkerArgs for AutoChatParams {
    fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--root-dir".to_string(),
            self.root_dir.display().to_string(),
            "--target-group".to_string(),
            self.target_group.clone(),
            "--message-source".to_string(),
            self.message_source.clone(),
            "--min-interval".to_string(),
            self.min_interval.to_string(),
            "--max-interval".to_string(),
            self.max_interval.to_string(),
        ];
        if let Some(topic) = self.topic_id {
            args.push("--topic".to_string());
            args.push("--topic-id".to_string());
            args.push(topic.to_string());
        }
        if self.enable_loop {
            args.push("--enable-loop".to_string());
        }
        args
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScrapeByDateParams {
    pub session_path: PathBuf,
    pub group: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub topic_id: Option<i64>,
    pub skip_media: bool,
    pub timeout_secs: u64,
}

impl ScrapeByDateParams {
    pub fn new(
        session_path: &Path,
        group: &str,
        start_date: &str,
        end_date: &str,
        timeout_secs: u64,
    ) -> anyhow::Result<Self> {
        let group = group.trim().trim_start_matches('@');
        if group.is_empty() {
            anyhow::bail!("group is required");
        }
        let start_date = parse_date(start_date)?;
        let end_date = parse_date(end_date)?;
        if start_date > end_date {
            anyhow::bail!("start date {start_date} is after end date {end_date}");
        }
        Ok(Self {
            session_path: session_path.to_path_buf(),
            group: group.to_string(),
            start_date,
            end_date,
            topic_id: None,
            skip_media: false,
            timeout_secs,
        })
    }
}

fn parse_date(raw: &str) -> anyhow::Result<NaiveDate> {
    let raw = raw.trim();
    // Strict YYYY-MM-DD.
    if raw.len() != 10 {
        anyhow::bail!("invalid date (expected YYYY-MM-DD): {raw}");
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|_| anyhow::anyhow!("invalid date (expected YYYY-MM-DD): {raw}"))
}

impl WorkerArgs for ScrapeByDateParams {
    fn to_args(&self) -> Vec<String> {
        let mut args = vec![
            "--session".to_string(),
            self.session_path.display().to_string(),
            "--group".to_string(),
            self.group.clone(),
            "--start-date".to_string(),
            self.start_date.format("%Y-%m-%d").to_string(),
            "--end-date".to_string(),
            self.end_date.format("%Y-%m-%d").to_string(),
            "--timeout".to_string(),
            self.timeout_secs.to_string(),
        ];
        if let Some(topic) = self.topic_id {
            args.push("--topic-id".to_string());
            args.push(topic.to_string());
        }
        if self.skip_media {
            args.push("--skip-media".to_string());
        }
        args
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interval_parses_min_and_max() {
        assert_eq!(parse_interval("2-10").unwrap(), (2.0, 10.0));
        assert_eq!(parse_interval(" 0.5 - 1.5 ").unwrap(), (0.5, 1.5));
    }

    #[test]
    fn interval_rejects_bad_input() {
        assert!(parse_interval("10").is_err());
        assert!(parse_interval("a-b").is_err());
        assert!(parse_interval("10-2").is_err());
    }

    #[test]
    fn argv_embeds_owner_right_after_script() {
        let program = WorkerProgram::python(JobKind::AutoChat, "python3", "/srv/scripts/auto_chat.py");
        let mut params =
            AutoChatParams::new(Path::new("/srv"), "grp", "src1", "2-10").unwrap();
        params.topic_id = Some(7);
        params.enable_loop = true;

        let argv = program.argv(&OwnerId::new("u1@example.com"), &params);
        assert_eq!(
            argv,
            vec![
                "python3",
                "-u",
                "/srv/scripts/auto_chat.py",
                "--user-email",
                "u1@example.com",
                "--root-dir",
                "/srv",
                "--target-group",
                "grp",
                "--message-source",
                "src1",
                "--min-interval",
                "2",
                "--max-interval",
                "10",
                "--topic",
                "--topic-id",
                "7",
                "--enable-loop",
            ]
        );
        assert_eq!(program.signature(), "auto_chat.py");
    }

    #[test]
    fn scrape_params_strip_at_and_validate_dates() {
        let p = ScrapeByDateParams::new(
            Path::new("/data/sessions/a@x.io/one.session"),
            "@mygroup",
            "2024-01-01",
            "2024-01-31",
            900,
        )
        .unwrap();
        assert_eq!(p.group, "mygroup");
        let args = p.to_args();
        assert!(args.windows(2).any(|w| w == ["--timeout", "900"]));
        assert!(!args.contains(&"--skip-media".to_string()));

        assert!(ScrapeByDateParams::new(Path::new("s"), "g", "2024-1-1", "2024-01-31", 900).is_err());
        assert!(ScrapeByDateParams::new(Path::new("s"), "g", "2024-02-01", "2024-01-31", 900).is_err());
        assert!(ScrapeByDateParams::new(Path::new("s"), "@", "2024-01-01", "2024-01-31", 900).is_err());
    }

    #[test]
    fn missing_script_is_reported() {
        let program = WorkerProgram::python(JobKind::Scrape, "python3", "/nonexistent/scrape_messages.py");
        let err = program.check_script().unwrap_err();
        assert!(err.to_string().contains("worker script not found"));
    }
}
