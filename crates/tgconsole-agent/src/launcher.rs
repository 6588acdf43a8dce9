use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tgconsole_process::{JobEvent, JobExit, JobRecord, OutputStream, OwnerId};
use tokio::{
    io::{AsyncBufReadExt, AsyncRead, BufReader},
    process::Child,
    sync::mpsc,
    task::JoinHandle,
};

use crate::error::JobError;
use crate::manager::JobManager;
use crate::registry::ClaimError;
use crate::signal;
use crate::support::{LineTail, format_error_chain};
use crate::worker::WorkerArgs;

// After the worker exits, how long its output pipes may stay open.
const READER_DRAIN: Duration = Duration::from_secs(2);
const PARTIAL_OUTPUT_DRAIN: Duration = Duration::from_millis(500);

/// A freshly started job.
#[derive(Debug)]
pub struct StartedJob {
    pub record: JobRecord,
    /// First event: an output line, or the exit if the worker died silently.
    pub first: JobEvent,
    /// Everything after `first`, in arrival order. Closes after `JobEvent::Exited`.
    pub events: mpsc::UnboundedReceiver<JobEvent>,
}

impl JobManager {
    /// Spawns the worker for `owner` and waits for its first output.
    pub async fn start(
        &self,
        owner: &OwnerId,
        params: &dyn WorkerArgs,
    ) -> Result<StartedJob, JobError> {
        let program = &self.inner.program;
        let limits = self.inner.limits;
        let registry = &self.inner.registry;

        if let Some(existing) = registry.lookup(owner) {
            tracing::warn!(
                kind = %program.kind,
                owner = %owner,
                pid = existing.pid,
                "job already running"
            );
            return Err(JobError::already_running(existing));
        }

        program.check_script().map_err(|e| JobError::SpawnFailed {
            reason: format_error_chain(&e),
        })?;

        let argv = program.argv(owner, params);
        tracing::info!(kind = %program.kind, owner = %owner, argv = ?argv, "starting worker");
        let mut cmd = program.command(&argv);

        let (record, mut child) = registry
            .claim(owner, || {
                let child = cmd.spawn()?;
                let pid = child
                    .id()
                    .ok_or_else(|| std::io::Error::other("spawned worker has no pid"))?;
                Ok::<_, std::io::Error>((pid, child))
            })
            .map_err(|e| match e {
                ClaimError::Occupied(existing) => JobError::already_running(existing),
                ClaimError::Spawn(err) => {
                    tracing::error!(kind = %program.kind, owner = %owner, %err, "spawn failed");
                    JobError::SpawnFailed {
                        reason: format!("{}: {err}", program.interpreter.display()),
                    }
                }
            })?;
        let pid = record.pid;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let stderr_tail = Arc::new(Mutex::new(LineTail::new(limits.stderr_tail_lines)));
        let mut readers = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            readers.push(spawn_reader(out, OutputStream::Stdout, tx.clone(), None));
        }
        if let Some(err) = child.stderr.take() {
            readers.push(spawn_reader(
                err,
                OutputStream::Stderr,
                tx.clone(),
                Some(stderr_tail.clone()),
            ));
        }

        tokio::spawn(watch_exit(
            self.clone(),
            owner.clone(),
            pid,
            child,
            readers,
            tx,
            stderr_tail,
        ));

        match tokio::time::timeout(limits.startup_timeout, rx.recv()).await {
            Ok(Some(first)) => Ok(StartedJob {
                record,
                first,
                events: rx,
            }),
            Ok(None) => {
                registry.unregister_pid(owner, pid);
                Err(JobError::SpawnFailed {
                    reason: "worker exited without reporting status".to_string(),
                })
            }
            Err(_) => {
                tracing::warn!(
                    kind = %program.kind,
                    owner = %owner,
                    pid,
                    timeout_ms = limits.startup_timeout.as_millis() as u64,
                    "no worker output before startup timeout; killing"
                );
                if let Err(err) = signal::kill(pid) {
                    tracing::warn!(pid, %err, "kill after startup timeout failed");
                }
                registry.unregister_pid(owner, pid);
                let partial_output = drain_output(&mut rx, PARTIAL_OUTPUT_DRAIN).await;
                Err(JobError::StartupTimeout {
                    waited: limits.startup_timeout,
                    partial_output,
                })
            }
        }
    }
}

fn spawn_reader<R>(
    reader: R,
    stream: OutputStream,
    tx: mpsc::UnboundedSender<JobEvent>,
    tail: Option<Arc<Mutex<LineTail>>>,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    // Blank lines still count as output, so they go through too.
                    let line = decode_line(&buf);
                    if let Some(tail) = tail.as_ref().filter(|_| !line.trim().is_empty()) {
                        tail.lock()
                            .unwrap_or_else(|e| e.into_inner())
                            .push_line(line.clone());
                    }
                    tracing::debug!(?stream, %line, "worker output");
                    // Keep draining with nobody listening so the worker never blocks on a full pipe.
                    let _ = tx.send(JobEvent::Output { stream, line });
                }
                Err(err) => {
                    tracing::debug!(?stream, %err, "worker output read failed");
                    break;
                }
            }
        }
    })
}

fn decode_line(buf: &[u8]) -> String {
    // Best-effort UTF-8.
    String::from_utf8_lossy(buf)
        .trim_end_matches(['\n', '\r'])
        .to_string()
}

async fn watch_exit(
    manager: JobManager,
    owner: OwnerId,
    pid: u32,
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    tx: mpsc::UnboundedSender<JobEvent>,
    stderr_tail: Arc<Mutex<LineTail>>,
) {
    let kind = manager.kind();
    let started = tokio::time::Instant::now();

    let (res, deadline_exceeded) = match manager.limits().max_runtime {
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(res) => (res, false),
            Err(_) => {
                tracing::warn!(
                    kind = %kind,
                    owner = %owner,
                    pid,
                    limit_ms = limit.as_millis() as u64,
                    "worker exceeded run-time cap; killing"
                );
                if let Err(err) = signal::kill(pid) {
                    tracing::warn!(pid, %err, "kill after run-time cap failed");
                    let _ = child.start_kill();
                }
                (child.wait().await, true)
            }
        },
        None => (child.wait().await, false),
    };
    // The pid is reaped now and may be reused; drop the record before draining.
    let removed = manager.registry().unregister_pid(&owner, pid);

    for mut handle in readers {
        if tokio::time::timeout(READER_DRAIN, &mut handle).await.is_err() {
            // Something still holds the pipe open. Stop reading so the exit event stays last.
            handle.abort();
            let _ = handle.await;
        }
    }

    let stderr = stderr_tail
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .joined();

    let exit = match res {
        Ok(status) => JobExit {
            code: status.code(),
            success: status.code() == Some(0) && !deadline_exceeded,
            stderr,
            deadline_exceeded,
        },
        Err(err) => JobExit {
            code: None,
            success: false,
            stderr: format!("wait failed: {err}"),
            deadline_exceeded,
        },
    };

    tracing::info!(
        kind = %kind,
        owner = %owner,
        pid,
        exit_code = ?exit.code,
        success = exit.success,
        deadline_exceeded,
        runtime_ms = started.elapsed().as_millis() as u64,
        unregistered = removed,
        "worker exited"
    );
    let _ = tx.send(JobEvent::Exited(exit));
}

async fn drain_output(rx: &mut mpsc::UnboundedReceiver<JobEvent>, within: Duration) -> Vec<String> {
    let deadline = tokio::time::Instant::now() + within;
    let mut out = Vec::new();
    while let Ok(Some(JobEvent::Output { line, .. })) =
        tokio::time::timeout_at(deadline, rx.recv()).await
    {
        out.push(line);
    }
    out
}

#[cfg(all(test, unix))]
mod tests {
    use std::time::Duration;

    use tgconsole_process::{JobEvent, OutputStream, OwnerId, StopOutcome};

    use crate::error::JobError;
    use crate::manager::JobManager;
    use crate::support::JobLimits;
    use crate::test_support::{NoArgs, fast_limits, next_event, stub_program};
    use crate::worker::AutoChatParams;

    #[test]
    fn decode_line_strips_crlf_and_replaces_invalid_utf8() {
        assert_eq!(super::decode_line(b"hello\r\n"), "hello");
        assert_eq!(super::decode_line(b"a\xffb\n"), "a\u{fffd}b");
    }

    #[tokio::test]
    async fn start_resolves_with_first_line_and_conflicts_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_program(dir.path(), "e2e_worker.sh", "echo started\nexec sleep 30\n");
        let manager = JobManager::new(program, fast_limits());
        let owner = OwnerId::new("u1@example.com");
        let params = AutoChatParams::new(dir.path(), "grp", "src", "2-10").unwrap();

        let job = manager.start(&owner, &params).await.unwrap();
        assert_eq!(
            job.first,
            JobEvent::Output {
                stream: OutputStream::Stdout,
                line: "started".to_string()
            }
        );
        assert_eq!(manager.registry().len(), 1);
        assert_eq!(manager.registry().lookup(&owner).unwrap().pid, job.record.pid);

        let err = manager.start(&owner, &NoArgs).await.unwrap_err();
        match err {
            JobError::JobAlreadyRunning { pid, started_at, .. } => {
                assert_eq!(pid, job.record.pid);
                assert_eq!(started_at, job.record.started_at);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(manager.registry().len(), 1);

        let outcome = manager.stop(&owner).await.unwrap();
        assert_eq!(
            outcome,
            StopOutcome::Stopped {
                pids: vec![job.record.pid],
                errors: vec![]
            }
        );
        assert!(manager.registry().lookup(&owner).is_none());
    }

    #[tokio::test]
    async fn exit_removes_record_and_reports_code() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_program(
            dir.path(),
            "exit_worker.sh",
            "echo hi\necho boom >&2\nexit 3\n",
        );
        let manager = JobManager::new(program, fast_limits());
        let owner = OwnerId::new("exit@example.com");

        let mut job = manager.start(&owner, &NoArgs).await.unwrap();
        let mut exit = None;
        while let Some(ev) = tokio::time::timeout(Duration::from_secs(10), job.events.recv())
            .await
            .unwrap()
        {
            if let JobEvent::Exited(e) = ev {
                exit = Some(e);
            }
        }
        let exit = exit.unwrap();
        assert_eq!(exit.code, Some(3));
        assert!(!exit.success);
        assert!(exit.stderr.contains("boom"));
        assert!(manager.registry().lookup(&owner).is_none());

        // A fresh start is accepted once the old worker is gone.
        let again = manager.start(&owner, &NoArgs).await.unwrap();
        assert_ne!(again.record.pid, 0);
    }

    #[tokio::test]
    async fn clean_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_program(dir.path(), "ok_worker.sh", "echo done\nexit 0\n");
        let manager = JobManager::new(program, fast_limits());
        let owner = OwnerId::new("ok@example.com");

        let mut job = manager.start(&owner, &NoArgs).await.unwrap();
        match next_event(&mut job.events).await {
            JobEvent::Exited(exit) => {
                assert_eq!(exit.code, Some(0));
                assert!(exit.success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn silent_worker_hits_startup_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_program(dir.path(), "silent_worker.sh", "exec sleep 30\n");
        let limits = JobLimits {
            startup_timeout: Duration::from_millis(300),
            ..fast_limits()
        };
        let manager = JobManager::new(program, limits);
        let owner = OwnerId::new("silent@example.com");

        let began = std::time::Instant::now();
        let err = manager.start(&owner, &NoArgs).await.unwrap_err();
        assert!(matches!(err, JobError::StartupTimeout { .. }));
        assert!(began.elapsed() < Duration::from_secs(5));
        assert!(manager.registry().lookup(&owner).is_none());
    }

    #[tokio::test]
    async fn startup_timeout_carries_unterminated_output() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_program(dir.path(), "partial_worker.sh", "printf partial\nexec sleep 30\n");
        let limits = JobLimits {
            startup_timeout: Duration::from_millis(300),
            ..fast_limits()
        };
        let manager = JobManager::new(program, limits);

        let err = manager
            .start(&OwnerId::new("partial@example.com"), &NoArgs)
            .await
            .unwrap_err();
        match err {
            JobError::StartupTimeout { partial_output, .. } => {
                assert_eq!(partial_output, vec!["partial".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_lines_count_as_startup_output() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_program(dir.path(), "blank_worker.sh", "echo\necho '   '\nexec sleep 30\n");
        let limits = JobLimits {
            startup_timeout: Duration::from_millis(500),
            ..fast_limits()
        };
        let manager = JobManager::new(program, limits);
        let owner = OwnerId::new("blank@example.com");

        let job = manager.start(&owner, &NoArgs).await.unwrap();
        assert_eq!(
            job.first,
            JobEvent::Output {
                stream: OutputStream::Stdout,
                line: String::new()
            }
        );
        assert_eq!(manager.registry().lookup(&owner).unwrap().pid, job.record.pid);

        manager.stop(&owner).await.unwrap();
    }

    #[tokio::test]
    async fn record_is_gone_while_output_pipe_is_still_held() {
        let dir = tempfile::tempdir().unwrap();
        // The backgrounded sleep keeps stdout open after the worker itself exits.
        let program = stub_program(dir.path(), "held_worker.sh", "echo up\nsleep 5 &\nexit 0\n");
        let manager = JobManager::new(program, fast_limits());
        let owner = OwnerId::new("held@example.com");

        let job = manager.start(&owner, &NoArgs).await.unwrap();
        let began = std::time::Instant::now();
        while manager.registry().lookup(&owner).is_some() {
            assert!(began.elapsed() < Duration::from_secs(1), "record outlived the worker");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(job.record.pid > 0);

        manager.stop(&owner).await.unwrap();
    }

    #[tokio::test]
    async fn missing_script_fails_without_registering() {
        let dir = tempfile::tempdir().unwrap();
        let mut program = stub_program(dir.path(), "gone_worker.sh", "echo hi\n");
        program.script = dir.path().join("does_not_exist.sh");
        let manager = JobManager::new(program, fast_limits());

        let err = manager
            .start(&OwnerId::new("gone@example.com"), &NoArgs)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::SpawnFailed { .. }));
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn missing_interpreter_fails_without_registering() {
        let dir = tempfile::tempdir().unwrap();
        let mut program = stub_program(dir.path(), "interp_worker.sh", "echo hi\n");
        program.interpreter = "/nonexistent/bin/python3".into();
        let manager = JobManager::new(program, fast_limits());

        let err = manager
            .start(&OwnerId::new("interp@example.com"), &NoArgs)
            .await
            .unwrap_err();
        assert!(matches!(err, JobError::SpawnFailed { .. }));
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn run_time_cap_kills_worker() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_program(dir.path(), "capped_worker.sh", "echo up\nexec sleep 30\n");
        let limits = JobLimits {
            max_runtime: Some(Duration::from_millis(300)),
            ..fast_limits()
        };
        let manager = JobManager::new(program, limits);
        let owner = OwnerId::new("capped@example.com");

        let mut job = manager.start(&owner, &NoArgs).await.unwrap();
        match next_event(&mut job.events).await {
            JobEvent::Exited(exit) => {
                assert!(exit.deadline_exceeded);
                assert!(!exit.success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(manager.registry().lookup(&owner).is_none());
    }

    #[tokio::test]
    async fn concurrent_starts_for_one_owner_spawn_once() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_program(dir.path(), "race_worker.sh", "echo started\nexec sleep 30\n");
        let manager = JobManager::new(program, fast_limits());
        let owner = OwnerId::new("race@example.com");

        let (a, b) = tokio::join!(manager.start(&owner, &NoArgs), manager.start(&owner, &NoArgs));
        let oks = [a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count();
        assert_eq!(oks, 1);
        assert_eq!(manager.registry().len(), 1);

        manager.stop(&owner).await.unwrap();
    }
}
