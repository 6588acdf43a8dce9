use tgconsole_process::{OwnerId, StatusReport};

use crate::manager::JobManager;
use crate::scan::scan_blocking;

impl JobManager {
    /// Diagnostic snapshot. The OS listing is not filtered by owner.
    pub async fn status(&self, owner: &OwnerId) -> StatusReport {
        let registry = self.registry();
        let tracked = registry.lookup(owner);
        let all_tracked = registry.list_all();

        let signature = self.program().signature();
        let os_matching = scan_blocking(self.inner.scanner.clone(), signature.clone())
            .await
            .unwrap_or_else(|err| {
                tracing::warn!(kind = %self.kind(), %signature, %err, "process scan failed");
                Vec::new()
            });

        StatusReport {
            owner_id: owner.clone(),
            tracked,
            all_tracked,
            os_matching,
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::sync::Arc;

    use tgconsole_process::{OsProcess, OwnerId};

    use crate::manager::JobManager;
    use crate::test_support::{FakeScanner, fast_limits, stub_program};

    fn proc(pid: u32, script: &str, owner: &str) -> OsProcess {
        OsProcess::new(
            pid,
            vec![
                "python3".to_string(),
                script.to_string(),
                "--user-email".to_string(),
                owner.to_string(),
            ],
        )
    }

    #[tokio::test]
    async fn report_combines_registry_and_scan() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_program(dir.path(), "status_worker.sh", "echo hi\n");
        let scanner = FakeScanner {
            procs: vec![
                proc(41, "status_worker.sh", "a@example.com"),
                proc(42, "status_worker.sh", "b@example.com"),
                proc(43, "other.py", "a@example.com"),
            ],
            ..FakeScanner::default()
        };
        let manager = JobManager::with_scanner(program, fast_limits(), Arc::new(scanner));
        let a = OwnerId::new("a@example.com");
        let b = OwnerId::new("b@example.com");
        manager.registry().register(&a, 41).unwrap();
        manager.registry().register(&b, 42).unwrap();

        let report = manager.status(&a).await;
        assert_eq!(report.owner_id, a);
        assert_eq!(report.tracked.as_ref().map(|r| r.pid), Some(41));
        assert_eq!(report.all_tracked.len(), 2);
        let pids: Vec<u32> = report.os_matching.iter().map(|p| p.pid).collect();
        assert_eq!(pids, vec![41, 42]);
        assert!(report.os_matching[0].command_line.ends_with("--user-email a@example.com"));

        // Read-only.
        assert_eq!(manager.registry().len(), 2);
    }

    #[tokio::test]
    async fn scan_failure_yields_empty_listing() {
        let dir = tempfile::tempdir().unwrap();
        let program = stub_program(dir.path(), "status_fail_worker.sh", "echo hi\n");
        let scanner = FakeScanner {
            fail: true,
            ..FakeScanner::default()
        };
        let manager = JobManager::with_scanner(program, fast_limits(), Arc::new(scanner));

        let report = manager.status(&OwnerId::new("nobody@example.com")).await;
        assert!(report.tracked.is_none());
        assert!(report.all_tracked.is_empty());
        assert!(report.os_matching.is_empty());
    }
}
