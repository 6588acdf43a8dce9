//! Forceful termination of worker processes.

#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("process {0} already exited")]
    AlreadyExited(u32),
    #[error("permission denied signalling process {0}")]
    PermissionDenied(u32),
    #[error("invalid pid {0}")]
    InvalidPid(u32),
    #[error("failed to signal process {pid}: {source}")]
    Os {
        pid: u32,
        #[source]
        source: std::io::Error,
    },
}

/// SIGKILL the process group led by `pid`, or `pid` alone when it leads no group.
///
/// Workers are spawned with `setsid`, so the group covers anything they forked.
#[cfg(unix)]
pub fn kill(pid: u32) -> Result<(), SignalError> {
    // pid 0 / negative values would address our own group or every process.
    let raw = match i32::try_from(pid) {
        Ok(v) if v > 0 => v,
        _ => return Err(SignalError::InvalidPid(pid)),
    };

    let rc = unsafe { libc::kill(-raw, libc::SIGKILL) };
    if rc == 0 {
        return Ok(());
    }
    let group_err = std::io::Error::last_os_error();
    if group_err.raw_os_error() != Some(libc::ESRCH) {
        return Err(classify(pid, group_err));
    }

    let rc = unsafe { libc::kill(raw, libc::SIGKILL) };
    if rc == 0 {
        return Ok(());
    }
    Err(classify(pid, std::io::Error::last_os_error()))
}

#[cfg(unix)]
fn classify(pid: u32, err: std::io::Error) -> SignalError {
    match err.raw_os_error() {
        Some(libc::ESRCH) => SignalError::AlreadyExited(pid),
        Some(libc::EPERM) => SignalError::PermissionDenied(pid),
        _ => SignalError::Os { pid, source: err },
    }
}

#[cfg(not(unix))]
pub fn kill(pid: u32) -> Result<(), SignalError> {
    use sysinfo::{Pid, System};

    if pid == 0 {
        return Err(SignalError::InvalidPid(pid));
    }
    let mut sys = System::new();
    let spid = Pid::from_u32(pid);
    if !sys.refresh_process(spid) {
        return Err(SignalError::AlreadyExited(pid));
    }
    match sys.process(spid) {
        Some(p) if p.kill() => Ok(()),
        Some(_) => Err(SignalError::PermissionDenied(pid)),
        None => Err(SignalError::AlreadyExited(pid)),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn rejects_pid_zero() {
        assert!(matches!(kill(0), Err(SignalError::InvalidPid(0))));
        assert!(matches!(kill(u32::MAX), Err(SignalError::InvalidPid(_))));
    }

    #[test]
    fn kills_live_child() {
        let mut child = std::process::Command::new("/bin/sh")
            .args(["-c", "sleep 30"])
            .spawn()
            .unwrap();
        kill(child.id()).unwrap();
        let status = child.wait().unwrap();
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(status.signal(), Some(libc::SIGKILL));
    }

    #[test]
    fn reaped_pid_reports_already_exited() {
        let mut child = std::process::Command::new("/bin/sh")
            .args(["-c", "exit 0"])
            .spawn()
            .unwrap();
        let pid = child.id();
        child.wait().unwrap();
        assert!(matches!(kill(pid), Err(SignalError::AlreadyExited(p)) if p == pid));
    }
}
