//! Subprocess helpers: isolated spawning, bounded waits and tree kills

use std::io::{self, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Put the child in its own process group so the whole tree can be killed at once.
pub fn isolate(cmd: &mut Command) {
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }
    #[cfg(windows)]
    {
        use std::os::windows::process::CommandExt;
        const CREATE_NO_WINDOW: u32 = 0x0800_0000;
        cmd.creation_flags(CREATE_NO_WINDOW);
    }
}

/// Kill a process and everything it spawned.
#[cfg(unix)]
pub fn kill_process_tree(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; a stale pid only yields ESRCH.
    let group_killed = unsafe { libc::kill(-pid, libc::SIGKILL) } == 0;
    if !group_killed {
        tracing::debug!(pid, "process group kill failed, killing pid");
        unsafe {
            libc::kill(pid, libc::SIGKILL);
        }
    }
}

/// Kill a process and everything it spawned.
#[cfg(windows)]
pub fn kill_process_tree(pid: u32) {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x0800_0000;

    let pid_str = pid.to_string();
    let tree = Command::new("taskkill")
        .args(["/F", "/T", "/PID", &pid_str])
        .creation_flags(CREATE_NO_WINDOW)
        .output();

    if !matches!(tree, Ok(ref o) if o.status.success()) {
        tracing::debug!(pid, "taskkill /T failed, killing pid only");
        let _ = Command::new("taskkill")
            .args(["/F", "/PID", &pid_str])
            .creation_flags(CREATE_NO_WINDOW)
            .output();
    }
}

#[derive(Debug, Default)]
struct CancelState {
    cancelled: AtomicBool,
    pid: Mutex<Option<u32>>,
}

/// Cooperative cancellation for one job: a flag plus the live child pid.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<CancelState>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the flag and kill the live process tree, if any
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let pid = *self
            .inner
            .pid
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(pid) = pid {
            tracing::info!(pid, "killing ffmpeg process tree");
            kill_process_tree(pid);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register a freshly spawned child. Kills it at once if cancel already happened.
    pub fn attach(&self, pid: u32) {
        *self
            .inner
            .pid
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(pid);
        if self.is_cancelled() {
            kill_process_tree(pid);
        }
    }

    pub fn detach(&self) {
        *self
            .inner
            .pid
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// Captured result of a bounded run
#[derive(Debug)]
pub struct BoundedOutput {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf);
        }
        String::from_utf8_lossy(&buf).to_string()
    })
}

/// Run a command to completion, killing it after `timeout` or when `cancel` fires.
/// Returns `Ok(None)` when the deadline passed or the run was cancelled.
pub fn run_with_timeout(
    cmd: &mut Command,
    timeout: Duration,
    cancel: &CancelToken,
) -> io::Result<Option<BoundedOutput>> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    isolate(cmd);

    let mut child: Child = cmd.spawn()?;
    cancel.attach(child.id());
    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let deadline = Instant::now() + timeout;
    let status = loop {
        // A cancelled run reports None even if the kill already reaped it
        if cancel.is_cancelled() || Instant::now() >= deadline {
            kill_process_tree(child.id());
            let _ = child.kill();
            let _ = child.wait();
            break Ok(None);
        }
        match child.try_wait() {
            Ok(Some(status)) => break Ok(Some(status)),
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => break Err(e),
        }
    };
    cancel.detach();
    let status = status?;

    let stdout = stdout.join().unwrap_or_default();
    let stderr = stderr.join().unwrap_or_default();

    Ok(status.map(|status| BoundedOutput {
        status,
        stdout,
        stderr,
    }))
}
