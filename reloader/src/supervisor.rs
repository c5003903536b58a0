/// Owns the single managed child process.
///
/// The command runs through the platform shell as the leader of a new session,
/// and so of a new process group.  A stop reaches every descendant (dev servers
/// love to fork), and the child is never a background job of our terminal, so
/// touching the tty does not stop it.  Stopping is SIGTERM to the group, a
/// bounded wait for the whole group, then SIGKILL to the group.
///
/// When a readiness pattern is configured the child's stdout/stderr are piped
/// through the supervisor: every line is forwarded to our own streams and
/// matched against the pattern.
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

use crate::controller::ProcessControl;

/// How long a child gets to exit after SIGTERM before the group is killed.
pub const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// How often a stop re-checks a group whose leader is already gone.
#[cfg(unix)]
const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(20);

struct ManagedChild {
    child: Child,
    /// Process-group id; equal to the leader's pid.
    pgid: Option<i32>,
    /// The leader has exited on its own and its status was logged.
    exited: bool,
    /// Set by the output forwarders once the readiness pattern matches.
    output_ready: Arc<AtomicBool>,
}

pub struct ProcessSupervisor {
    command: String,
    ready_pattern: Option<Regex>,
    stop_timeout: Duration,
    current: Option<ManagedChild>,
}

impl ProcessSupervisor {
    pub fn new(command: impl Into<String>, ready_pattern: Option<Regex>) -> Self {
        Self {
            command: command.into(),
            ready_pattern,
            stop_timeout: STOP_TIMEOUT,
            current: None,
        }
    }

    #[cfg(test)]
    pub fn with_stop_timeout(mut self, stop_timeout: Duration) -> Self {
        self.stop_timeout = stop_timeout;
        self
    }

    #[cfg(test)]
    pub fn is_running(&self) -> bool {
        self.current.as_ref().is_some_and(|c| !c.exited)
    }

    /// Launches the command, stopping any previous instance first.
    pub async fn start(&mut self) -> bool {
        self.stop().await;

        info!(command = %self.command, "Starting");
        let mut cmd = shell_command(&self.command);
        if self.ready_pattern.is_some() {
            cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                error!("Failed to start process: {e}");
                return false;
            }
        };

        let output_ready = Arc::new(AtomicBool::new(false));
        if let Some(pattern) = &self.ready_pattern {
            if let Some(stdout) = child.stdout.take() {
                tokio::spawn(forward_output(
                    stdout,
                    tokio::io::stdout(),
                    pattern.clone(),
                    Arc::clone(&output_ready),
                ));
            }
            if let Some(stderr) = child.stderr.take() {
                tokio::spawn(forward_output(
                    stderr,
                    tokio::io::stderr(),
                    pattern.clone(),
                    Arc::clone(&output_ready),
                ));
            }
        }

        let pgid = child.id().and_then(|id| i32::try_from(id).ok());
        debug!(pgid = ?pgid, "Process started");
        self.current = Some(ManagedChild {
            child,
            pgid,
            exited: false,
            output_ready,
        });
        true
    }

    /// Stops the current child, if any.
    pub async fn stop(&mut self) {
        let Some(mut managed) = self.current.take() else {
            return;
        };
        info!("Stopping process...");

        #[cfg(unix)]
        {
            let Some(pgid) = managed.pgid.filter(|p| *p > 1) else {
                warn!("Process has no usable group id; killing the leader only");
                let _ = managed.child.kill().await;
                return;
            };

            match imp::signal_group(pgid, libc::SIGTERM) {
                Ok(()) => {}
                Err(e) if imp::is_gone(&e) => {
                    let _ = managed.child.try_wait();
                    return;
                }
                Err(e) => {
                    error!("Error stopping process: {e}");
                    return;
                }
            }

            let deadline = tokio::time::Instant::now() + self.stop_timeout;
            match tokio::time::timeout_at(deadline, managed.child.wait()).await {
                Ok(Ok(status)) => debug!(%status, "Process stopped"),
                Ok(Err(e)) => error!("Error waiting for process: {e}"),
                Err(_) => {}
            }

            // The leader may be gone while descendants still hold the group.
            while imp::group_alive(pgid) {
                if tokio::time::Instant::now() >= deadline {
                    warn!("Process didn't exit, sending SIGKILL...");
                    if let Err(e) = imp::signal_group(pgid, libc::SIGKILL) {
                        if !imp::is_gone(&e) {
                            error!("Error killing process group: {e}");
                        }
                    }
                    break;
                }
                tokio::time::sleep(GROUP_POLL_INTERVAL).await;
            }
            let _ = managed.child.wait().await;
        }

        #[cfg(not(unix))]
        {
            if let Err(e) = managed.child.start_kill() {
                if e.kind() != std::io::ErrorKind::InvalidInput {
                    error!("Error stopping process: {e}");
                }
            }
            let _ = managed.child.wait().await;
        }
    }

    pub fn output_ready(&self) -> bool {
        self.current
            .as_ref()
            .is_some_and(|c| c.output_ready.load(Ordering::Acquire))
    }

    /// Logs the exit of a child that terminated without being stopped.
    pub fn reap(&mut self) {
        let Some(managed) = self.current.as_mut().filter(|c| !c.exited) else {
            return;
        };
        match managed.child.try_wait() {
            Ok(Some(status)) => {
                info!(%status, "Process exited");
                managed.exited = true;
            }
            Ok(None) => {}
            Err(e) => warn!("Failed to poll process status: {e}"),
        }
    }
}

impl ProcessControl for ProcessSupervisor {
    async fn start(&mut self) -> bool {
        ProcessSupervisor::start(self).await
    }

    async fn stop(&mut self) {
        ProcessSupervisor::stop(self).await
    }

    fn output_ready(&self) -> bool {
        ProcessSupervisor::output_ready(self)
    }

    fn reap(&mut self) {
        ProcessSupervisor::reap(self)
    }
}

/// Builds a shell invocation of `command` that leads its own session.
fn shell_command(command: &str) -> Command {
    #[cfg(unix)]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        // SAFETY: setsid(2) is async-signal-safe and only affects the child.
        unsafe {
            cmd.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        cmd
    }
    #[cfg(not(unix))]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
}

/// Copies `reader` to `writer` line by line, raising `ready` on the first line
/// that matches `pattern`.  Ends when the child closes the stream.
async fn forward_output<R, W>(reader: R, mut writer: W, pattern: Regex, ready: Arc<AtomicBool>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        match reader.read_until(b'\n', &mut line).await {
            Ok(0) => break,
            Ok(_) => {
                // Keep scanning even if our own stream went away.
                if writer.write_all(&line).await.is_ok() {
                    let _ = writer.flush().await;
                }
                if !ready.load(Ordering::Acquire)
                    && pattern.is_match(String::from_utf8_lossy(&line).trim_end())
                {
                    debug!("Readiness pattern matched");
                    ready.store(true, Ordering::Release);
                }
            }
            Err(e) => {
                debug!("Output stream closed: {e}");
                break;
            }
        }
    }
}

#[cfg(unix)]
mod imp {
    use std::io;

    /// Sends `signal` to every process in group `pgid`.
    pub fn signal_group(pgid: i32, signal: libc::c_int) -> io::Result<()> {
        // SAFETY: kill(2) only delivers a signal; a negative pid addresses the group.
        let rc = unsafe { libc::kill(-pgid, signal) };
        if rc == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    /// Signal 0 probes the group without delivering anything.
    pub fn group_alive(pgid: i32) -> bool {
        signal_group(pgid, 0).is_ok()
    }

    /// ESRCH: the group no longer has any members.
    pub fn is_gone(err: &io::Error) -> bool {
        err.raw_os_error() == Some(libc::ESRCH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    // ── forward_output ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn forward_output_copies_lines_and_flags_match() {
        let input: &[u8] = b"compiling\nListening on 8080\nrequest\n";
        let mut out = Vec::new();
        let ready = Arc::new(AtomicBool::new(false));

        forward_output(input, &mut out, Regex::new(r"Listening on \d+").unwrap(), Arc::clone(&ready)).await;

        assert_eq!(out, input);
        assert!(ready.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn forward_output_without_match_stays_unready() {
        let input: &[u8] = b"still compiling\nno trailing newline";
        let mut out = Vec::new();
        let ready = Arc::new(AtomicBool::new(false));

        forward_output(input, &mut out, Regex::new("^ready$").unwrap(), Arc::clone(&ready)).await;

        assert_eq!(out, input);
        assert!(!ready.load(Ordering::Acquire));
    }

    // ── stop ──────────────────────────────────────────────────────────────────

    #[tokio::test]
    async fn stop_without_child_is_a_noop() {
        let mut sup = ProcessSupervisor::new("true", None);
        sup.stop().await;
        sup.stop().await;
        assert!(!sup.is_running());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn start_then_stop_terminates_child() {
        let mut sup = ProcessSupervisor::new("exec sleep 30", None);
        assert!(sup.start().await);
        assert!(sup.is_running());

        let started = Instant::now();
        sup.stop().await;
        assert!(!sup.is_running());
        assert!(started.elapsed() < STOP_TIMEOUT);

        // Second stop has nothing to do.
        sup.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn restart_replaces_previous_child() {
        let mut sup = ProcessSupervisor::new("sleep 30", None);
        assert!(sup.start().await);
        let first = sup.current.as_ref().and_then(|c| c.pgid);
        assert!(sup.start().await);
        let second = sup.current.as_ref().and_then(|c| c.pgid);
        assert_ne!(first, second);
        sup.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_escalates_to_sigkill_when_term_is_ignored() {
        let mut sup = ProcessSupervisor::new("trap '' TERM; sleep 30", None)
            .with_stop_timeout(Duration::from_millis(200));
        assert!(sup.start().await);
        // Let the shell install its trap before signalling.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = Instant::now();
        sup.stop().await;
        assert!(!sup.is_running());
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_reaches_background_descendants() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let command = format!("sleep 30 & echo $! > '{}'; wait", pid_file.display());
        let mut sup = ProcessSupervisor::new(command, None);
        assert!(sup.start().await);

        let pid = wait_for_pid(&pid_file).await;

        sup.stop().await;

        let mut alive = true;
        for _ in 0..100 {
            alive = is_alive(pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "background sleep survived the group stop");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn stop_kills_descendants_after_leader_already_exited() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("pid");
        let command = format!("trap '' TERM; sleep 30 & echo $! > '{}'", pid_file.display());
        let mut sup = ProcessSupervisor::new(command, None)
            .with_stop_timeout(Duration::from_millis(200));
        assert!(sup.start().await);

        let pid = wait_for_pid(&pid_file).await;
        for _ in 0..100 {
            sup.reap();
            if !sup.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!sup.is_running(), "shell should have exited on its own");
        assert!(is_alive(pid));

        sup.stop().await;

        let mut alive = true;
        for _ in 0..100 {
            alive = is_alive(pid);
            if !alive {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!alive, "TERM-ignoring descendant survived the stop");
    }

    #[cfg(unix)]
    async fn wait_for_pid(pid_file: &std::path::Path) -> i32 {
        for _ in 0..50 {
            if let Ok(text) = std::fs::read_to_string(pid_file) {
                if let Ok(pid) = text.trim().parse::<i32>() {
                    return pid;
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("background pid was not written");
    }

    /// Zombies count as dead: the orphaned sleep may wait on a lazy reaper.
    #[cfg(unix)]
    fn is_alive(pid: i32) -> bool {
        // SAFETY: signal 0 only checks for existence.
        if unsafe { libc::kill(pid, 0) } != 0 {
            return false;
        }
        match std::fs::read_to_string(format!("/proc/{pid}/stat")) {
            Ok(stat) => stat
                .rsplit_once(')')
                .and_then(|(_, rest)| rest.trim_start().chars().next())
                .map_or(true, |state| state != 'Z'),
            Err(_) => true,
        }
    }

    // ── session ───────────────────────────────────────────────────────────────

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn child_leads_its_own_session() {
        let mut sup = ProcessSupervisor::new("exec sleep 30", None);
        assert!(sup.start().await);
        let pid = sup.current.as_ref().and_then(|c| c.pgid).unwrap();

        // SAFETY: getsid only reads process metadata.
        let sid = unsafe { libc::getsid(pid) };
        assert_eq!(sid, pid);
        assert_ne!(sid, unsafe { libc::getsid(0) });

        sup.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn child_can_configure_the_terminal() {
        let dir = tempfile::tempdir().unwrap();
        let marker = dir.path().join("done");
        // Under a controlling tty a background job would be stopped by SIGTTOU here.
        let command = format!("stty sane 2>/dev/null; touch '{}'", marker.display());
        let mut sup = ProcessSupervisor::new(command, None);
        assert!(sup.start().await);

        for _ in 0..100 {
            if marker.exists() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(marker.exists());

        let started = Instant::now();
        sup.stop().await;
        assert!(started.elapsed() < STOP_TIMEOUT);
    }

    // ── reap / readiness ──────────────────────────────────────────────────────

    #[cfg(unix)]
    #[tokio::test]
    async fn reap_notices_child_that_exits_on_its_own() {
        let mut sup = ProcessSupervisor::new("true", None);
        assert!(sup.start().await);

        for _ in 0..100 {
            sup.reap();
            if !sup.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(!sup.is_running());
        // Stopping an exited child is still fine.
        sup.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn output_pattern_marks_launch_ready() {
        let pattern = Regex::new(r"server up on \d+").unwrap();
        let mut sup = ProcessSupervisor::new("echo 'server up on 4000'; sleep 30", Some(pattern));
        assert!(sup.start().await);

        let mut ready = false;
        for _ in 0..100 {
            if sup.output_ready() {
                ready = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(ready);

        sup.stop().await;
        assert!(!sup.output_ready());
    }
}
