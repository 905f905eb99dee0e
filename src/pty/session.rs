//! Runtime processes attached to a pseudo-terminal.

use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};

use super::PtyError;

/// Terminal type exported to the child when the environment has none.
pub const DEFAULT_TERM: &str = "xterm-256color";
/// Terminal height used when `LINES` is absent.
pub const DEFAULT_LINES: u16 = 24;
/// Terminal width used when `COLUMNS` is absent.
pub const DEFAULT_COLUMNS: u16 = 80;

/// Interval between liveness polls while waiting for a child to exit.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// How long to wait for the reap after a forceful kill.
const KILL_REAP_TIMEOUT: Duration = Duration::from_secs(1);

/// What to run: argv, working directory and environment overlay.
///
/// A session is immutable once handed to [`PtyProcess::spawn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    argv: Vec<String>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
}

impl Session {
    /// Create a session for the given argv.
    #[must_use]
    pub fn new(argv: Vec<String>) -> Self {
        Self {
            argv,
            cwd: None,
            env: BTreeMap::new(),
        }
    }

    /// Set the working directory of the child.
    #[must_use]
    pub fn cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Add variables to the child's environment overlay.
    #[must_use]
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(vars.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    #[must_use]
    pub fn program(&self) -> &str {
        self.argv.first().map_or("", String::as_str)
    }

    fn size(&self) -> PtySize {
        let dimension = |key: &str, default: u16| {
            self.env
                .get(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or(default)
        };
        PtySize {
            rows: dimension("LINES", DEFAULT_LINES),
            cols: dimension("COLUMNS", DEFAULT_COLUMNS),
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    fn command(&self) -> Result<CommandBuilder, PtyError> {
        let mut cmd = CommandBuilder::from_argv(self.argv.iter().map(Into::into).collect());
        let cwd = match &self.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir()?,
        };
        cmd.cwd(cwd);
        for (key, value) in &self.env {
            cmd.env(key, value);
        }

        let lines = DEFAULT_LINES.to_string();
        let columns = DEFAULT_COLUMNS.to_string();
        for (key, value) in [
            ("TERM", DEFAULT_TERM),
            ("LINES", lines.as_str()),
            ("COLUMNS", columns.as_str()),
        ] {
            if cmd.get_env(key).is_none() {
                cmd.env(key, value);
            }
        }
        Ok(cmd)
    }
}

/// A spawned runtime and the master side of its PTY.
///
/// Shared between the supervisor and the reader thread. Every method takes a
/// short lock, so liveness probes never wait on a blocking read.
pub struct PtyProcess {
    pid: Option<u32>,
    child: Mutex<Box<dyn Child + Send + Sync>>,
    exit_code: Mutex<Option<i32>>,
    reader: Mutex<Option<Box<dyn Read + Send>>>,
    writer: Mutex<Option<Box<dyn Write + Send>>>,
    // Held so the PTY stays open for the lifetime of the process handle.
    _master: Mutex<Box<dyn MasterPty + Send>>,
}

impl std::fmt::Debug for PtyProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyProcess")
            .field("pid", &self.pid)
            .field("exit_code", &*self.exit_code.lock())
            .finish_non_exhaustive()
    }
}

impl PtyProcess {
    /// Allocate a PTY and exec the session's argv in it.
    ///
    /// # Errors
    ///
    /// Returns `PtyError::Open` if no PTY can be allocated and
    /// `PtyError::Spawn` if fork/exec fails.
    pub fn spawn(session: &Session) -> Result<Self, PtyError> {
        if session.argv.is_empty() {
            return Err(PtyError::Spawn {
                program: String::new(),
                message: "empty argv".to_string(),
            });
        }

        let pair = native_pty_system()
            .openpty(session.size())
            .map_err(|e| PtyError::Open(e.to_string()))?;

        let spawn_err = |e: &dyn std::fmt::Display| PtyError::Spawn {
            program: session.program().to_string(),
            message: e.to_string(),
        };

        let child = pair
            .slave
            .spawn_command(session.command()?)
            .map_err(|e| spawn_err(&e))?;
        drop(pair.slave);

        let master = pair.master;
        let reader = master.try_clone_reader().map_err(|e| spawn_err(&e))?;
        let writer = master.take_writer().map_err(|e| spawn_err(&e))?;
        let pid = child.process_id();

        tracing::debug!(pid = ?pid, program = %session.program(), "Spawned runtime on pty");

        Ok(Self {
            pid,
            child: Mutex::new(child),
            exit_code: Mutex::new(None),
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            _master: Mutex::new(master),
        })
    }

    /// OS process id of the child, if known.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit code recorded when the child was reaped.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_code.lock()
    }

    /// Take the master reader. Only the first call returns it.
    pub fn take_reader(&self) -> Option<Box<dyn Read + Send>> {
        self.reader.lock().take()
    }

    /// Non-blocking liveness probe.
    ///
    /// An exited child is reaped here and its exit code recorded.
    pub fn probe_alive(&self) -> bool {
        if self.exit_code.lock().is_some() {
            return false;
        }
        let status = self.child.lock().try_wait();
        match status {
            Ok(None) => true,
            Ok(Some(status)) => {
                let code = i32::try_from(status.exit_code()).unwrap_or(i32::MAX);
                *self.exit_code.lock() = Some(code);
                false
            }
            Err(e) => {
                tracing::warn!(pid = ?self.pid, error = %e, "Liveness probe failed");
                false
            }
        }
    }

    /// Poll until the child exits or `timeout` elapses, blocking the thread.
    ///
    /// Returns the exit code, or `None` if the child is still alive.
    pub fn reap_blocking(&self, timeout: Duration) -> Option<i32> {
        let deadline = Instant::now() + timeout;
        while self.probe_alive() {
            if Instant::now() >= deadline {
                return None;
            }
            std::thread::sleep(POLL_INTERVAL);
        }
        self.exit_code()
    }

    /// Write a line of input, appending a newline if `text` lacks one.
    ///
    /// # Errors
    ///
    /// Returns `PtyError::Closed` after [`close_writer`](Self::close_writer),
    /// or `PtyError::Io` if the write fails.
    pub fn write(&self, text: &str) -> Result<(), PtyError> {
        let mut guard = self.writer.lock();
        let writer = guard.as_mut().ok_or(PtyError::Closed)?;
        writer.write_all(text.as_bytes())?;
        if !text.ends_with('\n') {
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Drop the writer so no further input reaches the child.
    pub fn close_writer(&self) {
        self.writer.lock().take();
    }

    /// Forcefully kill the child without waiting.
    ///
    /// A child that was already reaped is left alone so a recycled pid is
    /// never signalled.
    pub fn kill(&self) {
        if self.exit_code().is_some() {
            return;
        }
        self.force_kill();
    }

    /// Kill whatever is left of the child's process group.
    ///
    /// The child leads its own session, so background jobs it started stay
    /// in its group and may keep the PTY slave open after it exits.
    pub fn kill_process_group(&self) {
        #[cfg(unix)]
        self.signal(nix::sys::signal::Signal::SIGKILL, true);
    }

    /// Terminate the child: graceful signal, bounded wait, then kill.
    ///
    /// On Unix, sends SIGTERM to the child's process group and polls for up
    /// to `grace_period` before escalating to SIGKILL. On other platforms,
    /// kills immediately. Leftover group members are killed once the child
    /// is gone. Signal delivery errors are logged and never abort the
    /// escalation.
    pub async fn terminate(&self, grace_period: Duration) -> Option<i32> {
        if !self.probe_alive() {
            self.kill_process_group();
            self.close_writer();
            return self.exit_code();
        }

        self.signal_terminate();
        let deadline = Instant::now() + grace_period;
        while self.probe_alive() {
            if Instant::now() >= deadline {
                tracing::debug!(pid = ?self.pid, "Grace period elapsed, killing runtime");
                self.kill();
                break;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        let deadline = Instant::now() + KILL_REAP_TIMEOUT;
        while self.probe_alive() && Instant::now() < deadline {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        self.kill_process_group();
        self.close_writer();
        self.exit_code()
    }

    #[cfg(unix)]
    fn force_kill(&self) {
        self.signal(nix::sys::signal::Signal::SIGKILL, false);
    }

    #[cfg(not(unix))]
    fn force_kill(&self) {
        use portable_pty::ChildKiller;

        if let Err(e) = self.child.lock().kill() {
            tracing::debug!(pid = ?self.pid, error = %e, "Kill failed");
        }
    }

    #[cfg(unix)]
    fn signal_terminate(&self) {
        self.signal(nix::sys::signal::Signal::SIGTERM, true);
    }

    #[cfg(not(unix))]
    fn signal_terminate(&self) {
        self.force_kill();
    }

    #[cfg(unix)]
    fn signal(&self, signal: nix::sys::signal::Signal, whole_group: bool) {
        use nix::errno::Errno;
        use nix::sys::signal::{kill, killpg};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return;
        };
        let pid = Pid::from_raw(pid);
        let result = if whole_group {
            killpg(pid, signal)
        } else {
            kill(pid, signal)
        };
        match result {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(e) => {
                tracing::debug!(pid = %pid, signal = %signal, error = %e, "Signal delivery failed");
            }
        }
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.probe_alive() {
            self.kill();
            self.reap_blocking(KILL_REAP_TIMEOUT);
        }
    }
}
