//! The subject under test, seen as a process.
//!
//! Runners only talk to the [`Subject`] trait; [`ProcessSubject`] is the real
//! implementation that spawns the lwAFTR binary. Tests substitute their own.

use std::ffi::{OsStr, OsString};
use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};

/// How a subject process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Exit {
    Code(i32),
    Signal(i32),
}

impl Exit {
    pub fn success(self) -> bool {
        self == Exit::Code(0)
    }
}

impl From<ExitStatus> for Exit {
    fn from(status: ExitStatus) -> Self {
        match status.code() {
            Some(code) => Exit::Code(code),
            None => Exit::Signal(status.signal().unwrap_or(0)),
        }
    }
}

impl fmt::Display for Exit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Exit::Code(c) => write!(f, "{c}"),
            Exit::Signal(s) => write!(f, "signal {s}"),
        }
    }
}

/// Arguments of one subject invocation, starting at the subcommand
/// (`check`, `soaktest`, ...). The binary and program prefix are supplied by
/// the [`Subject`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    args: Vec<OsString>,
}

impl Invocation {
    pub fn new(subcommand: &str) -> Self {
        Self {
            args: vec![subcommand.into()],
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_owned());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_owned()));
        self
    }

    /// Insert `arg` at `index`, where index 0 is the subcommand.
    pub fn insert(mut self, index: usize, arg: impl AsRef<OsStr>) -> Self {
        let index = index.min(self.args.len());
        self.args.insert(index, arg.as_ref().to_owned());
        self
    }

    pub fn subcommand(&self) -> Option<&OsStr> {
        self.args.first().map(OsString::as_os_str)
    }

    pub fn as_slice(&self) -> &[OsString] {
        &self.args
    }

    pub fn contains(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Replace every `{pid}` token with `pid`.
    pub fn with_pid(&self, pid: u32) -> Self {
        let pid = pid.to_string();
        Self {
            args: self
                .args
                .iter()
                .map(|a| match a.to_str() {
                    Some(s) if s.contains("{pid}") => s.replace("{pid}", &pid).into(),
                    _ => a.clone(),
                })
                .collect(),
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for arg in &self.args {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            write!(f, "{}", arg.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Output of a foreground invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Captured {
    pub exit: Exit,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl Captured {
    pub fn stdout_str(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stdout_lines(&self) -> usize {
        self.stdout_str().lines().count()
    }

    pub fn stdout_contains(&self, needle: &str) -> bool {
        self.stdout_str().contains(needle)
    }
}

/// A subject process running in the background.
pub trait Background: Send {
    fn pid(&self) -> u32;

    /// Non-blocking exit check.
    fn try_wait(&mut self) -> Result<Option<Exit>>;

    /// Ask the process to exit, escalating to a kill after `grace`.
    /// Must be safe to call on a process that already exited.
    fn terminate(&mut self, grace: Duration) -> Result<()>;
}

/// Capability to run the subject under test.
pub trait Subject {
    /// Run to completion, inheriting stdio.
    fn execute(&self, invocation: &Invocation) -> Result<Exit>;

    /// Run to completion, capturing stdout and stderr.
    fn capture(&self, invocation: &Invocation) -> Result<Captured>;

    /// Start detached and return immediately.
    fn spawn_background(&self, invocation: &Invocation) -> Result<Box<dyn Background>>;

    /// Human-readable command line for diagnostics.
    fn describe(&self, invocation: &Invocation) -> String {
        invocation.to_string()
    }
}

/// Runs the real subject binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessSubject {
    binary: PathBuf,
    program: Vec<String>,
}

impl ProcessSubject {
    pub fn new(binary: impl Into<PathBuf>, program: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            program,
        }
    }

    pub fn from_config(cfg: &HarnessConfig) -> Self {
        Self::new(&cfg.subject_bin, cfg.program.clone())
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    fn command(&self, invocation: &Invocation) -> Command {
        let mut cmd = Command::new(&self.binary);
        cmd.args(&self.program).args(invocation.as_slice());
        cmd
    }

    fn spawn_error(&self, invocation: &Invocation, source: std::io::Error) -> HarnessError {
        HarnessError::Spawn {
            command: self.describe(invocation),
            source,
        }
    }
}

impl Subject for ProcessSubject {
    fn execute(&self, invocation: &Invocation) -> Result<Exit> {
        tracing::debug!(cmd = %self.describe(invocation), "running subject");
        let status = self
            .command(invocation)
            .status()
            .map_err(|e| self.spawn_error(invocation, e))?;
        Ok(status.into())
    }

    fn capture(&self, invocation: &Invocation) -> Result<Captured> {
        tracing::debug!(cmd = %self.describe(invocation), "running subject (captured)");
        let output = self
            .command(invocation)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| self.spawn_error(invocation, e))?;
        Ok(Captured {
            exit: output.status.into(),
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }

    fn spawn_background(&self, invocation: &Invocation) -> Result<Box<dyn Background>> {
        tracing::info!(cmd = %self.describe(invocation), "spawning subject daemon");
        let child = self
            .command(invocation)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.spawn_error(invocation, e))?;
        Ok(Box::new(ChildProcess { child, exit: None }))
    }

    fn describe(&self, invocation: &Invocation) -> String {
        let mut parts = vec![self.binary.display().to_string()];
        parts.extend(self.program.iter().cloned());
        parts.push(invocation.to_string());
        parts.join(" ")
    }
}

/// [`Background`] wrapper around a [`Child`].
struct ChildProcess {
    child: Child,
    exit: Option<Exit>,
}

impl Background for ChildProcess {
    fn pid(&self) -> u32 {
        self.child.id()
    }

    fn try_wait(&mut self) -> Result<Option<Exit>> {
        if self.exit.is_none() {
            let status = self
                .child
                .try_wait()
                .map_err(|e| HarnessError::io("polling daemon", e))?;
            self.exit = status.map(Exit::from);
        }
        Ok(self.exit)
    }

    fn terminate(&mut self, grace: Duration) -> Result<()> {
        if self.try_wait()?.is_some() {
            return Ok(());
        }

        let pid = self.child.id() as libc::pid_t;
        // SAFETY: `pid` is our own unreaped child, so it cannot have been
        // recycled. Worst case the process already exited and kill returns
        // ESRCH.
        unsafe {
            libc::kill(pid, libc::SIGTERM);
        }

        match wait_with_timeout(&mut self.child, grace) {
            Ok(status) => {
                tracing::info!(pid, exit = %Exit::from(status), "daemon exited");
                self.exit = Some(status.into());
            }
            Err(_) => {
                tracing::warn!(pid, "daemon ignored SIGTERM, killing");
                let _ = self.child.kill();
                let status = self
                    .child
                    .wait()
                    .map_err(|e| HarnessError::io("reaping daemon", e))?;
                self.exit = Some(status.into());
            }
        }
        Ok(())
    }
}

impl Drop for ChildProcess {
    fn drop(&mut self) {
        if self.exit.is_none() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Wait for a child process with a timeout.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> std::io::Result<ExitStatus> {
    let deadline = Instant::now() + timeout;
    loop {
        match child.try_wait()? {
            Some(status) => return Ok(status),
            None => {
                if Instant::now() >= deadline {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::TimedOut,
                        "timeout waiting for child process",
                    ));
                }
                std::thread::sleep(Duration::from_millis(50));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh() -> ProcessSubject {
        ProcessSubject::new("/bin/sh", vec!["-c".into()])
    }

    #[test]
    fn invocation_display_and_pid() {
        let inv = Invocation::new("monitor").args(["all", "{pid}"]);
        assert_eq!(inv.to_string(), "monitor all {pid}");
        assert_eq!(inv.with_pid(42).to_string(), "monitor all 42");
        let inv = Invocation::new("run").arg("--v4").insert(1, "--reconfigurable");
        assert_eq!(inv.to_string(), "run --reconfigurable --v4");
        assert!(inv.contains("--v4"));
    }

    #[test]
    fn describe_includes_binary_and_program() {
        let s = ProcessSubject::new("/opt/snabb", vec!["lwaftr".into()]);
        let inv = Invocation::new("check").arg("-r");
        assert_eq!(s.describe(&inv), "/opt/snabb lwaftr check -r");
    }

    #[test]
    fn execute_reports_exit_code() {
        let s = sh();
        assert_eq!(s.execute(&Invocation::new("exit 0")).unwrap(), Exit::Code(0));
        assert_eq!(s.execute(&Invocation::new("exit 3")).unwrap(), Exit::Code(3));
    }

    #[test]
    fn capture_collects_stdout() {
        let out = sh()
            .capture(&Invocation::new("echo one; echo two"))
            .unwrap();
        assert!(out.exit.success());
        assert_eq!(out.stdout_lines(), 2);
        assert!(out.stdout_contains("two"));
    }

    #[test]
    fn missing_binary_is_spawn_error() {
        let s = ProcessSubject::new("/nonexistent/snabb", vec![]);
        let err = s.execute(&Invocation::new("check")).unwrap_err();
        assert!(matches!(err, HarnessError::Spawn { .. }));
    }

    #[test]
    fn terminate_is_idempotent() {
        let mut bg = sh().spawn_background(&Invocation::new("sleep 30")).unwrap();
        assert!(bg.pid() > 0);
        assert_eq!(bg.try_wait().unwrap(), None);
        bg.terminate(Duration::from_secs(5)).unwrap();
        assert_eq!(bg.try_wait().unwrap(), Some(Exit::Signal(libc::SIGTERM)));
        bg.terminate(Duration::from_secs(5)).unwrap();
    }
}
