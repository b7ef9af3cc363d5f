//! Background subject sessions.
//!
//! A [`DaemonSession`] owns one backgrounded subject process and, when asked,
//! a TAP interface the process is pointed at. The lifecycle is
//! `NotStarted -> Running -> Stopped`; resources are released exactly once,
//! by [`DaemonSession::stop`] or on drop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use lwaftr_netsim::tap::{random_tap_name, TapBackend, TapInterface};

use crate::commands::{self, Target};
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::subject::{Background, Captured, Invocation, Subject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    Running,
    Stopped,
}

/// How `start` decides the daemon is ready for foreground commands.
#[derive(Debug, Clone)]
pub enum Readiness {
    /// Return as soon as the process is spawned.
    Immediate,
    /// Retry `invocation` (with `{pid}` substituted) until it exits 0.
    Probe {
        invocation: Invocation,
        timeout: Duration,
        interval: Duration,
    },
}

impl Readiness {
    /// `query <pid>` probe using the configured timeout and interval.
    pub fn query(cfg: &HarnessConfig) -> Self {
        Readiness::Probe {
            invocation: commands::query(&Target::SessionPid),
            timeout: cfg.readiness_timeout,
            interval: cfg.readiness_interval,
        }
    }
}

/// A TAP interface to create before the daemon starts.
pub struct TapRequest {
    pub backend: Arc<dyn TapBackend>,
    /// Random `tapNNNNNN` when unset.
    pub name: Option<String>,
    /// Flag that passes the interface to the daemon.
    pub flag: String,
}

impl TapRequest {
    /// `--mirror <tap>` with a random name.
    pub fn mirror(backend: Arc<dyn TapBackend>) -> Self {
        Self {
            backend,
            name: None,
            flag: "--mirror".into(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

pub struct DaemonSpec {
    pub invocation: Invocation,
    pub tap: Option<TapRequest>,
    pub readiness: Readiness,
    pub stop_grace: Duration,
}

impl DaemonSpec {
    pub fn new(invocation: Invocation) -> Self {
        Self {
            invocation,
            tap: None,
            readiness: Readiness::Immediate,
            stop_grace: Duration::from_secs(5),
        }
    }

    pub fn with_tap(mut self, tap: TapRequest) -> Self {
        self.tap = Some(tap);
        self
    }

    pub fn with_readiness(mut self, readiness: Readiness) -> Self {
        self.readiness = readiness;
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }
}

pub struct DaemonSession<'s> {
    subject: &'s dyn Subject,
    spec: DaemonSpec,
    state: SessionState,
    process: Option<Box<dyn Background>>,
    tap: Option<TapInterface>,
    argv: Option<Invocation>,
}

impl<'s> DaemonSession<'s> {
    pub fn new(subject: &'s dyn Subject, spec: DaemonSpec) -> Self {
        Self {
            subject,
            spec,
            state: SessionState::NotStarted,
            process: None,
            tap: None,
            argv: None,
        }
    }

    /// Build and start in one step.
    pub fn launch(subject: &'s dyn Subject, spec: DaemonSpec) -> Result<Self> {
        let mut session = Self::new(subject, spec);
        session.start()?;
        Ok(session)
    }

    pub fn start(&mut self) -> Result<()> {
        if self.state != SessionState::NotStarted {
            return Err(HarnessError::Daemon(format!(
                "cannot start a session that is {:?}",
                self.state
            )));
        }
        match self.bring_up() {
            Ok(()) => {
                self.state = SessionState::Running;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "daemon setup failed, releasing resources");
                if let Err(cleanup) = self.teardown() {
                    tracing::warn!(error = %cleanup, "cleanup after failed setup also failed");
                }
                self.state = SessionState::Stopped;
                Err(e)
            }
        }
    }

    fn bring_up(&mut self) -> Result<()> {
        let mut argv = self.spec.invocation.clone();
        if let Some(req) = &self.spec.tap {
            let name = req.name.clone().unwrap_or_else(random_tap_name);
            let tap = TapInterface::create(req.backend.clone(), &name)
                .map_err(|source| HarnessError::Interface {
                    name: name.clone(),
                    source,
                })?;
            argv = argv.arg(&req.flag).arg(tap.name());
            self.tap = Some(tap);
        }
        self.argv = Some(argv.clone());

        let process = self.subject.spawn_background(&argv)?;
        let pid = process.pid();
        self.process = Some(process);
        tracing::info!(pid, cmd = %argv, "daemon started");

        self.await_ready(pid)
    }

    fn await_ready(&mut self, pid: u32) -> Result<()> {
        let Readiness::Probe {
            invocation,
            timeout,
            interval,
        } = &self.spec.readiness
        else {
            return Ok(());
        };
        let probe = invocation.with_pid(pid);
        let deadline = Instant::now() + *timeout;
        loop {
            if let Some(process) = self.process.as_mut() {
                if let Some(exit) = process.try_wait()? {
                    return Err(HarnessError::Daemon(format!(
                        "daemon {pid} exited during startup (exit {exit})"
                    )));
                }
            }
            let out = self.subject.capture(&probe)?;
            if out.exit.success() {
                tracing::debug!(pid, "daemon ready");
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(HarnessError::Daemon(format!(
                    "daemon {pid} not ready after {timeout:?} ({} kept failing)",
                    self.subject.describe(&probe)
                )));
            }
            thread::sleep(*interval);
        }
    }

    /// Run a foreground command against the running daemon. `{pid}` in the
    /// invocation is replaced with the daemon's pid.
    pub fn issue(&self, invocation: &Invocation) -> Result<Captured> {
        let pid = match (&self.state, &self.process) {
            (SessionState::Running, Some(p)) => p.pid(),
            _ => {
                return Err(HarnessError::Daemon(format!(
                    "cannot issue {invocation}: session is {:?}",
                    self.state
                )))
            }
        };
        self.subject.capture(&invocation.with_pid(pid))
    }

    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.pid())
    }

    /// The argument vector the daemon was spawned with.
    pub fn argv(&self) -> Option<&Invocation> {
        self.argv.as_ref()
    }

    pub fn tap_name(&self) -> Option<&str> {
        self.tap.as_ref().map(TapInterface::name)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Stop the daemon and release the TAP. Idempotent; a never-started
    /// session is left untouched.
    pub fn stop(&mut self) -> Result<()> {
        if self.state != SessionState::Running {
            return Ok(());
        }
        self.state = SessionState::Stopped;
        self.teardown()
    }

    /// Release the process, then the interface. Both are attempted; the
    /// first error is returned.
    fn teardown(&mut self) -> Result<()> {
        let mut first_err = None;
        if let Some(mut process) = self.process.take() {
            let pid = process.pid();
            if let Err(e) = process.terminate(self.spec.stop_grace) {
                tracing::warn!(pid, error = %e, "failed to stop daemon");
                first_err = Some(e);
            }
        }
        if let Some(tap) = self.tap.take() {
            let name = tap.name().to_string();
            if let Err(source) = tap.release() {
                let e = HarnessError::Interface { name, source };
                tracing::warn!(error = %e, "failed to release TAP");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

impl Drop for DaemonSession<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "daemon session teardown failed");
        }
    }
}
