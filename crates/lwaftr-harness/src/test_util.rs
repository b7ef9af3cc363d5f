use std::cell::{Cell, RefCell};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::case::TestCase;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::paths::{PathResolver, ResolvedCase};
use crate::subject::{Background, Captured, Exit, Invocation, Subject};

pub(crate) const PID: u32 = 4242;

/// What the fake daemon went through.
#[derive(Debug, Default)]
pub(crate) struct DaemonLog {
    pub spawned: Vec<String>,
    pub terminated: usize,
}

/// In-process [`Subject`] that echoes input captures to the output paths.
#[derive(Default)]
pub(crate) struct FakeSubject {
    calls: RefCell<Vec<String>>,
    fail_code: Cell<Option<i32>>,
    stdout: RefCell<String>,
    probe_failures: Cell<usize>,
    spawn_refused: Cell<bool>,
    exits_early: Cell<bool>,
    pub daemon: Arc<Mutex<DaemonLog>>,
}

impl FakeSubject {
    pub fn echo() -> Self {
        Self::default()
    }

    pub fn fail_with(&self, code: i32) {
        self.fail_code.set(Some(code));
    }

    pub fn print(&self, stdout: &str) {
        *self.stdout.borrow_mut() = stdout.to_string();
    }

    pub fn fail_probes(&self, n: usize) {
        self.probe_failures.set(n);
    }

    pub fn refuse_spawn(&self) {
        self.spawn_refused.set(true);
    }

    pub fn exit_early(&self) {
        self.exits_early.set(true);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    fn check(&self, inv: &Invocation) -> Exit {
        let regen = inv.contains("-r");
        let pos: Vec<PathBuf> = inv.as_slice()[1..]
            .iter()
            .filter(|a| !a.to_string_lossy().starts_with('-'))
            .map(PathBuf::from)
            .collect();
        if pos.len() != 6 {
            return Exit::Code(64);
        }
        for (src, dst) in [(&pos[1], &pos[3]), (&pos[2], &pos[4])] {
            if fs::copy(src, dst).is_err() {
                return Exit::Code(1);
            }
        }
        if regen {
            if fs::write(&pos[5], "-- regenerated\nreturn {}\n").is_err() {
                return Exit::Code(1);
            }
        } else if !pos[5].exists() {
            return Exit::Code(1);
        }
        Exit::Code(0)
    }
}

impl Subject for FakeSubject {
    fn execute(&self, inv: &Invocation) -> Result<Exit> {
        self.calls.borrow_mut().push(inv.to_string());
        if let Some(code) = self.fail_code.get() {
            return Ok(Exit::Code(code));
        }
        if inv.subcommand().is_some_and(|s| s == "check") {
            return Ok(self.check(inv));
        }
        Ok(Exit::Code(0))
    }

    fn capture(&self, inv: &Invocation) -> Result<Captured> {
        self.calls.borrow_mut().push(inv.to_string());
        let probing = inv.subcommand().is_some_and(|s| s == "query");
        let exit = if probing && self.probe_failures.get() > 0 {
            self.probe_failures.set(self.probe_failures.get() - 1);
            Exit::Code(1)
        } else {
            Exit::Code(self.fail_code.get().unwrap_or(0))
        };
        Ok(Captured {
            exit,
            stdout: self.stdout.borrow().as_bytes().to_vec(),
            stderr: Vec::new(),
        })
    }

    fn spawn_background(&self, inv: &Invocation) -> Result<Box<dyn Background>> {
        self.calls.borrow_mut().push(format!("bg {inv}"));
        if self.spawn_refused.get() {
            return Err(HarnessError::Spawn {
                command: inv.to_string(),
                source: std::io::Error::other("spawn refused"),
            });
        }
        self.daemon.lock().unwrap().spawned.push(inv.to_string());
        Ok(Box::new(FakeBackground {
            log: self.daemon.clone(),
            exited: self.exits_early.get(),
        }))
    }
}

struct FakeBackground {
    log: Arc<Mutex<DaemonLog>>,
    exited: bool,
}

impl Background for FakeBackground {
    fn pid(&self) -> u32 {
        PID
    }

    fn try_wait(&mut self) -> Result<Option<Exit>> {
        Ok(self.exited.then_some(Exit::Code(1)))
    }

    fn terminate(&mut self, _grace: Duration) -> Result<()> {
        if !self.exited {
            self.exited = true;
            self.log.lock().unwrap().terminated += 1;
        }
        Ok(())
    }
}

/// A throwaway lwAFTR test tree with one passing "basic" case.
pub(crate) struct FixtureTree {
    _dir: tempfile::TempDir,
    pub cfg: HarnessConfig,
}

pub(crate) fn basic_case() -> TestCase {
    TestCase::new(
        "basic",
        [
            "basic.conf",
            "v4.pcap",
            "v6.pcap",
            "v4-out.pcap",
            "v6-out.pcap",
            "basic-counters.lua",
        ],
    )
}

pub(crate) fn fixture_tree() -> FixtureTree {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = HarnessConfig::for_tests_dir(dir.path().join("tests")).unwrap();
    cfg.output_dir = dir.path().join("out");
    fs::create_dir_all(&cfg.counters_dir).unwrap();
    fs::create_dir_all(&cfg.output_dir).unwrap();
    fs::write(&cfg.empty_capture, b"").unwrap();

    let data = &cfg.data_dir;
    write(data, "basic.conf", b"softwire-config {}\n");
    write(data, "v4.pcap", b"\xd4\xc3\xb2\xa1v4-packets");
    write(data, "v6.pcap", b"\xd4\xc3\xb2\xa1v6-packets");
    write(data, "v4-out.pcap", b"\xd4\xc3\xb2\xa1v4-packets");
    write(data, "v6-out.pcap", b"\xd4\xc3\xb2\xa1v6-packets");
    write(&cfg.counters_dir, "basic-counters.lua", b"return {}\n");

    FixtureTree { _dir: dir, cfg }
}

fn write(dir: &Path, name: &str, bytes: &[u8]) {
    fs::write(dir.join(name), bytes).unwrap();
}

impl FixtureTree {
    pub fn resolved_basic(&self) -> ResolvedCase {
        PathResolver::from_config(&self.cfg)
            .resolve_case(&basic_case())
            .unwrap()
    }
}
