//! Checks of the subject's operational subcommands: `run`, `monitor` and
//! `loadtest`. These need real NICs (and for `monitor`, a TAP interface);
//! when a resource is missing every test of the suite is reported skipped.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use lwaftr_netsim::discovery::Availability;
use lwaftr_netsim::tap::TapBackend;

use crate::commands::{self, LoadStream, LoadtestArgs, RunArgs, Target, Topology};
use crate::config::HarnessConfig;
use crate::daemon::{DaemonSession, DaemonSpec, Readiness, TapRequest};
use crate::error::Result;
use crate::report::{BatchReport, Phase, RunOutcome};
use crate::subject::{Captured, Subject};

const RUN_CONF: &str = "icmp_on_fail.conf";
const MIRROR_MARKERS: [&str; 2] = ["Mirror address set", "255.255.255.255"];
const LOADTEST_MIN_LINES: usize = 10;

pub struct SuiteEnv<'a> {
    pub cfg: &'a HarnessConfig,
    pub subject: &'a dyn Subject,
    pub taps: Availability<Arc<dyn TapBackend>>,
}

impl<'a> SuiteEnv<'a> {
    pub fn new(
        cfg: &'a HarnessConfig,
        subject: &'a dyn Subject,
        taps: Availability<Arc<dyn TapBackend>>,
    ) -> Self {
        Self { cfg, subject, taps }
    }

    fn conf(&self) -> PathBuf {
        self.cfg.data_dir.join(RUN_CONF)
    }

    fn daemon(&self, run: &RunArgs) -> DaemonSpec {
        DaemonSpec::new(run.invocation())
            .with_readiness(Readiness::query(self.cfg))
            .with_stop_grace(self.cfg.stop_grace)
    }
}

/// Run every suite in order. Skips never stop the batch.
pub fn all_suites(env: &SuiteEnv<'_>) -> Result<BatchReport> {
    let mut report = run_suite(env)?;
    report.extend(monitor_suite(env)?);
    report.extend(loadtest_suite(env)?);
    tracing::info!(%report, "subcommand suites finished");
    Ok(report)
}

/// `run` for a fixed duration, plain and `--reconfigurable`. Neither may
/// print anything.
pub fn run_suite(env: &SuiteEnv<'_>) -> Result<BatchReport> {
    let mut report = BatchReport::echoing(env.cfg.progress);
    let tests = ["run", "run --reconfigurable"];
    let (v4, v6) = match env.cfg.nics.pair() {
        Availability::Available(pair) => pair,
        Availability::Unavailable(reason) => {
            skip_all(&mut report, &tests, &reason);
            return Ok(report);
        }
    };

    let base = RunArgs::new(env.conf(), Topology::Dual { v4, v6 })
        .duration(Duration::from_millis(100));
    for (name, args) in tests.iter().zip([base.clone(), base.reconfigurable()]) {
        let out = env.subject.capture(&args.invocation())?;
        let outcome = expect_silent(env, &args, &out);
        log_outcome(name, &outcome);
        report.record(name, Phase::Subcommand, outcome);
    }
    Ok(report)
}

/// `monitor all <pid>` against an on-a-stick daemon mirroring to a fresh
/// TAP interface.
pub fn monitor_suite(env: &SuiteEnv<'_>) -> Result<BatchReport> {
    let mut report = BatchReport::echoing(env.cfg.progress);
    let tests = ["monitor"];
    let needs = env.cfg.nics.first().and(env.taps.as_ref());
    let (nic, taps) = match needs {
        Availability::Available(found) => found,
        Availability::Unavailable(reason) => {
            skip_all(&mut report, &tests, &reason);
            return Ok(report);
        }
    };

    let run = RunArgs::new(env.conf(), Topology::OnAStick(nic));
    let spec = env
        .daemon(&run)
        .with_tap(TapRequest::mirror(Arc::clone(taps)));
    let mut session = DaemonSession::launch(env.subject, spec)?;

    let out = session.issue(&commands::monitor("all", &Target::SessionPid))?;
    let outcome = if !out.exit.success() {
        RunOutcome::Fail(format!("monitor exited with {}", out.exit))
    } else {
        match MIRROR_MARKERS.iter().find(|m| !out.stdout_contains(m)) {
            Some(missing) => RunOutcome::Fail(format!(
                "monitor output lacks {missing:?}:\n{}",
                out.stdout_str()
            )),
            None => RunOutcome::Pass,
        }
    };
    session.stop()?;

    log_outcome("monitor", &outcome);
    report.record("monitor", Phase::Subcommand, outcome);
    Ok(report)
}

/// `loadtest` ramping traffic through a dual-NIC daemon.
pub fn loadtest_suite(env: &SuiteEnv<'_>) -> Result<BatchReport> {
    let mut report = BatchReport::echoing(env.cfg.progress);
    let tests = ["loadtest"];
    let (nic0, nic1) = match env.cfg.nics.pair() {
        Availability::Available(pair) => pair,
        Availability::Unavailable(reason) => {
            skip_all(&mut report, &tests, &reason);
            return Ok(report);
        }
    };

    let run = RunArgs::new(
        env.conf(),
        Topology::Dual {
            v4: nic0.clone(),
            v6: nic1.clone(),
        },
    );
    let mut session = DaemonSession::launch(env.subject, env.daemon(&run))?;

    let bench = &env.cfg.benchdata_dir;
    let loadtest = LoadtestArgs {
        bench_file: PathBuf::from("/dev/null"),
        program: "ramp_up".into(),
        step: "0.1e8".into(),
        duration: Duration::from_millis(100),
        bitrate: "0.2e8".into(),
        streams: vec![
            LoadStream {
                capture: bench.join("ipv4-0550.pcap"),
                src: "IPv4".into(),
                dst: "IPv6".into(),
                iface: nic0,
            },
            LoadStream {
                capture: bench.join("ipv6-0550.pcap"),
                src: "IPv6".into(),
                dst: "IPv4".into(),
                iface: nic1,
            },
        ],
    };
    let out = session.issue(&loadtest.invocation())?;
    let lines = out.stdout_lines();
    let outcome = if !out.exit.success() {
        RunOutcome::Fail(format!(
            "{} exited with {}",
            env.subject.describe(&loadtest.invocation()),
            out.exit
        ))
    } else if lines <= LOADTEST_MIN_LINES {
        RunOutcome::Fail(format!(
            "loadtest printed {lines} lines, expected more than {LOADTEST_MIN_LINES}"
        ))
    } else {
        RunOutcome::Pass
    };
    session.stop()?;

    log_outcome("loadtest", &outcome);
    report.record("loadtest", Phase::Subcommand, outcome);
    Ok(report)
}

fn expect_silent(env: &SuiteEnv<'_>, args: &RunArgs, out: &Captured) -> RunOutcome {
    let cmd = env.subject.describe(&args.invocation());
    if !out.exit.success() {
        return RunOutcome::Fail(format!("{cmd} exited with {}", out.exit));
    }
    match out.stdout_lines() {
        0 => RunOutcome::Pass,
        n => RunOutcome::Fail(format!("{cmd} printed {n} lines, expected none")),
    }
}

fn skip_all(report: &mut BatchReport, tests: &[&str], reason: &str) {
    for name in tests {
        tracing::info!(test = name, reason, "test skipped");
        report.record(name, Phase::Subcommand, RunOutcome::Skipped(reason.to_string()));
    }
}

fn log_outcome(name: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Fail(detail) => tracing::error!(test = name, detail, "test failed"),
        _ => tracing::info!(test = name, %outcome, "test finished"),
    }
}
