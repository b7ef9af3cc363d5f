//! Argument vectors for the subject's subcommands.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::case::ExecutionMode;
use crate::paths::{ResolvedCase, SoakInputs};
use crate::subject::Invocation;

/// Render a duration the way the subject's `-D`/`--duration` flags expect.
pub fn secs_arg(d: Duration) -> String {
    format!("{}", d.as_secs_f64())
}

/// `check` in verify mode for `mode`, writing to `v4_out`/`v6_out`.
pub fn check(mode: ExecutionMode, case: &ResolvedCase, v4_out: &Path, v6_out: &Path) -> Invocation {
    let inv = Invocation::new("check");
    let inv = if mode.is_on_a_stick() {
        inv.arg("--on-a-stick")
    } else {
        inv
    };
    check_operands(inv, case, v4_out, v6_out)
}

/// `check -r`: the subject rewrites the counters script in place.
pub fn check_regen(case: &ResolvedCase, v4_out: &Path, v6_out: &Path) -> Invocation {
    check_operands(Invocation::new("check").arg("-r"), case, v4_out, v6_out)
}

fn check_operands(inv: Invocation, case: &ResolvedCase, v4_out: &Path, v6_out: &Path) -> Invocation {
    inv.arg(&case.config)
        .arg(&case.v4_in)
        .arg(&case.v6_in)
        .arg(v4_out)
        .arg(v6_out)
        .arg(&case.counters)
}

pub fn soaktest(duration: Duration, mode: ExecutionMode, inputs: &SoakInputs) -> Invocation {
    let inv = Invocation::new("soaktest").arg("-D").arg(secs_arg(duration));
    let inv = if mode.is_on_a_stick() {
        inv.arg("--on-a-stick")
    } else {
        inv
    };
    inv.arg(&inputs.config).arg(&inputs.v4_in).arg(&inputs.v6_in)
}

/// Interfaces a `run` daemon attaches to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Topology {
    Dual { v4: String, v6: String },
    OnAStick(String),
}

/// `run` subcommand.
#[derive(Debug, Clone)]
pub struct RunArgs {
    pub conf: PathBuf,
    pub topology: Topology,
    pub bench_file: PathBuf,
    pub mirror: Option<String>,
    pub name: Option<String>,
    pub reconfigurable: bool,
    pub duration: Option<Duration>,
}

impl RunArgs {
    pub fn new(conf: impl Into<PathBuf>, topology: Topology) -> Self {
        Self {
            conf: conf.into(),
            topology,
            bench_file: PathBuf::from("/dev/null"),
            mirror: None,
            name: None,
            reconfigurable: false,
            duration: None,
        }
    }

    pub fn duration(mut self, d: Duration) -> Self {
        self.duration = Some(d);
        self
    }

    pub fn reconfigurable(mut self) -> Self {
        self.reconfigurable = true;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn mirror(mut self, iface: impl Into<String>) -> Self {
        self.mirror = Some(iface.into());
        self
    }

    pub fn invocation(&self) -> Invocation {
        let mut inv = Invocation::new("run");
        if self.reconfigurable {
            inv = inv.arg("--reconfigurable");
        }
        if let Some(d) = self.duration {
            inv = inv.arg("--duration").arg(secs_arg(d));
        }
        if let Some(name) = &self.name {
            inv = inv.arg("--name").arg(name);
        }
        inv = inv
            .arg("--bench-file")
            .arg(&self.bench_file)
            .arg("--conf")
            .arg(&self.conf);
        inv = match &self.topology {
            Topology::Dual { v4, v6 } => inv.arg("--v4").arg(v4).arg("--v6").arg(v6),
            Topology::OnAStick(iface) => inv.arg("--on-a-stick").arg(iface),
        };
        if let Some(mirror) = &self.mirror {
            inv = inv.arg("--mirror").arg(mirror);
        }
        inv
    }
}

/// One traffic stream of a `loadtest`: a capture replayed from `src`
/// family to `dst` family on `iface`.
#[derive(Debug, Clone)]
pub struct LoadStream {
    pub capture: PathBuf,
    pub src: String,
    pub dst: String,
    pub iface: String,
}

#[derive(Debug, Clone)]
pub struct LoadtestArgs {
    pub bench_file: PathBuf,
    pub program: String,
    pub step: String,
    pub duration: Duration,
    pub bitrate: String,
    pub streams: Vec<LoadStream>,
}

impl LoadtestArgs {
    pub fn invocation(&self) -> Invocation {
        let mut inv = Invocation::new("loadtest")
            .arg("--bench-file")
            .arg(&self.bench_file)
            .arg("--program")
            .arg(&self.program)
            .arg("--step")
            .arg(&self.step)
            .arg("--duration")
            .arg(secs_arg(self.duration))
            .arg("--bitrate")
            .arg(&self.bitrate);
        for s in &self.streams {
            inv = inv.arg(&s.capture).arg(&s.src).arg(&s.dst).arg(&s.iface);
        }
        inv
    }
}

/// Which running instance a `monitor`/`query` addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Pid(u32),
    /// Substituted with the daemon's pid when issued through a session.
    SessionPid,
    Name(String),
}

/// `monitor <action> <pid>` or `monitor --name <name> <action>`.
pub fn monitor(action: &str, target: &Target) -> Invocation {
    match target {
        Target::Name(name) => Invocation::new("monitor").arg("--name").arg(name).arg(action),
        Target::Pid(pid) => Invocation::new("monitor").arg(action).arg(pid.to_string()),
        Target::SessionPid => Invocation::new("monitor").arg(action).arg("{pid}"),
    }
}

pub fn query(target: &Target) -> Invocation {
    match target {
        Target::Name(name) => Invocation::new("query").arg("--name").arg(name),
        Target::Pid(pid) => Invocation::new("query").arg(pid.to_string()),
        Target::SessionPid => Invocation::new("query").arg("{pid}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved() -> ResolvedCase {
        ResolvedCase {
            config: "/b/a.conf".into(),
            v4_in: "/b/in4.pcap".into(),
            v6_in: "/b/in6.pcap".into(),
            v4_out_golden: "/b/out4.pcap".into(),
            v6_out_golden: "/b/out6.pcap".into(),
            counters: "/c/x.lua".into(),
        }
    }

    #[test]
    fn check_argv_per_mode() {
        let r = resolved();
        let o4 = Path::new("/tmp/endoutv4.pcap");
        let o6 = Path::new("/tmp/endoutv6.pcap");
        assert_eq!(
            check(ExecutionMode::Standard, &r, o4, o6).to_string(),
            "check /b/a.conf /b/in4.pcap /b/in6.pcap /tmp/endoutv4.pcap /tmp/endoutv6.pcap /c/x.lua"
        );
        assert_eq!(
            check(ExecutionMode::OnAStick, &r, o4, o6).to_string(),
            "check --on-a-stick /b/a.conf /b/in4.pcap /b/in6.pcap /tmp/endoutv4.pcap /tmp/endoutv6.pcap /c/x.lua"
        );
        let regen = check_regen(&r, o4, o6);
        assert!(regen.contains("-r"));
        assert!(!regen.contains("--on-a-stick"));
    }

    #[test]
    fn soaktest_argv() {
        let inputs = SoakInputs {
            config: "/b/a.conf".into(),
            v4_in: "/b/in4.pcap".into(),
            v6_in: "/e.pcap".into(),
        };
        assert_eq!(
            soaktest(Duration::from_secs(1), ExecutionMode::Standard, &inputs).to_string(),
            "soaktest -D 1 /b/a.conf /b/in4.pcap /e.pcap"
        );
        assert_eq!(
            soaktest(Duration::from_millis(2500), ExecutionMode::OnAStick, &inputs).to_string(),
            "soaktest -D 2.5 --on-a-stick /b/a.conf /b/in4.pcap /e.pcap"
        );
    }

    #[test]
    fn run_argv() {
        let run = RunArgs::new(
            "/d/icmp_on_fail.conf",
            Topology::Dual {
                v4: "nic0".into(),
                v6: "nic1".into(),
            },
        )
        .duration(Duration::from_millis(100));
        assert_eq!(
            run.invocation().to_string(),
            "run --duration 0.1 --bench-file /dev/null --conf /d/icmp_on_fail.conf --v4 nic0 --v6 nic1"
        );
        assert_eq!(
            run.clone().reconfigurable().invocation().to_string(),
            "run --reconfigurable --duration 0.1 --bench-file /dev/null --conf /d/icmp_on_fail.conf --v4 nic0 --v6 nic1"
        );

        let stick = RunArgs::new("/d/c.conf", Topology::OnAStick("nic0".into())).mirror("tap123456");
        assert_eq!(
            stick.invocation().to_string(),
            "run --bench-file /dev/null --conf /d/c.conf --on-a-stick nic0 --mirror tap123456"
        );
    }

    #[test]
    fn loadtest_argv() {
        let lt = LoadtestArgs {
            bench_file: "/dev/null".into(),
            program: "ramp_up".into(),
            step: "0.1e8".into(),
            duration: Duration::from_millis(100),
            bitrate: "0.2e8".into(),
            streams: vec![LoadStream {
                capture: "/bench/ipv4-0550.pcap".into(),
                src: "IPv4".into(),
                dst: "IPv6".into(),
                iface: "nic0".into(),
            }],
        };
        assert_eq!(
            lt.invocation().to_string(),
            "loadtest --bench-file /dev/null --program ramp_up --step 0.1e8 --duration 0.1 --bitrate 0.2e8 /bench/ipv4-0550.pcap IPv4 IPv6 nic0"
        );
    }

    #[test]
    fn monitor_and_query_targets() {
        assert_eq!(monitor("all", &Target::Pid(7)).to_string(), "monitor all 7");
        assert_eq!(
            monitor("all", &Target::Name("aftr".into())).to_string(),
            "monitor --name aftr all"
        );
        assert_eq!(
            monitor("all", &Target::SessionPid).with_pid(9).to_string(),
            "monitor all 9"
        );
        assert_eq!(query(&Target::SessionPid).to_string(), "query {pid}");
    }
}
