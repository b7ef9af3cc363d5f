//! Shared fixtures for the integration tests: a throwaway lwAFTR tests tree
//! and a configuration pointing at the `fake-aftr` stand-in subject.

#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lwaftr_harness::case::TestCase;
use lwaftr_harness::config::{HarnessConfig, HarnessConfigInput};
use lwaftr_netsim::discovery::NicNames;

pub const FAKE_AFTR: &str = env!("CARGO_BIN_EXE_fake-aftr");

pub struct Tree {
    pub dir: tempfile::TempDir,
    pub cfg: HarnessConfig,
}

impl Tree {
    pub fn data(&self, name: &str) -> PathBuf {
        self.cfg.data_dir.join(name)
    }

    pub fn with_nics(mut self, nic0: Option<&str>, nic1: Option<&str>) -> Self {
        self.cfg.nics = NicNames {
            nic0: nic0.map(String::from),
            nic1: nic1.map(String::from),
        };
        self
    }

    /// Write a `[[case]]` registry next to the data and return its path.
    pub fn write_registry(&self, body: &str) -> PathBuf {
        let path = self.dir.path().join("test_list.toml");
        fs::write(&path, body).unwrap();
        path
    }

    /// Write a harness TOML config for the CLI and return its path.
    pub fn write_config(&self) -> PathBuf {
        let path = self.dir.path().join("harness.toml");
        let body = format!(
            "tests_dir = {:?}\nsubject_bin = {:?}\noutput_dir = {:?}\n",
            self.cfg.tests_dir, self.cfg.subject_bin, self.cfg.output_dir
        );
        fs::write(&path, body).unwrap();
        path
    }
}

fn write(dir: &Path, name: &str, bytes: &[u8]) {
    fs::create_dir_all(dir).unwrap();
    fs::write(dir.join(name), bytes).unwrap();
}

/// A tests tree with a passing `basic` case, a VLAN variant of its inputs,
/// the `run` configuration and the loadtest bench captures.
pub fn tree() -> Tree {
    let dir = tempfile::tempdir().unwrap();
    let tests_dir = dir.path().join("program/lwaftr/tests");
    let output_dir = dir.path().join("out");
    fs::create_dir_all(&output_dir).unwrap();

    let cfg = HarnessConfigInput {
        tests_dir: Some(tests_dir),
        subject_bin: Some(FAKE_AFTR.into()),
        output_dir: Some(output_dir),
        stop_grace_ms: Some(2_000),
        readiness_timeout_ms: Some(5_000),
        readiness_interval_ms: Some(20),
        ..Default::default()
    }
    .resolve()
    .unwrap();

    let data = cfg.data_dir.clone();
    write(&data, "empty.pcap", b"");
    write(&data, "basic.conf", b"softwire-config {}\n");
    write(&data, "icmp_on_fail.conf", b"softwire-config { icmp {} }\n");
    for dir in [data.clone(), cfg.vlan_test_base()] {
        write(&dir, "v4.pcap", b"\xd4\xc3\xb2\xa1ipv4 frames");
        write(&dir, "v6.pcap", b"\xd4\xc3\xb2\xa1ipv6 frames");
        write(&dir, "v4-out.pcap", b"\xd4\xc3\xb2\xa1ipv4 frames");
        write(&dir, "v6-out.pcap", b"\xd4\xc3\xb2\xa1ipv6 frames");
    }
    write(&cfg.vlan_test_base(), "basic.conf", b"softwire-config { vlan 42 }\n");
    write(&cfg.counters_dir, "basic-counters.lua", b"return {}\n");
    write(&cfg.benchdata_dir, "ipv4-0550.pcap", b"\xd4\xc3\xb2\xa1bench v4");
    write(&cfg.benchdata_dir, "ipv6-0550.pcap", b"\xd4\xc3\xb2\xa1bench v6");

    Tree { dir, cfg }
}

pub fn basic_case() -> TestCase {
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

pub const BASIC_REGISTRY: &str = r#"
[[case]]
name = "basic"
args = ["basic.conf", "v4.pcap", "v6.pcap", "v4-out.pcap", "v6-out.pcap", "basic-counters.lua"]

[[case]]
name = "ipv4-only"
args = ["basic.conf", "v4.pcap", "", "v4-out.pcap", "", "basic-counters.lua"]
"#;

pub const SHORT: Duration = Duration::from_millis(50);
