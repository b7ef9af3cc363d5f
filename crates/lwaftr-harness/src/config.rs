//! Harness configuration.
//!
//! Resolved in layers: an optional TOML file, then the process environment,
//! then whatever the caller (usually the CLI) overrides. The resolved
//! [`HarnessConfig`] is passed explicitly to every runner; nothing is read
//! from ambient state after resolution.

use std::path::{Path, PathBuf};
use std::time::Duration;

use lwaftr_netsim::discovery::{NicNames, NIC0_VAR, NIC1_VAR};
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

pub const TESTS_DIR_VAR: &str = "TESTS_DIR";
pub const TEST_BASE_VAR: &str = "TEST_BASE";
pub const SUBJECT_BIN_VAR: &str = "LWAFTR_SUBJECT_BIN";

/// Whether a comparison batch verifies against golden fixtures or rewrites
/// them. A single run is never both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    #[default]
    Verify,
    Regenerate,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HarnessConfigInput {
    pub tests_dir: Option<PathBuf>,
    pub test_base: Option<PathBuf>,
    pub subject_bin: Option<PathBuf>,
    pub program: Option<Vec<String>>,
    pub output_dir: Option<PathBuf>,
    pub nic0: Option<String>,
    pub nic1: Option<String>,
    pub mode: Option<RunMode>,
    pub soak_duration_secs: Option<f64>,
    pub stop_grace_ms: Option<u64>,
    pub readiness_timeout_ms: Option<u64>,
    pub readiness_interval_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Root of the lwAFTR test tree.
    pub tests_dir: PathBuf,
    /// Root that test-case file references are resolved against.
    pub test_base: PathBuf,
    pub data_dir: PathBuf,
    pub counters_dir: PathBuf,
    pub benchdata_dir: PathBuf,
    /// Substituted for empty capture references.
    pub empty_capture: PathBuf,
    pub subject_bin: PathBuf,
    /// Arguments placed between the binary and the subcommand.
    pub program: Vec<String>,
    /// Directory receiving `endoutv4.pcap` / `endoutv6.pcap`.
    pub output_dir: PathBuf,
    pub nics: NicNames,
    pub mode: RunMode,
    pub soak_duration: Duration,
    pub stop_grace: Duration,
    pub readiness_timeout: Duration,
    pub readiness_interval: Duration,
    /// Print a line per finished test on stdout as the batch goes.
    pub progress: bool,
}

impl HarnessConfigInput {
    pub fn from_toml_str(input: &str) -> Result<Self> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }
        toml::from_str(input).map_err(|e| HarnessError::Config(format!("invalid TOML: {e}")))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::io(format!("reading {}", path.display()), e))?;
        Self::from_toml_str(&text)
    }

    /// Overlay values from the process environment.
    pub fn with_env(self) -> Self {
        self.with_env_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay values found through `lookup`; unset or empty keys leave the
    /// existing value alone.
    pub fn with_env_lookup(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = get(TESTS_DIR_VAR) {
            self.tests_dir = Some(v.into());
        }
        if let Some(v) = get(TEST_BASE_VAR) {
            self.test_base = Some(v.into());
        }
        if let Some(v) = get(SUBJECT_BIN_VAR) {
            self.subject_bin = Some(v.into());
        }
        if let Some(v) = get(NIC0_VAR) {
            self.nic0 = Some(v);
        }
        if let Some(v) = get(NIC1_VAR) {
            self.nic1 = Some(v);
        }
        self
    }

    pub fn resolve(self) -> Result<HarnessConfig> {
        let tests_dir = self.tests_dir.ok_or_else(|| {
            HarnessError::Config(format!("{TESTS_DIR_VAR} is not set and no tests_dir given"))
        })?;
        let tests_dir = absolute(&tests_dir)?;
        let data_dir = tests_dir.join("data");

        let test_base = match self.test_base {
            Some(base) => absolute(&base)?,
            None => data_dir.clone(),
        };

        // The subject lives three levels above the tests directory.
        let subject_bin = match self.subject_bin {
            Some(bin) => absolute(&bin)?,
            None => tests_dir
                .ancestors()
                .nth(3)
                .map(|root| root.join("snabb"))
                .ok_or_else(|| {
                    HarnessError::Config(format!(
                        "cannot derive subject binary from {}",
                        tests_dir.display()
                    ))
                })?,
        };

        let soak_secs = self.soak_duration_secs.unwrap_or(1.0);
        let soak_duration = soak_duration_from_secs(soak_secs)?;

        let program = self.program.unwrap_or_else(|| vec!["lwaftr".to_string()]);
        let nics = NicNames::from_lookup(|key| match key {
            NIC0_VAR => self.nic0.clone(),
            NIC1_VAR => self.nic1.clone(),
            _ => None,
        });

        Ok(HarnessConfig {
            counters_dir: data_dir.join("counters"),
            benchdata_dir: tests_dir.join("benchdata"),
            empty_capture: data_dir.join("empty.pcap"),
            output_dir: self.output_dir.unwrap_or_else(|| PathBuf::from("/tmp")),
            mode: self.mode.unwrap_or_default(),
            soak_duration,
            stop_grace: Duration::from_millis(self.stop_grace_ms.unwrap_or(5_000)),
            readiness_timeout: Duration::from_millis(self.readiness_timeout_ms.unwrap_or(10_000)),
            readiness_interval: Duration::from_millis(self.readiness_interval_ms.unwrap_or(100)),
            tests_dir,
            test_base,
            data_dir,
            subject_bin,
            program,
            nics,
            progress: false,
        })
    }
}

/// Converts a soak duration in seconds, rejecting values that are not
/// positive or do not fit a [`Duration`].
pub fn soak_duration_from_secs(secs: f64) -> Result<Duration> {
    if secs <= 0.0 {
        return Err(HarnessError::Config(format!(
            "soak duration must be positive, got {secs}"
        )));
    }
    Duration::try_from_secs_f64(secs)
        .map_err(|e| HarnessError::Config(format!("soak duration {secs} out of range: {e}")))
}

impl HarnessConfig {
    /// Defaults for a tests tree at `tests_dir`, ignoring the environment.
    pub fn for_tests_dir(tests_dir: impl Into<PathBuf>) -> Result<Self> {
        HarnessConfigInput {
            tests_dir: Some(tests_dir.into()),
            ..Default::default()
        }
        .resolve()
    }

    /// Load from an optional TOML file overlaid with the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let input = match path {
            Some(p) => HarnessConfigInput::from_file(p)?,
            None => HarnessConfigInput::default(),
        };
        input.with_env().resolve()
    }

    pub fn is_regenerating(&self) -> bool {
        self.mode == RunMode::Regenerate
    }

    /// Path the subject writes its IPv4 output capture to.
    pub fn v4_output(&self) -> PathBuf {
        self.output_dir.join("endoutv4.pcap")
    }

    /// Path the subject writes its IPv6 output capture to.
    pub fn v6_output(&self) -> PathBuf {
        self.output_dir.join("endoutv6.pcap")
    }

    /// The VLAN variant of the test data, used by the VLAN soak run.
    pub fn vlan_test_base(&self) -> PathBuf {
        self.data_dir.join("vlan")
    }
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path)
        .map_err(|e| HarnessError::io(format!("resolving {}", path.display()), e))
}
