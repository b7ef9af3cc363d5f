//! Test cases and the ordered registry they live in.

use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Number of positional fields following a case's name.
pub const CASE_ARITY: usize = 6;

/// Counters scripts describing packets delivered to the wrong interface.
///
/// An on-a-stick topology has a single interface, so these scenarios cannot
/// be reproduced there.
pub const WRONG_INTERFACE_COUNTERS: [&str; 2] = [
    "non-ipv6-traffic-to-ipv6-interface",
    "non-ipv4-traffic-to-ipv4-interface",
];

/// Topology the subject is run in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// Separate IPv4 and IPv6 interfaces.
    Standard,
    /// One interface carrying both families.
    OnAStick,
}

impl ExecutionMode {
    pub const ALL: [ExecutionMode; 2] = [ExecutionMode::Standard, ExecutionMode::OnAStick];

    pub fn is_on_a_stick(self) -> bool {
        self == ExecutionMode::OnAStick
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionMode::Standard => f.write_str("standard"),
            ExecutionMode::OnAStick => f.write_str("on-a-stick"),
        }
    }
}

/// One end-to-end scenario. All paths are relative references; see
/// [`crate::paths`] for how they become absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub name: String,
    pub config_ref: String,
    /// Empty string selects the canonical empty capture.
    pub v4_in: String,
    pub v6_in: String,
    pub v4_out_golden: String,
    pub v6_out_golden: String,
    /// Always relative to the counters directory.
    pub counters_ref: String,
    pub incompatible_with: BTreeSet<ExecutionMode>,
}

impl TestCase {
    /// Build a case from its name and positional references, applying the
    /// wrong-interface tagging rule.
    pub fn new(name: impl Into<String>, args: [&str; CASE_ARITY]) -> Self {
        let [config_ref, v4_in, v6_in, v4_out_golden, v6_out_golden, counters_ref] = args;
        let mut case = Self {
            name: name.into(),
            config_ref: config_ref.to_string(),
            v4_in: v4_in.to_string(),
            v6_in: v6_in.to_string(),
            v4_out_golden: v4_out_golden.to_string(),
            v6_out_golden: v6_out_golden.to_string(),
            counters_ref: counters_ref.to_string(),
            incompatible_with: BTreeSet::new(),
        };
        if is_wrong_interface_counters(&case.counters_ref) {
            case.incompatible_with.insert(ExecutionMode::OnAStick);
        }
        case
    }

    /// Build a case from a slice, rejecting any arity other than six.
    pub fn from_args(name: impl Into<String>, args: &[String]) -> Result<Self> {
        let name = name.into();
        let refs: [&str; CASE_ARITY] = args
            .iter()
            .map(String::as_str)
            .collect::<Vec<_>>()
            .try_into()
            .map_err(|v: Vec<&str>| {
                HarnessError::Usage(format!(
                    "test case {name:?} has {} arguments, expected {CASE_ARITY}",
                    v.len()
                ))
            })?;
        Ok(Self::new(name, refs))
    }

    /// Mark the case as unrunnable under `mode`.
    pub fn incompatible_with(mut self, mode: ExecutionMode) -> Self {
        self.incompatible_with.insert(mode);
        self
    }

    pub fn runs_in(&self, mode: ExecutionMode) -> bool {
        !self.incompatible_with.contains(&mode)
    }

    /// Positional references in subject argument order.
    pub fn args(&self) -> [&str; CASE_ARITY] {
        [
            self.config_ref.as_str(),
            self.v4_in.as_str(),
            self.v6_in.as_str(),
            self.v4_out_golden.as_str(),
            self.v6_out_golden.as_str(),
            self.counters_ref.as_str(),
        ]
    }
}

/// Whether `counters_ref` names one of the wrong-interface scenarios.
/// Only the bare stem or `<stem>.lua` directly under the counters root match.
pub fn is_wrong_interface_counters(counters_ref: &str) -> bool {
    let stem = counters_ref.strip_suffix(".lua").unwrap_or(counters_ref);
    WRONG_INTERFACE_COUNTERS.contains(&stem)
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct RegistryInput {
    case: Vec<CaseInput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
struct CaseInput {
    name: String,
    args: Vec<String>,
    incompatible_with: Vec<ExecutionMode>,
}

/// Ordered list of test cases. Runners iterate it in registration order.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    cases: Vec<TestCase>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, case: TestCase) {
        self.cases.push(case);
    }

    pub fn with(mut self, case: TestCase) -> Self {
        self.push(case);
        self
    }

    pub fn iter(&self) -> std::slice::Iter<'_, TestCase> {
        self.cases.iter()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Parse a registry of `[[case]]` tables:
    ///
    /// ```toml
    /// [[case]]
    /// name = "from-to-b4-ipv6-hairpin"
    /// args = ["no_icmp.conf", "", "recap-ipv6.pcap", "", "recap-ipv6.pcap", "hairpin.lua"]
    /// incompatible_with = ["on-a-stick"]
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let parsed: RegistryInput = toml::from_str(input)
            .map_err(|e| HarnessError::Usage(format!("invalid test registry: {e}")))?;
        let mut registry = Registry::new();
        for (idx, entry) in parsed.case.into_iter().enumerate() {
            if entry.name.trim().is_empty() {
                return Err(HarnessError::Usage(format!("test case #{idx} has no name")));
            }
            let mut case = TestCase::from_args(entry.name, &entry.args)?;
            case.incompatible_with.extend(entry.incompatible_with);
            registry.push(case);
        }
        Ok(registry)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| HarnessError::io(format!("reading {}", path.display()), e))?;
        Self::from_toml_str(&text)
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a TestCase;
    type IntoIter = std::slice::Iter<'a, TestCase>;

    fn into_iter(self) -> Self::IntoIter {
        self.cases.iter()
    }
}

impl FromIterator<TestCase> for Registry {
    fn from_iter<I: IntoIterator<Item = TestCase>>(iter: I) -> Self {
        Self {
            cases: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrong_interface_cases_skip_on_a_stick() {
        let case = TestCase::new(
            "bad-v6",
            ["a.conf", "", "in.pcap", "", "", "non-ipv6-traffic-to-ipv6-interface.lua"],
        );
        assert!(case.runs_in(ExecutionMode::Standard));
        assert!(!case.runs_in(ExecutionMode::OnAStick));

        let bare = TestCase::new(
            "bad-v4",
            ["a.conf", "in.pcap", "", "", "", "non-ipv4-traffic-to-ipv4-interface"],
        );
        assert!(!bare.runs_in(ExecutionMode::OnAStick));
    }

    #[test]
    fn only_the_two_wrong_interface_refs_are_tagged() {
        for counters in [
            "basic-counters.lua",
            "non-ipv6-traffic-to-ipv6-interface-extra.lua",
            "ipv6-interface.lua",
            "v2/non-ipv6-traffic-to-ipv6-interface.lua",
            "non-ipv4-traffic-to-ipv4-interface.pcap",
            "non-ipv4-traffic-to-ipv4-interface.lua.lua",
            "",
        ] {
            let case = TestCase::new("c", ["a.conf", "", "", "", "", counters]);
            assert!(case.runs_in(ExecutionMode::OnAStick), "{counters}");
        }
    }

    #[test]
    fn explicit_tag_is_honoured() {
        let case = TestCase::new("c", ["a.conf", "", "", "", "", "x.lua"])
            .incompatible_with(ExecutionMode::OnAStick);
        assert!(!case.runs_in(ExecutionMode::OnAStick));
    }

    #[test]
    fn registry_preserves_order_and_tags() {
        let toml = r#"
            [[case]]
            name = "first"
            args = ["a.conf", "v4.pcap", "v6.pcap", "o4.pcap", "o6.pcap", "c.lua"]

            [[case]]
            name = "second"
            args = ["a.conf", "", "", "", "", "c.lua"]
            incompatible_with = ["on-a-stick"]

            [[case]]
            name = "third"
            args = ["a.conf", "", "", "", "", "non-ipv6-traffic-to-ipv6-interface.lua"]
        "#;
        let reg = Registry::from_toml_str(toml).unwrap();
        let names: Vec<&str> = reg.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, ["first", "second", "third"]);
        let skipped: Vec<bool> = reg
            .iter()
            .map(|c| c.runs_in(ExecutionMode::OnAStick))
            .collect();
        assert_eq!(skipped, [true, false, false]);
    }

    #[test]
    fn registry_rejects_wrong_arity() {
        let toml = r#"
            [[case]]
            name = "short"
            args = ["a.conf", "v4.pcap", "v6.pcap", "o4.pcap", "o6.pcap"]
        "#;
        let err = Registry::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, HarnessError::Usage(ref m) if m.contains("has 5 arguments")));
    }

    #[test]
    fn registry_rejects_unnamed_case() {
        let toml = r#"
            [[case]]
            args = ["a", "b", "c", "d", "e", "f"]
        "#;
        assert!(Registry::from_toml_str(toml).is_err());
    }
}
