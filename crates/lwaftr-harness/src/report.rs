use std::fmt;

use serde::Serialize;

use crate::case::ExecutionMode;

/// Result of one case under one mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "lowercase")]
pub enum RunOutcome {
    Pass,
    Fail(String),
    Skipped(String),
}

impl RunOutcome {
    pub fn is_fail(&self) -> bool {
        matches!(self, RunOutcome::Fail(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, RunOutcome::Skipped(_))
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Pass => f.write_str("passed"),
            RunOutcome::Fail(d) => write!(f, "FAILED: {d}"),
            RunOutcome::Skipped(r) => write!(f, "skipped ({r})"),
        }
    }
}

/// Which kind of run produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Verify(ExecutionMode),
    Regenerate,
    Soak(ExecutionMode),
    Subcommand,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Verify(m) => write!(f, "verify/{m}"),
            Phase::Regenerate => f.write_str("regenerate"),
            Phase::Soak(m) => write!(f, "soak/{m}"),
            Phase::Subcommand => f.write_str("subcommand"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CaseReport {
    pub name: String,
    pub phase: Phase,
    #[serde(flatten)]
    pub outcome: RunOutcome,
}

impl fmt::Display for CaseReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (name, phase) = (&self.name, self.phase);
        match &self.outcome {
            RunOutcome::Pass => write!(f, "Test passed: {name} [{phase}]"),
            RunOutcome::Skipped(r) => write!(f, "Test skipped: {name} [{phase}]: {r}"),
            RunOutcome::Fail(d) => write!(f, "Test failed: {name} [{phase}]: {d}"),
        }
    }
}

/// Ordered record of everything a runner did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub records: Vec<CaseReport>,
    /// Print each record on stdout as it is added.
    #[serde(skip)]
    echo: bool,
}

impl BatchReport {
    /// An empty report that prints each record on stdout when `echo` is set.
    pub fn echoing(echo: bool) -> Self {
        Self {
            records: Vec::new(),
            echo,
        }
    }

    pub fn record(&mut self, name: &str, phase: Phase, outcome: RunOutcome) {
        let record = CaseReport {
            name: name.to_string(),
            phase,
            outcome,
        };
        if self.echo {
            println!("{record}");
        }
        self.records.push(record);
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, RunOutcome::Pass))
    }

    pub fn skipped(&self) -> usize {
        self.count(RunOutcome::is_skipped)
    }

    pub fn failed(&self) -> usize {
        self.count(RunOutcome::is_fail)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn extend(&mut self, other: BatchReport) {
        self.records.extend(other.records);
    }

    fn count(&self, pred: impl Fn(&RunOutcome) -> bool) -> usize {
        self.records.iter().filter(|r| pred(&r.outcome)).count()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} passed, {} skipped, {} failed",
            self.passed(),
            self.skipped(),
            self.failed()
        )
    }
}
