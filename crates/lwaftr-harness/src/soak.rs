//! Soak runs: each case is fed to `soaktest` in both topologies. Only the
//! exit status matters.

use std::path::PathBuf;
use std::time::Duration;

use crate::case::{ExecutionMode, Registry};
use crate::commands;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::paths::PathResolver;
use crate::report::{BatchReport, Phase, RunOutcome};
use crate::subject::Subject;

pub struct SoakRunner<'a> {
    subject: &'a dyn Subject,
    resolver: PathResolver,
    duration: Duration,
    progress: bool,
}

impl<'a> SoakRunner<'a> {
    pub fn new(cfg: &HarnessConfig, subject: &'a dyn Subject) -> Self {
        Self {
            subject,
            resolver: PathResolver::from_config(cfg),
            duration: cfg.soak_duration,
            progress: cfg.progress,
        }
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    /// Resolve inputs under a different test-data root, e.g. the VLAN tree.
    pub fn with_test_base(mut self, test_base: impl Into<PathBuf>) -> Self {
        self.resolver = self.resolver.with_test_base(test_base);
        self
    }

    pub fn run(&self, registry: &Registry) -> Result<BatchReport> {
        if self.duration.is_zero() {
            return Err(HarnessError::Usage("soak duration must be positive".into()));
        }
        let mut report = BatchReport::echoing(self.progress);
        for case in registry {
            let inputs = self.resolver.resolve_soak(case);
            for mode in ExecutionMode::ALL {
                let inv = commands::soaktest(self.duration, mode, &inputs);
                tracing::info!(case = %case.name, %mode, duration = ?self.duration, "soaking");
                let exit = self.subject.execute(&inv)?;
                if !exit.success() {
                    return Err(HarnessError::SubjectFailed {
                        exit,
                        message: format!(
                            "Failure: soaktest of {} returned nonzero: {}",
                            case.name,
                            self.subject.describe(&inv)
                        ),
                    });
                }
                report.record(&case.name, Phase::Soak(mode), RunOutcome::Pass);
            }
        }
        tracing::info!(%report, "soak batch finished");
        Ok(report)
    }
}
