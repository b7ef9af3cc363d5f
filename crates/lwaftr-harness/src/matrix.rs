//! End-to-end mode matrix.
//!
//! Every registered case runs under each [`ExecutionMode`] in registry
//! order, Standard before OnAStick, or is regenerated once when the
//! configuration asks for regeneration. The first failure ends the batch.

use crate::case::{ExecutionMode, Registry, TestCase};
use crate::commands;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::paths::{PathResolver, ResolvedCase};
use crate::regen::{regenerate, remove_stale};
use crate::report::{BatchReport, Phase, RunOutcome};
use crate::subject::Subject;
use crate::verify::verify;

pub struct MatrixRunner<'a> {
    cfg: &'a HarnessConfig,
    subject: &'a dyn Subject,
    resolver: PathResolver,
}

impl<'a> MatrixRunner<'a> {
    pub fn new(cfg: &'a HarnessConfig, subject: &'a dyn Subject) -> Self {
        Self {
            cfg,
            subject,
            resolver: PathResolver::from_config(cfg),
        }
    }

    pub fn with_resolver(mut self, resolver: PathResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Run the whole registry. `Err` is the first fatal condition; nothing
    /// after it ran.
    pub fn run(&self, registry: &Registry) -> Result<BatchReport> {
        // Resolve everything first so a malformed case is reported before
        // any subprocess is spawned.
        let resolved = registry
            .iter()
            .map(|case| self.resolver.resolve_case(case))
            .collect::<Result<Vec<_>>>()?;

        let mut report = BatchReport::echoing(self.cfg.progress);
        for (case, paths) in registry.iter().zip(&resolved) {
            tracing::info!(case = %case.name, "running test case");
            if self.cfg.is_regenerating() {
                regenerate(self.subject, self.cfg, paths)?;
                report.record(&case.name, Phase::Regenerate, RunOutcome::Pass);
                continue;
            }
            for mode in ExecutionMode::ALL {
                let outcome = match skip_reason(case, mode) {
                    Some(reason) => {
                        tracing::info!(case = %case.name, %mode, "test skipped");
                        RunOutcome::Skipped(reason)
                    }
                    None => {
                        self.verify_in(paths, mode)?;
                        tracing::info!(case = %case.name, %mode, "test passed");
                        RunOutcome::Pass
                    }
                };
                report.record(&case.name, Phase::Verify(mode), outcome);
            }
        }
        tracing::info!(%report, "end-to-end batch finished");
        Ok(report)
    }

    /// Run one case under one mode, folding subject failures and mismatches
    /// into [`RunOutcome::Fail`].
    pub fn run_case(&self, case: &TestCase, mode: ExecutionMode) -> Result<RunOutcome> {
        if let Some(reason) = skip_reason(case, mode) {
            return Ok(RunOutcome::Skipped(reason));
        }
        let paths = self.resolver.resolve_case(case)?;
        match self.verify_in(&paths, mode) {
            Ok(()) => Ok(RunOutcome::Pass),
            Err(e @ (HarnessError::SubjectFailed { .. } | HarnessError::Mismatch { .. })) => {
                Ok(RunOutcome::Fail(e.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    fn verify_in(&self, case: &ResolvedCase, mode: ExecutionMode) -> Result<()> {
        let v4_out = self.cfg.v4_output();
        let v6_out = self.cfg.v6_output();
        remove_stale(&[&v4_out, &v6_out])?;

        let inv = commands::check(mode, case, &v4_out, &v6_out);
        let failmsg = format!("Failure: {}", self.subject.describe(&inv));
        let exit = self.subject.execute(&inv)?;
        if !exit.success() {
            return Err(HarnessError::SubjectFailed {
                exit,
                message: failmsg,
            });
        }
        verify(&v4_out, &case.v4_out_golden, &failmsg)?;
        verify(&v6_out, &case.v6_out_golden, &failmsg)?;
        Ok(())
    }
}

fn skip_reason(case: &TestCase, mode: ExecutionMode) -> Option<String> {
    (!case.runs_in(mode)).then(|| format!("{} cannot run {mode}", case.name))
}
