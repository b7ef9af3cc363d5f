//! Resolution of test-case references onto the test-data tree.
//!
//! - Non-empty references are appended to the test base.
//! - The empty string stands for the canonical empty capture.
//! - The last reference (counters) is appended to the counters directory,
//!   whatever the test base or run mode.
//!
//! Nothing here touches the filesystem; missing files surface when the
//! subject runs.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use crate::case::TestCase;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};

#[derive(Debug, Clone)]
pub struct PathResolver {
    test_base: PathBuf,
    empty_capture: PathBuf,
    counters_dir: PathBuf,
}

/// A test case with every reference made absolute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedCase {
    pub config: PathBuf,
    pub v4_in: PathBuf,
    pub v6_in: PathBuf,
    pub v4_out_golden: PathBuf,
    pub v6_out_golden: PathBuf,
    pub counters: PathBuf,
}

/// The subset of a case a soak run needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoakInputs {
    pub config: PathBuf,
    pub v4_in: PathBuf,
    pub v6_in: PathBuf,
}

impl PathResolver {
    pub fn new(
        test_base: impl Into<PathBuf>,
        empty_capture: impl Into<PathBuf>,
        counters_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            test_base: test_base.into(),
            empty_capture: empty_capture.into(),
            counters_dir: counters_dir.into(),
        }
    }

    pub fn from_config(cfg: &HarnessConfig) -> Self {
        Self::new(&cfg.test_base, &cfg.empty_capture, &cfg.counters_dir)
    }

    /// Same resolver rooted at a different test base.
    pub fn with_test_base(mut self, test_base: impl Into<PathBuf>) -> Self {
        self.test_base = test_base.into();
        self
    }

    pub fn test_base(&self) -> &Path {
        &self.test_base
    }

    /// Resolve positional references. The final element is the counters
    /// reference and must be non-empty.
    pub fn resolve(&self, args: &[&str]) -> Result<Vec<PathBuf>> {
        let Some((counters, inputs)) = args.split_last() else {
            return Err(HarnessError::Usage("no test arguments given".into()));
        };
        if counters.is_empty() {
            return Err(HarnessError::Usage("missing counters reference".into()));
        }
        let mut prepped: Vec<PathBuf> = inputs.iter().map(|arg| self.input(arg)).collect();
        prepped.push(concat(&self.counters_dir, counters));
        Ok(prepped)
    }

    pub fn resolve_case(&self, case: &TestCase) -> Result<ResolvedCase> {
        let resolved = self.resolve(&case.args()).map_err(|e| match e {
            HarnessError::Usage(msg) => HarnessError::Usage(format!("{}: {msg}", case.name)),
            other => other,
        })?;
        let [config, v4_in, v6_in, v4_out_golden, v6_out_golden, counters]: [PathBuf; 6] =
            resolved
                .try_into()
                .map_err(|_| HarnessError::Usage(format!("{}: malformed case", case.name)))?;
        Ok(ResolvedCase {
            config,
            v4_in,
            v6_in,
            v4_out_golden,
            v6_out_golden,
            counters,
        })
    }

    /// Resolve only the config and the two input captures.
    pub fn resolve_soak(&self, case: &TestCase) -> SoakInputs {
        SoakInputs {
            config: self.input(&case.config_ref),
            v4_in: self.input(&case.v4_in),
            v6_in: self.input(&case.v6_in),
        }
    }

    fn input(&self, arg: &str) -> PathBuf {
        if arg.is_empty() {
            self.empty_capture.clone()
        } else {
            concat(&self.test_base, arg)
        }
    }
}

/// `base + "/" + rel`, without `Path::join`'s absolute-path replacement.
fn concat(base: &Path, rel: &str) -> PathBuf {
    let mut joined = OsString::from(base.as_os_str());
    joined.push("/");
    joined.push(rel);
    PathBuf::from(joined)
}
