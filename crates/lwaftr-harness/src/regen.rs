//! Golden fixture regeneration.
//!
//! The subject is run once per case with `-r`, which makes it rewrite the
//! counters script in place. The output captures it produced are then
//! adopted as the new golden captures.

use std::fs;
use std::path::Path;

use crate::commands;
use crate::config::HarnessConfig;
use crate::error::{HarnessError, Result};
use crate::paths::ResolvedCase;
use crate::subject::Subject;

/// Delete leftover outputs so a run can never pass on a previous run's files.
pub fn remove_stale(paths: &[&Path]) -> Result<()> {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "removed stale output"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(HarnessError::io(
                    format!("removing stale output {}", path.display()),
                    e,
                ))
            }
        }
    }
    Ok(())
}

/// Regenerate the fixtures of one resolved case.
pub fn regenerate(subject: &dyn Subject, cfg: &HarnessConfig, case: &ResolvedCase) -> Result<()> {
    let v4_out = cfg.v4_output();
    let v6_out = cfg.v6_output();
    remove_stale(&[&v4_out, &v6_out])?;

    let inv = commands::check_regen(case, &v4_out, &v6_out);
    let exit = subject.execute(&inv)?;
    if !exit.success() {
        return Err(HarnessError::SubjectFailed {
            exit,
            message: format!("Failed to regen counters:\n\t: {}", subject.describe(&inv)),
        });
    }

    for (produced, golden) in [(&v4_out, &case.v4_out_golden), (&v6_out, &case.v6_out_golden)] {
        // Cases without an expected capture point at the shared empty
        // capture, which must never be rewritten.
        if golden == &cfg.empty_capture {
            continue;
        }
        adopt(produced, golden)?;
    }
    tracing::info!(counters = %case.counters.display(), "regenerated fixtures");
    Ok(())
}

/// Copy `produced` over `golden` via a sibling temp file and rename, so a
/// failed copy never leaves a truncated fixture behind.
fn adopt(produced: &Path, golden: &Path) -> Result<()> {
    let mut tmp = golden.as_os_str().to_owned();
    tmp.push(".regen");
    let tmp = std::path::PathBuf::from(tmp);
    fs::copy(produced, &tmp).map_err(|e| {
        HarnessError::io(
            format!("copying {} to {}", produced.display(), tmp.display()),
            e,
        )
    })?;
    fs::rename(&tmp, golden).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        HarnessError::io(format!("replacing golden {}", golden.display()), e)
    })?;
    tracing::debug!(golden = %golden.display(), "golden capture updated");
    Ok(())
}
