//! Byte-exact comparison of produced outputs against golden fixtures.
//!
//! Fixtures are opaque: a capture or counters file is equal to its golden
//! copy iff every byte matches. Nothing is parsed.

use std::fs::{File, Metadata};
use std::io::{BufReader, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use chrono::{DateTime, Local};

use crate::error::{HarnessError, Result};

const CHUNK: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Match,
    /// Files differ or one is unreadable; carries a listing of both.
    Mismatch { listing: String },
}

impl Verdict {
    pub fn is_match(&self) -> bool {
        matches!(self, Verdict::Match)
    }
}

/// Compare `actual` with `golden` byte for byte.
///
/// A missing or unreadable file is a mismatch, not an error.
pub fn compare(actual: &Path, golden: &Path) -> Verdict {
    match files_equal(actual, golden) {
        Ok(true) => Verdict::Match,
        Ok(false) => Verdict::Mismatch {
            listing: listing(&[golden, actual]),
        },
        Err(e) => {
            tracing::debug!(error = %e, "comparison could not read a file");
            Verdict::Mismatch {
                listing: listing(&[golden, actual]),
            }
        }
    }
}

/// Like [`compare`], turning a mismatch into a fatal [`HarnessError::Mismatch`]
/// tagged with `failmsg`.
pub fn verify(actual: &Path, golden: &Path, failmsg: &str) -> Result<()> {
    match compare(actual, golden) {
        Verdict::Match => Ok(()),
        Verdict::Mismatch { listing } => {
            tracing::error!(
                actual = %actual.display(),
                golden = %golden.display(),
                "output differs from golden fixture"
            );
            Err(HarnessError::Mismatch {
                message: format!(
                    "{failmsg}\n{} and {} differ",
                    golden.display(),
                    actual.display()
                ),
                actual: actual.to_path_buf(),
                golden: golden.to_path_buf(),
                listing,
            })
        }
    }
}

fn files_equal(a: &Path, b: &Path) -> std::io::Result<bool> {
    let fa = File::open(a)?;
    let fb = File::open(b)?;
    if fa.metadata()?.len() != fb.metadata()?.len() {
        return Ok(false);
    }

    let mut ra = BufReader::with_capacity(CHUNK, fa);
    let mut rb = BufReader::with_capacity(CHUNK, fb);
    let mut ba = vec![0u8; CHUNK];
    let mut bb = vec![0u8; CHUNK];
    loop {
        let na = read_full(&mut ra, &mut ba)?;
        let nb = read_full(&mut rb, &mut bb)?;
        if na != nb || ba[..na] != bb[..nb] {
            return Ok(false);
        }
        if na == 0 {
            return Ok(true);
        }
    }
}

/// Fill `buf` as far as the reader allows; returns bytes read.
fn read_full(r: &mut impl Read, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// `ls -l` style listing of `paths`, one per line. Symlinks are listed
/// themselves, with their target, rather than followed.
pub fn listing(paths: &[&Path]) -> String {
    paths
        .iter()
        .map(|p| match std::fs::symlink_metadata(p) {
            Ok(meta) => list_entry(p, &meta),
            Err(e) => format!("ls: cannot access '{}': {e}", p.display()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn list_entry(path: &Path, meta: &Metadata) -> String {
    let modified = meta
        .modified()
        .map(|t| DateTime::<Local>::from(t).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|_| "?".into());
    let mut entry = format!(
        "{} {:>10} {} {}",
        mode_string(meta),
        meta.len(),
        modified,
        path.display()
    );
    if meta.file_type().is_symlink() {
        if let Ok(target) = std::fs::read_link(path) {
            entry.push_str(&format!(" -> {}", target.display()));
        }
    }
    entry
}

fn mode_string(meta: &Metadata) -> String {
    let mode = meta.permissions().mode();
    let kind = if meta.is_dir() {
        'd'
    } else if meta.file_type().is_symlink() {
        'l'
    } else {
        '-'
    };
    let mut s = String::with_capacity(10);
    s.push(kind);
    for shift in [6, 3, 0] {
        let bits = (mode >> shift) & 0o7;
        s.push(if bits & 0o4 != 0 { 'r' } else { '-' });
        s.push(if bits & 0o2 != 0 { 'w' } else { '-' });
        s.push(if bits & 0o1 != 0 { 'x' } else { '-' });
    }
    s
}
