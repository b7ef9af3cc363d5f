//! Resource discovery: which NICs and TAP interfaces this host offers.
//!
//! Physical NICs are never probed; their identifiers come from the
//! environment (`SNABB_PCI0`, `SNABB_PCI1`) and are treated as read-only
//! configuration. TAP support needs root and a working `ip tuntap`.

use std::fmt;
use std::process::Command;

use crate::tap::IpTuntap;

/// Environment variable naming the first physical NIC.
pub const NIC0_VAR: &str = "SNABB_PCI0";
/// Environment variable naming the second physical NIC.
pub const NIC1_VAR: &str = "SNABB_PCI1";

/// A discovered resource, or the reason it cannot be used.
///
/// Unavailability is never an error: dependent tests are skipped with the
/// carried reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Availability<T> {
    Available(T),
    Unavailable(String),
}

impl<T> Availability<T> {
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Availability::Unavailable(reason.into())
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Availability::Available(_))
    }

    pub fn as_ref(&self) -> Availability<&T> {
        match self {
            Availability::Available(v) => Availability::Available(v),
            Availability::Unavailable(r) => Availability::Unavailable(r.clone()),
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Availability<U> {
        match self {
            Availability::Available(v) => Availability::Available(f(v)),
            Availability::Unavailable(r) => Availability::Unavailable(r),
        }
    }

    /// Combine two resources; the first missing one supplies the reason.
    pub fn and<U>(self, other: Availability<U>) -> Availability<(T, U)> {
        match (self, other) {
            (Availability::Available(a), Availability::Available(b)) => {
                Availability::Available((a, b))
            }
            (Availability::Unavailable(r), _) | (_, Availability::Unavailable(r)) => {
                Availability::Unavailable(r)
            }
        }
    }
}

/// Identifiers of the two physical NICs wired to the subject.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NicNames {
    pub nic0: Option<String>,
    pub nic1: Option<String>,
}

impl NicNames {
    /// Read NIC identifiers through `lookup`. Empty values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        Self {
            nic0: get(NIC0_VAR),
            nic1: get(NIC1_VAR),
        }
    }

    /// The first NIC alone (on-a-stick topologies).
    pub fn first(&self) -> Availability<String> {
        match &self.nic0 {
            Some(n) => Availability::Available(n.clone()),
            None => Availability::unavailable("NIC not configured"),
        }
    }

    /// Both NICs (dual-interface topologies).
    pub fn pair(&self) -> Availability<(String, String)> {
        match (&self.nic0, &self.nic1) {
            (Some(a), Some(b)) => Availability::Available((a.clone(), b.clone())),
            _ => Availability::unavailable("NICs not configured"),
        }
    }
}

impl fmt::Display for NicNames {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}={} {}={}",
            NIC0_VAR,
            self.nic0.as_deref().unwrap_or("-"),
            NIC1_VAR,
            self.nic1.as_deref().unwrap_or("-")
        )
    }
}

/// Whether the process runs with an effective uid of 0.
pub fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

/// The host's TAP backend, if this process may create TAP interfaces.
pub fn tap_backend() -> Availability<IpTuntap> {
    let probe = match Command::new("ip").args(["tuntap", "list"]).output() {
        Ok(out) if out.status.success() => Ok(()),
        Ok(out) => Err(format!(
            "ip tuntap list failed: {}",
            String::from_utf8_lossy(&out.stderr).trim()
        )),
        Err(e) => Err(format!("cannot run ip: {e}")),
    };
    tap_support(is_root(), probe)
}

fn tap_support(root: bool, probe: Result<(), String>) -> Availability<IpTuntap> {
    if !root {
        return Availability::unavailable("TAP interfaces need root");
    }
    match probe {
        Ok(()) => Availability::Available(IpTuntap::new()),
        Err(reason) => Availability::Unavailable(reason),
    }
}
