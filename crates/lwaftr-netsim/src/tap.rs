use once_cell::sync::Lazy;
use rand::Rng;
use std::collections::HashSet;
use std::io;
use std::process::Command;
use std::sync::{Arc, Mutex};

/// Linux interface names are limited to 15 characters.
const IFNAMSIZ: usize = 15;

/// TAP names currently owned by a live [`TapInterface`] in this process.
static CLAIMED: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

/// Creates and deletes TAP devices on the host.
pub trait TapBackend: Send + Sync {
    fn add(&self, name: &str) -> io::Result<()>;
    fn delete(&self, name: &str) -> io::Result<()>;
}

/// [`TapBackend`] backed by `ip tuntap`.
#[derive(Debug, Clone, Default)]
pub struct IpTuntap;

impl IpTuntap {
    pub fn new() -> Self {
        Self
    }

    fn ip(&self, args: &[&str]) -> io::Result<std::process::Output> {
        Command::new("ip").args(args).output()
    }
}

impl TapBackend for IpTuntap {
    fn add(&self, name: &str) -> io::Result<()> {
        let output = self.ip(&["tuntap", "add", name, "mode", "tap"])?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "Failed to create TAP {name}: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }

    fn delete(&self, name: &str) -> io::Result<()> {
        let output = self.ip(&["tuntap", "delete", name, "mode", "tap"])?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "Failed to delete TAP {name}: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(())
    }
}

/// Generates a `tapNNNNNN` name with six random digits.
pub fn random_tap_name() -> String {
    let mut rng = rand::rng();
    format!("tap{}", rng.random_range(100_000..1_000_000))
}

/// A TAP interface owned by the current process.
///
/// Creates the device on construction and deletes it exactly once, either
/// through [`TapInterface::release`] or on drop. While the guard lives no
/// other guard in the process may claim the same name.
pub struct TapInterface {
    name: String,
    backend: Arc<dyn TapBackend>,
    released: bool,
}

impl TapInterface {
    pub fn create(backend: Arc<dyn TapBackend>, name: &str) -> io::Result<Self> {
        if name.is_empty() || name.len() > IFNAMSIZ {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("invalid interface name {name:?}"),
            ));
        }
        claim(name)?;
        if let Err(e) = backend.add(name) {
            unclaim(name);
            return Err(e);
        }
        tracing::debug!(tap = %name, "TAP interface created");
        Ok(Self {
            name: name.to_string(),
            backend,
            released: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Delete the interface now, surfacing any error.
    pub fn release(mut self) -> io::Result<()> {
        self.delete()
    }

    fn delete(&mut self) -> io::Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        unclaim(&self.name);
        let res = self.backend.delete(&self.name);
        if res.is_ok() {
            tracing::debug!(tap = %self.name, "TAP interface deleted");
        }
        res
    }
}

impl Drop for TapInterface {
    fn drop(&mut self) {
        if let Err(e) = self.delete() {
            tracing::warn!(tap = %self.name, error = %e, "failed to delete TAP interface");
        }
    }
}

impl std::fmt::Debug for TapInterface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapInterface")
            .field("name", &self.name)
            .field("released", &self.released)
            .finish()
    }
}

fn claim(name: &str) -> io::Result<()> {
    let mut claimed = CLAIMED.lock().unwrap_or_else(|e| e.into_inner());
    if !claimed.insert(name.to_string()) {
        return Err(io::Error::new(
            io::ErrorKind::AlreadyExists,
            format!("TAP interface {name} is already claimed by another session"),
        ));
    }
    Ok(())
}

fn unclaim(name: &str) {
    let mut claimed = CLAIMED.lock().unwrap_or_else(|e| e.into_inner());
    claimed.remove(name);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::check_privileges;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
        fail_add: bool,
    }

    impl TapBackend for Recorder {
        fn add(&self, name: &str) -> io::Result<()> {
            if self.fail_add {
                return Err(io::Error::other("add refused"));
            }
            self.events.lock().unwrap().push(format!("add {name}"));
            Ok(())
        }

        fn delete(&self, name: &str) -> io::Result<()> {
            self.events.lock().unwrap().push(format!("delete {name}"));
            Ok(())
        }
    }

    #[test]
    fn drop_deletes_once() {
        let rec = Arc::new(Recorder::default());
        let tap = TapInterface::create(rec.clone(), "tapdrop0").unwrap();
        assert_eq!(tap.name(), "tapdrop0");
        drop(tap);
        assert_eq!(
            *rec.events.lock().unwrap(),
            vec!["add tapdrop0".to_string(), "delete tapdrop0".to_string()]
        );
    }

    #[test]
    fn release_then_drop_is_single_delete() {
        let rec = Arc::new(Recorder::default());
        let tap = TapInterface::create(rec.clone(), "taprel0").unwrap();
        tap.release().unwrap();
        assert_eq!(rec.events.lock().unwrap().len(), 2);
    }

    #[test]
    fn name_is_single_owner() {
        let rec = Arc::new(Recorder::default());
        let first = TapInterface::create(rec.clone(), "tapown0").unwrap();
        let err = TapInterface::create(rec.clone(), "tapown0").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        drop(first);
        // Name is free again once the owner is gone.
        let again = TapInterface::create(rec, "tapown0").unwrap();
        drop(again);
    }

    #[test]
    fn failed_add_frees_claim() {
        let rec = Arc::new(Recorder {
            fail_add: true,
            ..Default::default()
        });
        assert!(TapInterface::create(rec.clone(), "tapfail0").is_err());
        assert!(rec.events.lock().unwrap().is_empty());
        let ok = Arc::new(Recorder::default());
        TapInterface::create(ok, "tapfail0").unwrap();
    }

    #[test]
    fn rejects_overlong_names() {
        let rec = Arc::new(Recorder::default());
        assert!(TapInterface::create(rec, "tap-name-way-too-long").is_err());
    }

    #[test]
    fn random_names_fit_ifnamsiz() {
        let name = random_tap_name();
        assert!(name.starts_with("tap"));
        assert_eq!(name.len(), 9);
        assert!(name[3..].chars().all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn test_real_tap_lifecycle() {
        if !check_privileges() {
            eprintln!("Skipping test, insufficient privileges or missing tools");
            return;
        }

        let name = random_tap_name();
        let tap = TapInterface::create(Arc::new(IpTuntap::new()), &name)
            .expect("Failed to create TAP");
        let out = Command::new("ip")
            .args(["tuntap", "list"])
            .output()
            .expect("Failed to list TAPs");
        assert!(String::from_utf8_lossy(&out.stdout).contains(&name));

        tap.release().expect("Failed to delete TAP");
        let out = Command::new("ip")
            .args(["tuntap", "list"])
            .output()
            .expect("Failed to list TAPs");
        assert!(!String::from_utf8_lossy(&out.stdout).contains(&name));
    }
}
