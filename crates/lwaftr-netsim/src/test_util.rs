use crate::discovery::tap_backend;

/// Check whether we have sufficient privileges (root) and tools (`ip`)
/// available to manage TAP interfaces. Returns `false` if the test
/// environment cannot support TAP-based tests.
pub fn check_privileges() -> bool {
    tap_backend().is_available()
}
