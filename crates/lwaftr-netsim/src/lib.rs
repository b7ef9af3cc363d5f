//! Host network plumbing for lwAFTR integration testing.
//!
//! Provides discovery of the physical NICs and TAP interfaces a test run may
//! use, and a drop-guarded TAP interface whose lifetime can be bound to a
//! daemon session.

pub mod discovery;
pub mod tap;

pub mod test_util;
