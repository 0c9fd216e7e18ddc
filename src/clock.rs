//! Clock sources for `clock_time_get`.
//!
//! ## Authors
//!
//! The wasi-host Development Team.
//!
//! ## Licensing and copyright notice
//!
//! See the `LICENSE.md` file in the wasi-host root directory for
//! information on licensing and copyright.

use std::time::{SystemTime, UNIX_EPOCH};

/// A time source for the guest.
pub trait Clock: Send {
    /// The current time in nanoseconds since the Unix epoch.
    fn now(&self) -> u64;
}

/// The host's wall clock. This is the default clock source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// A clock that always reports the same instant. Useful for reproducible
/// runs and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedClock(pub u64);

impl FixedClock {
    /// A fixed clock at `secs` seconds plus `nanos` nanoseconds past the
    /// Unix epoch.
    pub fn new(secs: u64, nanos: u32) -> FixedClock {
        FixedClock(secs * 1_000_000_000 + nanos as u64)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> u64 {
        self.0
    }
}
