// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Delay between reconciliation cycles

use std::time::Duration;

/// Delay between cycles. It is the regular interval while cycles succeed and doubles
/// with every consecutive failure, up to a maximum.
#[derive(Clone, Debug)]
pub struct Backoff {
    interval: Duration,
    max: Duration,
    failures: u32,
}

impl Backoff {
    /// Doubling stops beyond this many failures; the maximum is reached long before
    const MAX_DOUBLINGS: u32 = 16;

    /// A backoff sleeping `interval` between successful cycles and at most `max` after failures.
    /// A `max` below `interval` is raised to `interval`.
    #[must_use]
    pub fn new(interval: Duration, max: Duration) -> Self {
        Self {
            interval,
            max: max.max(interval),
            failures: 0,
        }
    }

    /// Record a successful cycle
    pub fn reset(&mut self) {
        self.failures = 0;
    }

    /// Record a failed cycle and return the delay until the next one
    pub fn failed(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        self.delay()
    }

    #[must_use]
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// The delay until the next cycle
    #[must_use]
    pub fn delay(&self) -> Duration {
        let factor = 1u32 << self.failures.min(Self::MAX_DOUBLINGS);
        self.interval.saturating_mul(factor).min(self.max)
    }
}
