//! Exit condition gating the final disconnect of a seeding session.

use std::sync::atomic::{AtomicBool, Ordering};

/// Progress of one seeding session.
///
/// Mutated only under the tracker lock, so a copy handed out by the tracker
/// is a consistent snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedCounters {
    /// Acknowledged-QoS publishes issued but not yet both acked and recorded.
    pub outstanding_publishes: usize,
    /// Set once the seeding walk has issued its last publish.
    pub seeding_complete: bool,
}

impl SeedCounters {
    /// Nothing left in flight and nothing left to issue.
    pub fn drained(&self) -> bool {
        self.outstanding_publishes == 0 && self.seeding_complete
    }
}

/// Fires the disconnect at most once per connection.
#[derive(Debug, Default)]
pub struct DrainCoordinator {
    fired: AtomicBool,
}

impl DrainCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` exactly once: on the first call that observes drained
    /// counters. Every later call returns `false`.
    pub fn should_disconnect(&self, counters: SeedCounters) -> bool {
        counters.drained()
            && self
                .fired
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    /// Re-arm after the connection was lost.
    pub fn reset(&self) {
        self.fired.store(false, Ordering::Release);
    }
}
