//! Sighting deduplication.
//!
//! Ranging snapshots report every visible beacon roughly once a second. The
//! recorder keeps a bounded history of accepted sightings and only accepts a
//! new sighting of a beacon once the uniqueness throttle has elapsed since
//! the most recent accepted sighting of that beacon.
//!
//! History is ordered oldest first. It is appended to as sightings are
//! accepted, so a duplicate later in the same snapshot is checked against
//! earlier sightings of that snapshot too, and truncated from the front once
//! it exceeds its capacity.

use tracing::{debug, trace};

use crate::catalog::UniquenessThrottle;
use crate::sighting::{RangeSighting, RawSighting};
use crate::types::BeaconKey;

/// Deduplicates raw scanner sightings against a bounded history.
#[derive(Debug, Clone, Copy)]
pub struct SightingRecorder {
    history_limit: usize,
}

impl Default for SightingRecorder {
    fn default() -> Self {
        Self::new(crate::config::DEFAULT_HISTORY_LIMIT)
    }
}

impl SightingRecorder {
    /// Create a recorder retaining at most `history_limit` sightings.
    #[must_use]
    pub const fn new(history_limit: usize) -> Self {
        Self { history_limit }
    }

    /// History capacity.
    #[must_use]
    pub const fn history_limit(&self) -> usize {
        self.history_limit
    }

    /// Accept the sightings of `snapshot` that are new enough.
    ///
    /// Accepted sightings are appended to `history`, which is then truncated
    /// to the most recent `history_limit` entries. Returns the accepted
    /// sightings in snapshot order.
    pub fn accept(
        &self,
        snapshot: impl IntoIterator<Item = RawSighting>,
        throttle: UniquenessThrottle,
        history: &mut Vec<RangeSighting>,
    ) -> Vec<RangeSighting> {
        let mut accepted = Vec::new();

        for raw in snapshot {
            let sighting = RangeSighting::from(raw);
            if is_new_enough(&sighting, throttle, history) {
                trace!(beacon = %sighting.key(), seen_at_ms = sighting.seen_at_ms(), "Sighting accepted");
                history.push(sighting.clone());
                accepted.push(sighting);
            }
        }

        self.truncate(history);
        debug!(
            accepted = accepted.len(),
            history = history.len(),
            "Ranging snapshot recorded"
        );
        accepted
    }

    /// Drop the oldest entries beyond capacity.
    pub fn truncate(&self, history: &mut Vec<RangeSighting>) {
        if history.len() > self.history_limit {
            let excess = history.len() - self.history_limit;
            history.drain(..excess);
        }
    }
}

/// Most recent `seen_at` among history entries for `key`.
#[must_use]
pub fn last_seen(key: BeaconKey, history: &[RangeSighting]) -> Option<i64> {
    history
        .iter()
        .filter(|entry| entry.key() == key)
        .map(RangeSighting::seen_at_ms)
        .max()
}

/// Whether `sighting` is at least `throttle` after the last sighting of its beacon.
#[must_use]
pub fn is_new_enough(
    sighting: &RangeSighting,
    throttle: UniquenessThrottle,
    history: &[RangeSighting],
) -> bool {
    last_seen(sighting.key(), history).map_or(true, |last| {
        i128::from(sighting.seen_at_ms()) - i128::from(last) >= i128::from(throttle.as_millis())
    })
}
