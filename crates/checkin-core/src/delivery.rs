//! Reliable delivery of accepted sightings.
//!
//! The pending queue lives in the store so it survives restarts. Each
//! attempt posts the whole queue as one batch: success clears it, failure
//! keeps it and arms the single retry deadline owned by the manager.
//! Re-arming replaces the previous deadline, so consecutive failures never
//! stack retries.

use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::error::CheckinError;
use crate::sighting::{RangeSighting, WireSighting};
use crate::storage::{SightingStore, PENDING_KEY};
use crate::transport::{endpoints, Transport};

/// Body of a `beacon_range_actions` POST.
#[derive(Debug, Serialize)]
struct RangeActionBatch {
    beacons: Vec<WireSighting>,
}

/// Result of a delivery attempt.
#[derive(Debug)]
pub enum DeliveryOutcome {
    /// Nothing was pending.
    Empty,
    /// The batch was acknowledged and the queue cleared.
    Delivered {
        /// Number of sightings delivered.
        count: usize,
    },
    /// The batch failed; it stays queued and a retry is armed.
    RetryScheduled {
        /// Number of sightings still pending.
        count: usize,
        /// Why the batch failed.
        error: CheckinError,
    },
}

/// Posts the pending queue and owns its retry deadline.
pub struct DeliveryManager {
    transport: Arc<dyn Transport>,
    store: SightingStore,
    timezone: Tz,
    retry_delay: Duration,
    retry_at: Option<Instant>,
}

impl DeliveryManager {
    /// Create a manager for one instance's pending queue.
    pub fn new(
        transport: Arc<dyn Transport>,
        store: SightingStore,
        retry_delay: Duration,
        timezone: Tz,
    ) -> Self {
        Self {
            transport,
            store,
            timezone,
            retry_delay,
            retry_at: None,
        }
    }

    /// When the armed retry fires, if one is armed.
    #[must_use]
    pub const fn retry_deadline(&self) -> Option<Instant> {
        self.retry_at
    }

    /// Disarm the retry deadline.
    pub fn cancel_retry(&mut self) {
        if self.retry_at.take().is_some() {
            debug!(namespace = %self.store.namespace(), "Pending delivery retry cancelled");
        }
    }

    /// Deliver `newly_accepted` together with everything already pending.
    pub async fn deliver(&mut self, newly_accepted: Vec<RangeSighting>) -> DeliveryOutcome {
        let namespace = self.store.namespace().to_string();

        let mut queue = self.store.load_or_reset(PENDING_KEY).unwrap_or_else(|e| {
            error!(%namespace, error = %e, "Failed to load pending range actions");
            Vec::new()
        });
        let grew = !newly_accepted.is_empty();
        queue.extend(newly_accepted);

        if queue.is_empty() {
            debug!(%namespace, "No range actions pending");
            return DeliveryOutcome::Empty;
        }
        if grew {
            // persisted before sending so a crash mid-request loses nothing
            self.persist(&queue);
        }

        let count = queue.len();
        let batch = RangeActionBatch {
            beacons: queue.iter().map(|s| s.to_wire(self.timezone)).collect(),
        };
        let result = match serde_json::to_value(&batch) {
            Ok(body) => self.transport.post(endpoints::RANGE_ACTIONS, body).await,
            Err(e) => Err(crate::transport::TransportError::new(0, e.to_string())),
        };

        match result {
            Ok(_) => {
                self.persist(&[]);
                self.cancel_retry();
                info!(%namespace, count, "Beacon range actions posted");
                DeliveryOutcome::Delivered { count }
            }
            Err(e) => {
                let error = CheckinError::DeliveryError {
                    count,
                    code: e.code,
                    message: e.message,
                };
                self.persist(&queue);
                self.schedule_retry();
                warn!(
                    %namespace,
                    error = %error,
                    retry_in_secs = self.retry_delay.as_secs(),
                    "Beacon range actions kept in send list"
                );
                DeliveryOutcome::RetryScheduled { count, error }
            }
        }
    }

    fn schedule_retry(&mut self) {
        let deadline = Instant::now() + self.retry_delay;
        if self.retry_at.replace(deadline).is_some() {
            debug!(namespace = %self.store.namespace(), "Replacing armed delivery retry");
        }
    }

    fn persist(&self, queue: &[RangeSighting]) {
        if let Err(e) = self.store.save_pending(queue) {
            error!(
                namespace = %self.store.namespace(),
                error = %e,
                count = queue.len(),
                "Failed to persist pending range actions"
            );
        }
    }
}
