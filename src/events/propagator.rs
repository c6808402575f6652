use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::constants::{OUTBOX_RELAY_BATCH, OUTBOX_RELAY_GRACE_SECS};
use crate::events::{FanoutExchange, RatingChangeEvent};
use crate::store::{Store, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayReport {
    pub republished: usize,
    pub failed: usize,
}

/// Publishes committed rating changes. Outbox entries stay until every
/// queue that received a copy acknowledges it, so events held in memory by a
/// run that died are handed out again by the next run's relay.
#[derive(Clone)]
pub struct EventPropagator {
    store: Arc<Store>,
    exchange: FanoutExchange,
    run_id: Uuid,
}

impl EventPropagator {
    pub fn new(store: Arc<Store>, exchange: FanoutExchange) -> Self {
        Self {
            store,
            exchange,
            run_id: Uuid::new_v4(),
        }
    }

    /// Publish an event whose rating write has already committed to every
    /// bound queue.
    pub fn publish_committed(&self, event: &RatingChangeEvent) -> Result<usize, StoreError> {
        self.publish_to(event, &self.exchange.queue_names())
    }

    fn publish_to(&self, event: &RatingChangeEvent, queues: &[String]) -> Result<usize, StoreError> {
        let payload = serde_json::to_vec(event)?;
        // The pending set is recorded first so that no acknowledgement can
        // arrive for a copy the entry does not know about.
        if !self.store.mark_outbox_published(event.event_id, self.run_id, queues)? {
            return Ok(0);
        }
        let delivered = self.exchange.publish_bytes_to(payload, queues);
        tracing::debug!(
            event_id = %event.event_id,
            release_id = event.item_id,
            user_id = event.user_id,
            queues = delivered,
            "Rating event published"
        );
        Ok(delivered)
    }

    /// Hand out outbox entries again: those never published within the grace
    /// period, i.e. events whose request died between commit and publish, and
    /// those published by an earlier run, whose copies died with that run.
    pub fn relay_pending(&self, now: DateTime<Utc>) -> Result<RelayReport, StoreError> {
        let cutoff = now - Duration::seconds(OUTBOX_RELAY_GRACE_SECS);
        let pending = self.store.relayable_outbox(self.run_id, cutoff, OUTBOX_RELAY_BATCH)?;
        let bound = self.exchange.queue_names();
        let mut report = RelayReport::default();

        for entry in pending {
            let queues: Vec<String> = match entry.published_by {
                None => bound.clone(),
                Some(_) => bound
                    .iter()
                    .filter(|name| entry.pending_queues.contains(name))
                    .cloned()
                    .collect(),
            };
            match self.publish_to(&entry.event, &queues) {
                Ok(_) => report.republished += 1,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        event_id = %entry.event.event_id,
                        error = %error,
                        "Outbox relay failed for event"
                    );
                }
            }
        }

        if report.republished > 0 || report.failed > 0 {
            tracing::info!(
                republished = report.republished,
                failed = report.failed,
                "Outbox relay pass complete"
            );
        }
        Ok(report)
    }
}
