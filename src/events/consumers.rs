use std::sync::Arc;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::events::{Delivery, Queue, RatingChangeEvent};
use crate::store::operations::summaries::SummaryApply;
use crate::store::{Store, StoreError};

/// Processing applied to every event taken from one queue.
pub trait RatingEventHandler: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn handle(&self, event: &RatingChangeEvent) -> Result<(), StoreError>;
}

/// Folds rating changes into the per-release running summary.
pub struct SummaryConsumer {
    store: Arc<Store>,
    queue_name: String,
}

impl SummaryConsumer {
    pub fn new(store: Arc<Store>, queue_name: &str) -> Self {
        Self {
            store,
            queue_name: queue_name.to_string(),
        }
    }
}

impl RatingEventHandler for SummaryConsumer {
    fn name(&self) -> &'static str {
        "summary"
    }

    fn handle(&self, event: &RatingChangeEvent) -> Result<(), StoreError> {
        let outcome = self
            .store
            .apply_rating_event(&self.queue_name, event, Utc::now())?;
        if outcome == SummaryApply::Duplicate {
            tracing::debug!(event_id = %event.event_id, "Summary already applied, skipping");
        }
        Ok(())
    }
}

/// Records the rater's latest activity.
pub struct ActivityConsumer {
    store: Arc<Store>,
}

impl ActivityConsumer {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }
}

impl RatingEventHandler for ActivityConsumer {
    fn name(&self) -> &'static str {
        "activity"
    }

    fn handle(&self, event: &RatingChangeEvent) -> Result<(), StoreError> {
        if !self.store.touch_last_active(event.user_id, event.occurred_at)? {
            // Retrying cannot make a missing user appear.
            tracing::warn!(user_id = event.user_id, event_id = %event.event_id, "Activity for unknown user dropped");
        }
        Ok(())
    }
}

/// Running consumer task. Stopping it leaves undelivered messages in its queue.
pub struct ConsumerHandle {
    name: &'static str,
    shutdown_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl ConsumerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Signal the task and wait for the in-flight message, if any, to settle.
    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        if let Err(error) = self.join.await {
            tracing::error!(consumer = self.name, error = %error, "Consumer task ended abnormally");
        }
    }
}

/// Drain `queue` with `handler` until stopped. Handling runs on the blocking
/// pool; once it succeeds the queue's outbox confirmation is recorded and the
/// delivery acked.
pub fn spawn_consumer<H: RatingEventHandler>(store: Arc<Store>, queue: Queue, handler: Arc<H>) -> ConsumerHandle {
    let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
    let name = handler.name();

    let join = tokio::spawn(async move {
        tracing::info!(consumer = name, queue = queue.name(), "Consumer started");
        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => break,
                delivery = queue.next() => process(&store, &handler, queue.name(), delivery).await,
            }
        }
        tracing::info!(consumer = name, queue = queue.name(), "Consumer stopped");
    });

    ConsumerHandle {
        name,
        shutdown_tx,
        join,
    }
}

async fn process<H: RatingEventHandler>(store: &Arc<Store>, handler: &Arc<H>, queue: &str, delivery: Delivery) {
    let event: RatingChangeEvent = match serde_json::from_slice(delivery.payload()) {
        Ok(event) => event,
        Err(error) => {
            tracing::error!(
                consumer = handler.name(),
                queue,
                delivery_tag = delivery.delivery_tag(),
                error = %error,
                "Undecodable rating event rejected"
            );
            delivery.nack(false);
            return;
        }
    };

    let outcome = {
        let store = store.clone();
        let handler = handler.clone();
        let queue = queue.to_string();
        let event = event.clone();
        tokio::task::spawn_blocking(move || {
            handler.handle(&event)?;
            if let Err(error) = store.settle_outbox(event.event_id, &queue) {
                // The event is handled; at worst a later run hands it out again.
                tracing::warn!(queue = %queue, event_id = %event.event_id, error = %error, "Outbox confirmation failed");
            }
            Ok::<(), StoreError>(())
        })
        .await
    };

    match outcome {
        Ok(Ok(())) => delivery.ack(),
        Ok(Err(error)) => {
            tracing::warn!(
                consumer = handler.name(),
                queue,
                event_id = %event.event_id,
                release_id = event.item_id,
                attempts = delivery.attempts(),
                error = %error,
                "Rating event processing failed, requeueing"
            );
            delivery.nack(true);
        }
        Err(error) => {
            tracing::error!(
                consumer = handler.name(),
                queue,
                event_id = %event.event_id,
                error = %error,
                "Rating event handler panicked, requeueing"
            );
            delivery.nack(true);
        }
    }
}
