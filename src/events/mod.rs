//! Rating change propagation: an in-process fan-out broker, the publisher
//! that feeds it after commit, and the consumers that drain it.

pub mod broker;
pub mod consumers;
pub mod propagator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::{RATING_EVENT_EXCHANGE, RATING_SUMMARY_QUEUE, USER_ACTIVITY_QUEUE};

pub use broker::{DeadLetter, Delivery, FanoutExchange, Queue};
pub use consumers::{spawn_consumer, ActivityConsumer, ConsumerHandle, RatingEventHandler, SummaryConsumer};
pub use propagator::{EventPropagator, RelayReport};

/// One committed rating write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingChangeEvent {
    pub event_id: Uuid,
    pub user_id: u64,
    pub item_id: u64,
    pub old_score: Option<f64>,
    pub new_score: f64,
    pub is_created: bool,
    /// Revision of the rating row this write produced.
    #[serde(default)]
    pub revision: u64,
    pub occurred_at: DateTime<Utc>,
}

/// The declared rating topology: one fan-out exchange bound to the summary
/// and activity queues.
#[derive(Clone)]
pub struct RatingEventBus {
    pub exchange: FanoutExchange,
    pub summary_queue: Queue,
    pub activity_queue: Queue,
}

impl RatingEventBus {
    pub fn declare(max_redeliveries: u32) -> Self {
        let exchange = FanoutExchange::new(RATING_EVENT_EXCHANGE);
        let summary_queue = Queue::new(RATING_SUMMARY_QUEUE, max_redeliveries);
        let activity_queue = Queue::new(USER_ACTIVITY_QUEUE, max_redeliveries);
        exchange.bind(summary_queue.clone());
        exchange.bind(activity_queue.clone());

        tracing::info!(
            exchange = RATING_EVENT_EXCHANGE,
            queues = ?[RATING_SUMMARY_QUEUE, USER_ACTIVITY_QUEUE],
            max_redeliveries,
            "Rating event topology declared"
        );

        Self {
            exchange,
            summary_queue,
            activity_queue,
        }
    }
}
