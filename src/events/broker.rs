use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

#[derive(Debug, Clone)]
struct Message {
    tag: u64,
    payload: Arc<[u8]>,
    /// Deliveries so far, including the one in flight.
    attempts: u32,
}

/// A message that exhausted its redeliveries or was rejected without requeue.
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub payload: Arc<[u8]>,
    pub attempts: u32,
    pub reason: String,
    pub dead_at: DateTime<Utc>,
}

#[derive(Debug)]
struct QueueInner {
    name: String,
    max_redeliveries: u32,
    ready: Mutex<VecDeque<Message>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    notify: Notify,
    next_tag: AtomicU64,
    unacked: AtomicU64,
    acked: AtomicU64,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding the lock cannot leave the queue half-updated.
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl QueueInner {
    fn enqueue(&self, message: Message) {
        lock(&self.ready).push_back(message);
        self.notify.notify_one();
    }

    fn dead_letter(&self, message: Message, reason: &str) {
        tracing::warn!(
            queue = %self.name,
            delivery_tag = message.tag,
            attempts = message.attempts,
            reason,
            "Message moved to dead letters"
        );
        lock(&self.dead_letters).push(DeadLetter {
            payload: message.payload,
            attempts: message.attempts,
            reason: reason.to_string(),
            dead_at: Utc::now(),
        });
    }

    fn settle(&self, message: Message, outcome: Settlement) {
        self.unacked.fetch_sub(1, Ordering::SeqCst);
        match outcome {
            Settlement::Ack => {
                self.acked.fetch_add(1, Ordering::SeqCst);
            }
            Settlement::Requeue => {
                if message.attempts > self.max_redeliveries {
                    self.dead_letter(message, "redelivery limit reached");
                } else {
                    self.enqueue(message);
                }
            }
            Settlement::Reject => self.dead_letter(message, "rejected"),
        }
    }
}

enum Settlement {
    Ack,
    Requeue,
    Reject,
}

/// A named in-memory queue. Messages wait here until a consumer acknowledges
/// them, whether or not any consumer is running. Contents do not survive a
/// restart; the outbox keeps each event until every queue confirms it.
#[derive(Debug, Clone)]
pub struct Queue {
    inner: Arc<QueueInner>,
}

impl Queue {
    pub fn new(name: &str, max_redeliveries: u32) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                name: name.to_string(),
                max_redeliveries,
                ready: Mutex::new(VecDeque::new()),
                dead_letters: Mutex::new(Vec::new()),
                notify: Notify::new(),
                next_tag: AtomicU64::new(1),
                unacked: AtomicU64::new(0),
                acked: AtomicU64::new(0),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn push(&self, payload: Arc<[u8]>) {
        let tag = self.inner.next_tag.fetch_add(1, Ordering::SeqCst);
        self.inner.enqueue(Message {
            tag,
            payload,
            attempts: 0,
        });
    }

    /// Take the next ready message without waiting.
    pub fn try_next(&self) -> Option<Delivery> {
        let mut message = lock(&self.inner.ready).pop_front()?;
        message.attempts += 1;
        self.inner.unacked.fetch_add(1, Ordering::SeqCst);
        Some(Delivery {
            queue: self.inner.clone(),
            message: Some(message),
        })
    }

    /// Wait for the next message. Cancel-safe: a message is only taken from
    /// the queue in the same poll that returns it.
    pub async fn next(&self) -> Delivery {
        loop {
            if let Some(delivery) = self.try_next() {
                return delivery;
            }
            self.inner.notify.notified().await;
        }
    }

    pub fn ready_len(&self) -> usize {
        lock(&self.inner.ready).len()
    }

    pub fn unacked_len(&self) -> u64 {
        self.inner.unacked.load(Ordering::SeqCst)
    }

    pub fn acked_count(&self) -> u64 {
        self.inner.acked.load(Ordering::SeqCst)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        lock(&self.inner.dead_letters).clone()
    }

    /// No message is waiting or in flight.
    pub fn is_drained(&self) -> bool {
        self.ready_len() == 0 && self.unacked_len() == 0
    }
}

/// An in-flight message. Must be settled with [`Delivery::ack`] or
/// [`Delivery::nack`]; dropping it unsettled puts the message back.
#[derive(Debug)]
pub struct Delivery {
    queue: Arc<QueueInner>,
    message: Option<Message>,
}

impl Delivery {
    pub fn payload(&self) -> &[u8] {
        match &self.message {
            Some(message) => &message.payload,
            None => &[],
        }
    }

    pub fn delivery_tag(&self) -> u64 {
        self.message.as_ref().map_or(0, |message| message.tag)
    }

    /// 1 on first delivery, incremented on every redelivery.
    pub fn attempts(&self) -> u32 {
        self.message.as_ref().map_or(0, |message| message.attempts)
    }

    pub fn ack(mut self) {
        if let Some(message) = self.message.take() {
            self.queue.settle(message, Settlement::Ack);
        }
    }

    /// Negative acknowledgement. With `requeue` the message goes back to the
    /// tail of the queue until the redelivery limit parks it as a dead letter.
    pub fn nack(mut self, requeue: bool) {
        if let Some(message) = self.message.take() {
            let outcome = if requeue {
                Settlement::Requeue
            } else {
                Settlement::Reject
            };
            self.queue.settle(message, outcome);
        }
    }
}

impl Drop for Delivery {
    fn drop(&mut self) {
        if let Some(message) = self.message.take() {
            self.queue.settle(message, Settlement::Requeue);
        }
    }
}

/// Copies every published message onto each bound queue.
#[derive(Debug, Clone)]
pub struct FanoutExchange {
    name: Arc<str>,
    queues: Arc<RwLock<Vec<Queue>>>,
}

impl FanoutExchange {
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            queues: Arc::new(RwLock::new(Vec::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bind(&self, queue: Queue) {
        let mut queues = self.queues.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        if queues.iter().any(|bound| bound.name() == queue.name()) {
            return;
        }
        queues.push(queue);
    }

    pub fn queue_names(&self) -> Vec<String> {
        let queues = self.queues.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        queues.iter().map(|queue| queue.name().to_string()).collect()
    }

    /// Returns the number of queues that received a copy.
    pub fn publish_bytes(&self, payload: Vec<u8>) -> usize {
        self.publish_where(payload, |_| true)
    }

    /// Copy onto the named bound queues only. Unknown names are ignored.
    pub fn publish_bytes_to(&self, payload: Vec<u8>, names: &[String]) -> usize {
        self.publish_where(payload, |queue| names.iter().any(|name| name == queue.name()))
    }

    fn publish_where(&self, payload: Vec<u8>, wanted: impl Fn(&Queue) -> bool) -> usize {
        let payload: Arc<[u8]> = Arc::from(payload);
        let queues = self.queues.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut delivered = 0;
        for queue in queues.iter().filter(|queue| wanted(queue)) {
            queue.push(payload.clone());
            delivered += 1;
        }
        if delivered == 0 {
            tracing::warn!(exchange = %self.name, "Published message reached no queue");
        }
        delivered
    }

    pub fn publish_json<T: serde::Serialize>(&self, value: &T) -> Result<usize, serde_json::Error> {
        Ok(self.publish_bytes(serde_json::to_vec(value)?))
    }
}
