// Rater weighting

/// Raters with fewer ratings than this carry no weight.
pub const MIN_RATINGS_FOR_WEIGHT: u64 = 10;

/// Rating count at which the volume component saturates.
pub const RATING_COUNT_SATURATION: f64 = 200.0;

/// Rating standard deviation at which the diversity component saturates.
pub const RATING_STDDEV_SATURATION: f64 = 1.5;

pub const COUNT_COMPONENT_WEIGHT: f64 = 0.4;
pub const DIVERSITY_COMPONENT_WEIGHT: f64 = 0.4;
pub const ACTIVITY_COMPONENT_WEIGHT: f64 = 0.2;

/// Per-day decay of the activity component (half-life of roughly two years).
pub const ACTIVITY_DECAY_PER_DAY: f64 = 0.00095;

pub const REVIEW_COUNT_SATURATION: f64 = 20.0;
pub const REVIEW_LENGTH_SATURATION: f64 = 100.0;
pub const REVIEW_COUNT_BONUS: f64 = 0.15;
pub const REVIEW_LENGTH_BONUS: f64 = 0.10;
pub const MAX_REVIEW_BONUS: f64 = 0.25;

pub const MAX_WEIGHT: f64 = 1.25;

/// Users processed per weighting chunk.
pub const WEIGHTING_CHUNK_SIZE: usize = 100;

// Chart scoring

/// Prior strength `M` of the Bayesian average.
pub const BAYESIAN_PRIOR_VOTES: f64 = 50.0;

/// Prior mean `C` of the Bayesian average.
pub const BAYESIAN_PRIOR_MEAN: f64 = 3.2;

/// Releases below this many effective votes are flagged esoteric.
pub const ESOTERIC_VOTE_THRESHOLD: f64 = 50.0;

pub const CHART_PROGRESS_LOG_EVERY: usize = 1000;

pub const MIN_CHART_LIMIT: usize = 10;
pub const MAX_CHART_LIMIT: usize = 1000;
pub const DEFAULT_CHART_LIMIT: usize = 100;

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";

// Ratings

pub const MIN_SCORE: f64 = 0.5;
pub const MAX_SCORE: f64 = 5.0;
pub const SCORE_STEP: f64 = 0.5;

// Messaging

pub const RATING_EVENT_EXCHANGE: &str = "rating.event.exchange";
pub const RATING_SUMMARY_QUEUE: &str = "rating.summary.queue";
pub const USER_ACTIVITY_QUEUE: &str = "user.activity.queue";

/// Deliveries of one message before it is parked as a dead letter.
pub const DEFAULT_MAX_REDELIVERIES: u32 = 10;

/// Outbox entries younger than this are left to the publishing request.
pub const OUTBOX_RELAY_GRACE_SECS: i64 = 30;

pub const OUTBOX_RELAY_BATCH: usize = 500;

/// Attempts at swapping in an exact summary while consumers keep moving it.
pub const SUMMARY_RECONCILE_ATTEMPTS: u32 = 3;

// Scheduling

pub const DEFAULT_LOCK_LEASE_SECS: u64 = 300;
pub const LOCK_KEY_PREFIX: &str = "LOCK:";
