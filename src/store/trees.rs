pub const USERS: &str = "users";
pub const ARTISTS: &str = "artists";
pub const RELEASES: &str = "releases";
pub const RATINGS: &str = "ratings";
pub const REVIEWS: &str = "reviews";
pub const CONFIG_VERSIONS: &str = "config_versions";

// Derived / aggregate trees
pub const USER_WEIGHT_STATS: &str = "user_weight_stats";
pub const RATING_SUMMARIES: &str = "rating_summaries";
pub const CHART_SCORES: &str = "chart_scores";
pub const CHART_SCORE_RANKS: &str = "chart_score_ranks";

// Messaging and coordination
pub const OUTBOX: &str = "outbox";
pub const APPLIED_REVISIONS: &str = "applied_revisions";
pub const CLUSTER_LOCKS: &str = "cluster_locks";

// Secondary index trees
pub const RATINGS_BY_RELEASE: &str = "ratings_by_release";

// Dropped by migration 003
pub const LEGACY_APPLIED_EVENTS: &str = "applied_events";
