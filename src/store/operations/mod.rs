pub mod catalog;
pub mod chart_scores;
pub mod locks;
pub mod outbox;
pub mod ratings;
pub mod reviews;
pub mod summaries;
pub mod users;
pub mod weight_stats;
