//! Pure scoring math. Nothing here touches the store.

pub mod bayesian;
pub mod weight;

pub use bayesian::{bayesian_score, is_esoteric, round2, VoteTally};
pub use weight::{calculate_weight, days_inactive, WeightInputs};
