use chrono::{DateTime, Utc};

use crate::constants::{
    ACTIVITY_COMPONENT_WEIGHT, ACTIVITY_DECAY_PER_DAY, COUNT_COMPONENT_WEIGHT,
    DIVERSITY_COMPONENT_WEIGHT, MAX_REVIEW_BONUS, MAX_WEIGHT, MIN_RATINGS_FOR_WEIGHT,
    RATING_COUNT_SATURATION, RATING_STDDEV_SATURATION, REVIEW_COUNT_BONUS,
    REVIEW_COUNT_SATURATION, REVIEW_LENGTH_BONUS, REVIEW_LENGTH_SATURATION,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightInputs {
    pub rating_count: u64,
    /// Population variance of the user's scores.
    pub rating_variance: f64,
    pub review_count: u64,
    /// Mean review length in words.
    pub review_avg_length: f64,
    pub last_active_date: DateTime<Utc>,
    pub calculation_date: DateTime<Utc>,
}

/// Whole days between last activity and the calculation date, never negative.
pub fn days_inactive(last_active_date: DateTime<Utc>, calculation_date: DateTime<Utc>) -> i64 {
    (calculation_date - last_active_date).num_days().max(0)
}

/// Credibility weight of one rater, in `[0, MAX_WEIGHT]`.
///
/// Volume, score spread and recency make up the base weight (at most 1.0);
/// written reviews add a bounded multiplicative bonus on top.
pub fn calculate_weight(inputs: &WeightInputs) -> f64 {
    if inputs.rating_count < MIN_RATINGS_FOR_WEIGHT {
        return 0.0;
    }

    let count_component =
        COUNT_COMPONENT_WEIGHT * (inputs.rating_count as f64 / RATING_COUNT_SATURATION).min(1.0);
    let std_dev = inputs.rating_variance.max(0.0).sqrt();
    let diversity_component =
        DIVERSITY_COMPONENT_WEIGHT * (std_dev / RATING_STDDEV_SATURATION).min(1.0);
    let idle_days = days_inactive(inputs.last_active_date, inputs.calculation_date) as f64;
    let activity_component = ACTIVITY_COMPONENT_WEIGHT * (-ACTIVITY_DECAY_PER_DAY * idle_days).exp();

    let base_weight = count_component + diversity_component + activity_component;

    let review_bonus = if inputs.review_count > 0 {
        let count_bonus =
            REVIEW_COUNT_BONUS * (inputs.review_count as f64 / REVIEW_COUNT_SATURATION).min(1.0);
        let quality_bonus =
            REVIEW_LENGTH_BONUS * (inputs.review_avg_length / REVIEW_LENGTH_SATURATION).min(1.0);
        (count_bonus + quality_bonus).min(MAX_REVIEW_BONUS)
    } else {
        0.0
    };

    let weight = base_weight * (1.0 + review_bonus);
    if weight.is_nan() {
        return 0.0;
    }
    weight.clamp(0.0, MAX_WEIGHT)
}
