//! Input checks shared by services and routes.

use crate::constants::{MAX_CHART_LIMIT, MAX_SCORE, MIN_CHART_LIMIT, MIN_SCORE, SCORE_STEP};

/// A score must lie in `[0.5, 5.0]` on a 0.5 grid.
pub fn validate_score(score: f64) -> Result<(), String> {
    if !score.is_finite() || !(MIN_SCORE..=MAX_SCORE).contains(&score) {
        return Err(format!(
            "score must be between {} and {}, got {}",
            MIN_SCORE, MAX_SCORE, score
        ));
    }
    let steps = score / SCORE_STEP;
    if steps.fract() != 0.0 {
        return Err(format!("score must be a multiple of {}, got {}", SCORE_STEP, score));
    }
    Ok(())
}

pub fn validate_chart_limit(limit: usize) -> Result<(), String> {
    if !(MIN_CHART_LIMIT..=MAX_CHART_LIMIT).contains(&limit) {
        return Err(format!(
            "limit must be between {} and {}, got {}",
            MIN_CHART_LIMIT, MAX_CHART_LIMIT, limit
        ));
    }
    Ok(())
}
