use crate::constants::{BAYESIAN_PRIOR_MEAN, BAYESIAN_PRIOR_VOTES, ESOTERIC_VOTE_THRESHOLD};

/// Weighted vote totals for one release. Raters with zero weight are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VoteTally {
    pub total_ratings: u64,
    pub effective_votes: f64,
    pub weighted_sum: f64,
}

impl VoteTally {
    pub fn from_votes(votes: impl IntoIterator<Item = (f64, f64)>) -> Self {
        let mut tally = Self::default();
        for (score, weight) in votes {
            tally.total_ratings += 1;
            if weight > 0.0 {
                tally.effective_votes += weight;
                tally.weighted_sum += score * weight;
            }
        }
        tally
    }

    /// Weighted mean score, or `0.0` when no rater carries weight.
    pub fn weighted_avg(&self) -> f64 {
        if self.effective_votes > 0.0 {
            self.weighted_sum / self.effective_votes
        } else {
            0.0
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Shrink the weighted average toward the global prior, rounded to two places.
pub fn bayesian_score(tally: &VoteTally) -> f64 {
    if tally.effective_votes <= 0.0 {
        return BAYESIAN_PRIOR_MEAN;
    }
    round2(
        (tally.effective_votes * tally.weighted_avg() + BAYESIAN_PRIOR_VOTES * BAYESIAN_PRIOR_MEAN)
            / (tally.effective_votes + BAYESIAN_PRIOR_VOTES),
    )
}

pub fn is_esoteric(effective_votes: f64) -> bool {
    effective_votes < ESOTERIC_VOTE_THRESHOLD
}
