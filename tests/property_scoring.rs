use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use chart_backend::constants::{BAYESIAN_PRIOR_MEAN, MAX_WEIGHT};
use chart_backend::scoring::{bayesian_score, calculate_weight, VoteTally, WeightInputs};
use chart_backend::validation::validate_score;

proptest! {
    #[test]
    fn pt_weight_stays_in_range(
        rating_count in 0_u64..5_000,
        rating_variance in 0.0_f64..20.0,
        review_count in 0_u64..1_000,
        review_avg_length in 0.0_f64..5_000.0,
        idle_days in -30_i64..5_000,
    ) {
        let calculation_date = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
        let weight = calculate_weight(&WeightInputs {
            rating_count,
            rating_variance,
            review_count,
            review_avg_length,
            last_active_date: calculation_date - Duration::days(idle_days),
            calculation_date,
        });
        prop_assert!((0.0..=MAX_WEIGHT).contains(&weight));
    }

    #[test]
    fn pt_more_idle_days_never_raise_weight(
        rating_count in 10_u64..500,
        idle_days in 0_i64..2_000,
        extra in 1_i64..500,
    ) {
        let calculation_date = Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap();
        let inputs = |idle: i64| WeightInputs {
            rating_count,
            rating_variance: 1.0,
            review_count: 0,
            review_avg_length: 0.0,
            last_active_date: calculation_date - Duration::days(idle),
            calculation_date,
        };
        prop_assert!(calculate_weight(&inputs(idle_days + extra)) <= calculate_weight(&inputs(idle_days)));
    }

    #[test]
    fn pt_only_half_steps_are_valid_scores(halves in 1_u32..=10) {
        let on_grid = halves as f64 * 0.5;
        prop_assert!(validate_score(on_grid).is_ok());
        prop_assert!(validate_score(on_grid - 0.25).is_err());
    }

    #[test]
    fn pt_bayesian_lies_between_prior_and_average(
        votes in prop::collection::vec((1_u32..=10, 0.0_f64..=1.25), 1..200),
    ) {
        let tally = VoteTally::from_votes(votes.iter().map(|(halves, weight)| (*halves as f64 * 0.5, *weight)));
        let score = bayesian_score(&tally);
        if tally.effective_votes > 0.0 {
            let avg = tally.weighted_avg();
            let low = avg.min(BAYESIAN_PRIOR_MEAN) - 0.005;
            let high = avg.max(BAYESIAN_PRIOR_MEAN) + 0.005;
            prop_assert!(score >= low && score <= high, "{score} outside [{low}, {high}]");
        } else {
            prop_assert_eq!(score, BAYESIAN_PRIOR_MEAN);
        }
    }
}
