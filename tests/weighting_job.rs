mod common;

use std::time::Duration;

use chrono::{TimeZone, Utc};
use uuid::Uuid;

use chart_backend::constants::MAX_WEIGHT;
use chart_backend::lock::ClusterLock;
use chart_backend::store::operations::reviews::{Review, ReviewStatus};
use chart_backend::store::Store;
use chart_backend::workers::weight_recalculation::{self, WeightRecalculationJob};
use common::app::spawn_test_app;
use common::fixtures::{seed_release, seed_user};

/// User `user_id` rates releases 1..=count cycling through `scores`.
fn rate_releases(store: &Store, user_id: u64, count: u64, scores: &[f64]) {
    for release_id in 1..=count {
        let score = scores[(release_id as usize) % scores.len()];
        store
            .upsert_rating(user_id, release_id, score, 0.0, Uuid::new_v4(), Utc::now())
            .unwrap();
    }
}

fn seed_population(store: &Store) {
    for release_id in 1..=40 {
        seed_release(store, release_id, None, None, 2000);
    }
    // Prolific and varied, with a long review.
    seed_user(store, 1, 0.0);
    rate_releases(store, 1, 40, &[1.0, 3.0, 5.0]);
    store
        .create_review(&Review {
            id: 1,
            user_id: 1,
            release_id: 1,
            content: "word ".repeat(150),
            status: ReviewStatus::Active,
            created_at: Utc::now(),
        })
        .unwrap();
    // Enough ratings, but every one the same.
    seed_user(store, 2, 0.0);
    rate_releases(store, 2, 12, &[4.0]);
    // Below the minimum.
    seed_user(store, 3, 0.9);
    rate_releases(store, 3, 9, &[2.0, 4.0]);
    // No activity at all.
    seed_user(store, 4, 0.7);
}

#[tokio::test]
async fn weights_follow_rater_history() {
    let app = spawn_test_app().await;
    seed_population(&app.store);

    let report = WeightRecalculationJob::new(app.store.clone()).run_once(Utc::now());
    assert_eq!(report.users, 4);
    assert_eq!(report.failed_chunks, 0);

    let weight = |id| app.store.get_user(id).unwrap().unwrap().weighting_score;
    assert!(weight(1) > weight(2), "diverse reviewer outranks flat rater");
    assert!(weight(1) <= MAX_WEIGHT);
    assert!(weight(2) > 0.0);
    assert_eq!(weight(3), 0.0);
    assert_eq!(weight(4), 0.0);

    let cached = app.store.get_weight_stats(1).unwrap().unwrap();
    assert_eq!(cached.rating_count, 40);
    assert_eq!(cached.review_count, 1);
    assert_eq!(cached.weight, weight(1));
}

#[tokio::test]
async fn rerun_with_same_date_is_bit_identical() {
    let app = spawn_test_app().await;
    seed_population(&app.store);
    let calc_date = Utc.with_ymd_and_hms(2030, 1, 1, 2, 0, 0).unwrap();

    let job = WeightRecalculationJob::new(app.store.clone()).with_chunk_size(3);
    job.run_once(calc_date);
    let first: Vec<u64> = (1..=4)
        .map(|id| app.store.get_user(id).unwrap().unwrap().weighting_score.to_bits())
        .collect();

    let report = job.run_once(calc_date);
    assert_eq!(report.chunks, 2);
    let second: Vec<u64> = (1..=4)
        .map(|id| app.store.get_user(id).unwrap().unwrap().weighting_score.to_bits())
        .collect();
    assert_eq!(first, second);
}

#[tokio::test]
async fn scheduled_run_feeds_chart_scores() {
    let app = spawn_test_app().await;
    seed_population(&app.store);
    let lock = ClusterLock::sled(app.store.clone(), "node-a");

    weight_recalculation::run(app.store.clone(), &lock, Duration::from_secs(300)).await;
    app.charts.recompute_all().unwrap();

    // Release 1 was rated by users 1, 2 and 3; only 1 and 2 carry weight.
    let score = app.store.get_chart_score(1).unwrap().unwrap();
    assert_eq!(score.total_ratings, 3);
    let w1 = app.store.get_user(1).unwrap().unwrap().weighting_score;
    let w2 = app.store.get_user(2).unwrap().unwrap().weighting_score;
    assert!((score.effective_votes - (w1 + w2)).abs() < 1e-9);
    assert!(score.is_esoteric);
}
