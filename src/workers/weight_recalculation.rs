use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::constants::WEIGHTING_CHUNK_SIZE;
use crate::lock::{ClusterLock, LockOutcome};
use crate::scoring::{calculate_weight, WeightInputs};
use crate::store::operations::users::User;
use crate::store::operations::weight_stats::UserWeightStats;
use crate::store::{Store, StoreError};
use crate::workers::WorkerName;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WeightRunReport {
    pub chunks: usize,
    pub users: usize,
    pub failed_chunks: usize,
}

/// Recomputes every user's weight from scratch, one chunk of users at a time.
///
/// Weights are absolute values derived from current data, so repeated runs
/// over unchanged data produce identical results. A failed chunk is logged
/// and skipped; earlier chunks keep their writes.
pub struct WeightRecalculationJob {
    store: Arc<Store>,
    chunk_size: usize,
}

impl WeightRecalculationJob {
    pub fn new(store: Arc<Store>) -> Self {
        Self {
            store,
            chunk_size: WEIGHTING_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn run_once(&self, calculation_date: DateTime<Utc>) -> WeightRunReport {
        let mut report = WeightRunReport::default();
        let mut cursor: Option<u64> = None;

        loop {
            let users = match self.store.list_users_after(cursor, self.chunk_size) {
                Ok(users) => users,
                Err(error) => {
                    // Without the page the cursor cannot advance past it.
                    report.failed_chunks += 1;
                    tracing::error!(chunk = report.chunks + 1, error = %error, "Failed to load user chunk, stopping run");
                    break;
                }
            };
            let Some(last) = users.last() else {
                break;
            };
            cursor = Some(last.id);
            report.chunks += 1;

            match self.process_chunk(&users, calculation_date) {
                Ok(count) => {
                    report.users += count;
                    tracing::debug!(chunk = report.chunks, users = count, "Weight chunk complete");
                }
                Err(error) => {
                    report.failed_chunks += 1;
                    tracing::error!(
                        chunk = report.chunks,
                        first_user = users.first().map(|user| user.id),
                        last_user = cursor,
                        error = %error,
                        "Weight chunk failed, continuing with next chunk"
                    );
                }
            }

            if users.len() < self.chunk_size {
                break;
            }
        }

        report
    }

    fn process_chunk(&self, users: &[User], calculation_date: DateTime<Utc>) -> Result<usize, StoreError> {
        let ids: Vec<u64> = users.iter().map(|user| user.id).collect();
        let stats = self.store.fetch_weighting_stats(&ids)?;

        let mut weights = Vec::with_capacity(users.len());
        let mut rows = Vec::with_capacity(users.len());
        for user in users {
            let user_stats = stats.get(&user.id).cloned().unwrap_or_default();
            let last_active_date = user_stats.last_active(user.last_active_date);
            let weight = calculate_weight(&WeightInputs {
                rating_count: user_stats.rating_count,
                rating_variance: user_stats.rating_variance,
                review_count: user_stats.review_count,
                review_avg_length: user_stats.review_avg_length,
                last_active_date,
                calculation_date,
            });

            weights.push((user.id, weight));
            rows.push(UserWeightStats {
                user_id: user.id,
                rating_count: user_stats.rating_count,
                rating_variance: user_stats.rating_variance,
                review_count: user_stats.review_count,
                review_avg_length: user_stats.review_avg_length,
                last_active_date,
                weight,
                last_calculated_at: calculation_date,
            });
        }

        self.store.apply_user_weights(&weights)?;
        self.store.upsert_weight_stats(&rows)?;
        Ok(users.len())
    }
}

pub async fn run(store: Arc<Store>, lock: &ClusterLock, lease: Duration) {
    let job_name = WorkerName::WeightRecalculation.as_str();
    tracing::debug!(job = job_name, "weight_recalculation: start");

    let job = WeightRecalculationJob::new(store);
    let outcome = lock
        .try_run(job_name, lease, || async move {
            tokio::task::spawn_blocking(move || job.run_once(Utc::now())).await
        })
        .await;

    match outcome {
        Ok(LockOutcome::Ran(Ok(report))) => tracing::info!(
            job = job_name,
            chunks = report.chunks,
            users = report.users,
            failed_chunks = report.failed_chunks,
            "weight_recalculation: done"
        ),
        Ok(LockOutcome::Ran(Err(error))) => {
            tracing::error!(job = job_name, error = %error, "weight_recalculation task panicked")
        }
        Ok(LockOutcome::Skipped) => {}
        Err(error) => tracing::error!(job = job_name, error = %error, "weight_recalculation lock failed"),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration as ChronoDuration;
    use tempfile::tempdir;
    use uuid::Uuid;

    use super::*;

    fn seeded_store(dir: &tempfile::TempDir, users: u64) -> Arc<Store> {
        let store = Arc::new(Store::open(dir.path().join("db").to_str().unwrap()).unwrap());
        let joined = Utc::now() - ChronoDuration::days(400);
        for user_id in 1..=users {
            store.create_user(&User::new(user_id, "u", joined)).unwrap();
            let ratings = if user_id % 2 == 0 { 12 } else { 3 };
            for release_id in 0..ratings {
                let score = 0.5 + (release_id % 10) as f64 * 0.5;
                store
                    .upsert_rating(user_id, release_id, score, 0.0, Uuid::new_v4(), joined)
                    .unwrap();
            }
        }
        store
    }

    #[test]
    fn every_user_is_visited_across_chunks() {
        let dir = tempdir().unwrap();
        let store = seeded_store(&dir, 25);
        let job = WeightRecalculationJob::new(store.clone()).with_chunk_size(10);

        let report = job.run_once(Utc::now());
        assert_eq!(report, WeightRunReport { chunks: 3, users: 25, failed_chunks: 0 });
        assert_eq!(store.user_weight_stats.len(), 25);

        assert_eq!(store.get_user(1).unwrap().unwrap().weighting_score, 0.0);
        assert!(store.get_user(2).unwrap().unwrap().weighting_score > 0.0);
    }

    #[test]
    fn exact_multiple_of_chunk_size_ends_with_empty_page() {
        let dir = tempdir().unwrap();
        let store = seeded_store(&dir, 20);
        let report = WeightRecalculationJob::new(store).with_chunk_size(10).run_once(Utc::now());
        assert_eq!(report.chunks, 2);
        assert_eq!(report.users, 20);
    }

    #[test]
    fn repeated_runs_are_bit_identical() {
        let dir = tempdir().unwrap();
        let store = seeded_store(&dir, 12);
        let job = WeightRecalculationJob::new(store.clone()).with_chunk_size(5);
        let calculation_date = Utc::now();

        job.run_once(calculation_date);
        let first: Vec<u64> = (1..=12)
            .map(|id| store.get_user(id).unwrap().unwrap().weighting_score.to_bits())
            .collect();
        job.run_once(calculation_date);
        let second: Vec<u64> = (1..=12)
            .map(|id| store.get_user(id).unwrap().unwrap().weighting_score.to_bits())
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn corrupt_rating_fails_only_its_chunk() {
        let dir = tempdir().unwrap();
        let store = seeded_store(&dir, 4);
        store
            .ratings
            .insert(crate::store::keys::rating_key(2, 0), &b"not json"[..])
            .unwrap();

        let report = WeightRecalculationJob::new(store.clone())
            .with_chunk_size(2)
            .run_once(Utc::now());

        assert_eq!(report.chunks, 2);
        assert_eq!(report.failed_chunks, 1);
        assert_eq!(report.users, 2);
        assert!(store.get_weight_stats(2).unwrap().is_none());
        assert!(store.get_user(4).unwrap().unwrap().weighting_score > 0.0);
    }

    #[tokio::test]
    async fn scheduled_run_skips_when_lock_is_held() {
        let dir = tempdir().unwrap();
        let store = seeded_store(&dir, 2);
        let holder = ClusterLock::sled(store.clone(), "holder");
        let other = ClusterLock::sled(store.clone(), "other");
        let lease = Duration::from_secs(300);

        holder
            .try_run("weight_recalculation", lease, || async {
                run(store.clone(), &other, lease).await;
            })
            .await
            .unwrap();
        assert_eq!(store.user_weight_stats.len(), 0);

        run(store.clone(), &other, lease).await;
        assert_eq!(store.user_weight_stats.len(), 2);
    }
}
