use std::time::Duration;

use crate::lock::{ClusterLock, LockOutcome};
use crate::services::ChartScoringService;
use crate::workers::WorkerName;

pub async fn run(chart_service: ChartScoringService, lock: &ClusterLock, lease: Duration) {
    let job_name = WorkerName::ChartUpdate.as_str();
    tracing::debug!(job = job_name, "chart_update: start");

    let outcome = lock
        .try_run(job_name, lease, || async move {
            tokio::task::spawn_blocking(move || chart_service.recompute_all()).await
        })
        .await;

    match outcome {
        Ok(LockOutcome::Ran(Ok(Ok(report)))) => tracing::info!(
            job = job_name,
            processed = report.processed,
            failed = report.failed,
            pruned = report.pruned,
            "chart_update: done"
        ),
        Ok(LockOutcome::Ran(Ok(Err(error)))) => {
            tracing::error!(job = job_name, error = %error, "chart_update failed")
        }
        Ok(LockOutcome::Ran(Err(error))) => {
            tracing::error!(job = job_name, error = %error, "chart_update task panicked")
        }
        Ok(LockOutcome::Skipped) => {}
        Err(error) => tracing::error!(job = job_name, error = %error, "chart_update lock failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, Utc};
    use tempfile::tempdir;
    use uuid::Uuid;

    use super::*;
    use crate::constants::RATING_SUMMARY_QUEUE;
    use crate::events::RatingChangeEvent;
    use crate::store::operations::catalog::{Release, ReleaseStatus, ReleaseType};
    use crate::store::Store;

    #[tokio::test]
    async fn refresh_scores_active_releases_and_reconciles_summaries() {
        let dir = tempdir().unwrap();
        let store = Arc::new(Store::open(dir.path().join("db").to_str().unwrap()).unwrap());
        store
            .create_release(&Release {
                id: 1,
                artist_id: None,
                genre_id: None,
                title: "Loveless".to_string(),
                release_type: ReleaseType::Album,
                release_date: NaiveDate::from_ymd_opt(1991, 11, 4),
                status: ReleaseStatus::Active,
                created_at: Utc::now(),
            })
            .unwrap();
        let old_event = RatingChangeEvent {
            event_id: Uuid::new_v4(),
            user_id: 1,
            item_id: 1,
            old_score: None,
            new_score: 5.0,
            is_created: true,
            revision: 1,
            occurred_at: Utc::now(),
        };
        // A summary drifted by an event whose rating row never committed.
        store
            .apply_rating_event(RATING_SUMMARY_QUEUE, &old_event, Utc::now())
            .unwrap();

        let lock = ClusterLock::sled(store.clone(), "test");
        run(ChartScoringService::new(store.clone()), &lock, Duration::from_secs(300)).await;

        let score = store.get_chart_score(1).unwrap().unwrap();
        assert_eq!(score.bayesian_score, 3.2);
        assert!(score.is_esoteric);
        assert_eq!(store.get_summary(1).unwrap().unwrap().total_rating_count, 0);
    }
}
