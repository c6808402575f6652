use std::time::Duration;

use chrono::Utc;

use crate::events::EventPropagator;
use crate::lock::{ClusterLock, LockOutcome};
use crate::workers::WorkerName;

pub async fn run(propagator: EventPropagator, lock: &ClusterLock, lease: Duration) {
    let job_name = WorkerName::OutboxRelay.as_str();

    let outcome = lock
        .try_run(job_name, lease, || async move {
            tokio::task::spawn_blocking(move || propagator.relay_pending(Utc::now())).await
        })
        .await;

    match outcome {
        Ok(LockOutcome::Ran(Ok(Ok(report)))) => {
            if report.republished > 0 || report.failed > 0 {
                tracing::info!(
                    job = job_name,
                    republished = report.republished,
                    failed = report.failed,
                    "outbox_relay: done"
                );
            }
        }
        Ok(LockOutcome::Ran(Ok(Err(error)))) => {
            tracing::error!(job = job_name, error = %error, "outbox_relay failed")
        }
        Ok(LockOutcome::Ran(Err(error))) => {
            tracing::error!(job = job_name, error = %error, "outbox_relay task panicked")
        }
        Ok(LockOutcome::Skipped) => {}
        Err(error) => tracing::error!(job = job_name, error = %error, "outbox_relay lock failed"),
    }
}
