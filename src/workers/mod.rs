pub mod chart_update;
pub mod outbox_relay;
pub mod weight_recalculation;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::config::WorkerConfig;
use crate::events::EventPropagator;
use crate::lock::ClusterLock;
use crate::services::ChartScoringService;
use crate::store::Store;

/// Drain period before scheduler shutdown to let in-flight tasks complete.
#[cfg(test)]
const DRAIN_TIMEOUT: Duration = Duration::from_millis(10);
#[cfg(not(test))]
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Scheduled jobs. The name doubles as the cluster lock name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerName {
    WeightRecalculation,
    ChartUpdate,
    OutboxRelay,
}

impl WorkerName {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WeightRecalculation => "weight_recalculation",
            Self::ChartUpdate => "chart_update",
            Self::OutboxRelay => "outbox_relay",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub name: WorkerName,
    pub cron: String,
}

pub struct WorkerManager {
    store: Arc<Store>,
    chart_service: ChartScoringService,
    propagator: EventPropagator,
    lock: ClusterLock,
    shutdown_rx: broadcast::Receiver<()>,
    config: WorkerConfig,
}

impl WorkerManager {
    pub fn new(
        store: Arc<Store>,
        chart_service: ChartScoringService,
        propagator: EventPropagator,
        lock: ClusterLock,
        shutdown_rx: broadcast::Receiver<()>,
        config: &WorkerConfig,
    ) -> Self {
        Self {
            store,
            chart_service,
            propagator,
            lock,
            shutdown_rx,
            config: config.clone(),
        }
    }

    /// Single source of truth for all planned jobs and their cron schedules.
    pub fn planned_jobs(&self) -> Vec<JobSpec> {
        if !self.config.is_leader {
            return Vec::new();
        }

        vec![
            JobSpec {
                name: WorkerName::WeightRecalculation,
                cron: self.config.weighting_cron.clone(),
            },
            JobSpec {
                name: WorkerName::ChartUpdate,
                cron: self.config.chart_cron.clone(),
            },
            JobSpec {
                name: WorkerName::OutboxRelay,
                cron: self.config.outbox_relay_cron.clone(),
            },
        ]
    }

    /// Start the worker scheduler. Returns an error if the scheduler cannot be created or started.
    pub async fn start(mut self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if !self.config.is_leader {
            tracing::info!("Worker leader disabled; skipping worker startup");
            return Ok(());
        }

        let mut scheduler = JobScheduler::new().await?;

        self.register_jobs(&scheduler).await;

        scheduler.start().await?;

        tracing::info!(instance_id = %self.config.instance_id, "Worker manager started");
        let _ = self.shutdown_rx.recv().await;

        tracing::info!(
            "Worker manager shutting down, draining for {}s",
            DRAIN_TIMEOUT.as_secs()
        );
        tokio::time::sleep(DRAIN_TIMEOUT).await;
        let _ = scheduler.shutdown().await;
        Ok(())
    }

    async fn register_jobs(&self, scheduler: &JobScheduler) {
        let lease = self.config.lock_lease();

        for spec in self.planned_jobs() {
            let store = self.store.clone();
            let lock = self.lock.clone();
            let name_str = spec.name.as_str();

            match spec.name {
                WorkerName::WeightRecalculation => {
                    add_job(scheduler, &spec.cron, name_str, move || {
                        let store = store.clone();
                        let lock = lock.clone();
                        async move {
                            weight_recalculation::run(store, &lock, lease).await;
                        }
                    })
                    .await;
                }
                WorkerName::ChartUpdate => {
                    let chart_service = self.chart_service.clone();
                    add_job(scheduler, &spec.cron, name_str, move || {
                        let chart_service = chart_service.clone();
                        let lock = lock.clone();
                        async move {
                            chart_update::run(chart_service, &lock, lease).await;
                        }
                    })
                    .await;
                }
                WorkerName::OutboxRelay => {
                    let propagator = self.propagator.clone();
                    add_job(scheduler, &spec.cron, name_str, move || {
                        let propagator = propagator.clone();
                        let lock = lock.clone();
                        async move {
                            outbox_relay::run(propagator, &lock, lease).await;
                        }
                    })
                    .await;
                }
            }
            tracing::info!(name = name_str, cron = %spec.cron, "Registered worker");
        }
    }
}

/// Add a job to the scheduler with an in-process overlap guard.
///
/// No timeout is applied: a run ends when its work ends, and the cluster
/// lease bounds how long a dead holder can block other instances.
async fn add_job<Fut, F>(scheduler: &JobScheduler, cron: &str, name: &'static str, mut run: F)
where
    F: FnMut() -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let running = Arc::new(AtomicBool::new(false));

    let job = Job::new_async(cron, move |_uuid, _lock| {
        let guard = running.clone();

        if guard
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::warn!(
                worker = name,
                "Skipping worker invocation: previous run still in progress"
            );
            return Box::pin(async {});
        }

        let fut = run();
        Box::pin(async move {
            fut.await;
            guard.store(false, Ordering::SeqCst);
        })
    });

    match job {
        Ok(job) => {
            if let Err(err) = scheduler.add(job).await {
                tracing::error!(error=%err, cron, worker = name, "Failed to add worker job");
            }
        }
        Err(err) => tracing::error!(error=%err, cron, worker = name, "Failed to create worker job"),
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::broadcast;

    use crate::config::Config;
    use crate::events::RatingEventBus;
    use crate::store::Store;

    use super::*;

    fn manager(dir: &tempfile::TempDir, is_leader: bool, rx: broadcast::Receiver<()>) -> WorkerManager {
        let store = Arc::new(Store::open(dir.path().join("worker_test.sled").to_str().unwrap()).unwrap());
        let bus = RatingEventBus::declare(10);
        let mut worker_cfg = Config::from_env().worker;
        worker_cfg.is_leader = is_leader;

        WorkerManager::new(
            store.clone(),
            ChartScoringService::new(store.clone()),
            EventPropagator::new(store.clone(), bus.exchange),
            ClusterLock::sled(store, "test"),
            rx,
            &worker_cfg,
        )
    }

    #[tokio::test]
    async fn leader_switch_controls_job_registration() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (tx, _) = broadcast::channel(2);

        assert!(manager(&tmp, false, tx.subscribe()).planned_jobs().is_empty());
    }

    #[tokio::test]
    async fn leader_plans_every_job() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (tx, _) = broadcast::channel(2);

        let names: Vec<WorkerName> = manager(&tmp, true, tx.subscribe())
            .planned_jobs()
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        assert_eq!(
            names,
            vec![
                WorkerName::WeightRecalculation,
                WorkerName::ChartUpdate,
                WorkerName::OutboxRelay
            ]
        );
    }

    #[tokio::test]
    async fn non_leader_start_returns_immediately() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (tx, _) = broadcast::channel(2);

        manager(&tmp, false, tx.subscribe())
            .start()
            .await
            .expect("non-leader start should succeed");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn leader_start_stops_on_shutdown() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let (tx, _) = broadcast::channel(2);
        let handle = tokio::spawn(manager(&tmp, true, tx.subscribe()).start());

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(()).unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), handle).await;
        assert!(matches!(result, Ok(Ok(Ok(())))));
    }

    #[test]
    fn worker_names_match_lock_names() {
        assert_eq!(WorkerName::WeightRecalculation.as_str(), "weight_recalculation");
        assert_eq!(WorkerName::ChartUpdate.as_str(), "chart_update");
        assert_eq!(WorkerName::OutboxRelay.as_str(), "outbox_relay");
    }
}
