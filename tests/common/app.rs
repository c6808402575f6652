use std::sync::Arc;

use axum::Router;
use tempfile::TempDir;
use tokio::sync::broadcast;

use chart_backend::config::{Config, MessagingConfig, WorkerConfig};
use chart_backend::events::{
    spawn_consumer, ActivityConsumer, ConsumerHandle, EventPropagator, RatingEventBus,
    SummaryConsumer,
};
use chart_backend::routes::build_router;
use chart_backend::services::{ChartScoringService, RatingMutationService};
use chart_backend::state::AppState;
use chart_backend::store::Store;

pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    pub store: Arc<Store>,
    pub bus: RatingEventBus,
    pub propagator: EventPropagator,
    pub charts: ChartScoringService,
    pub config: Config,
    _temp_dir: TempDir,
}

impl TestApp {
    pub fn spawn_summary_consumer(&self) -> ConsumerHandle {
        spawn_consumer(
            self.store.clone(),
            self.bus.summary_queue.clone(),
            Arc::new(SummaryConsumer::new(self.store.clone(), self.bus.summary_queue.name())),
        )
    }

    pub fn spawn_activity_consumer(&self) -> ConsumerHandle {
        spawn_consumer(
            self.store.clone(),
            self.bus.activity_queue.clone(),
            Arc::new(ActivityConsumer::new(self.store.clone())),
        )
    }
}

pub fn test_config(sled_path: String) -> Config {
    // Built directly so parallel tests never race on process env vars.
    Config {
        host: std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
        port: 3000,
        log_level: "info".to_string(),
        enable_file_logs: false,
        log_dir: "./logs".to_string(),
        sled_path,
        cors_origin: "http://localhost:5173".to_string(),
        worker: WorkerConfig {
            is_leader: false,
            instance_id: format!("test-{}", uuid::Uuid::new_v4().simple()),
            weighting_cron: "0 0 2 * * *".to_string(),
            chart_cron: "0 0 9 * * Tue".to_string(),
            outbox_relay_cron: "0 * * * * *".to_string(),
            lock_lease_secs: 300,
        },
        messaging: MessagingConfig { max_redeliveries: 5 },
    }
}

/// App with the store, topology and services wired, but no consumers running.
pub async fn spawn_test_app() -> TestApp {
    let temp_dir = tempfile::tempdir().expect("tempdir");
    let sled_path = temp_dir.path().join("chart-test.sled");
    let config = test_config(sled_path.to_string_lossy().to_string());

    let store = Arc::new(Store::open(&config.sled_path).expect("open store"));
    store.run_migrations().expect("run migrations");

    let bus = RatingEventBus::declare(config.messaging.max_redeliveries);
    let propagator = EventPropagator::new(store.clone(), bus.exchange.clone());
    let ratings = RatingMutationService::new(store.clone(), propagator.clone());
    let charts = ChartScoringService::new(store.clone());
    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    let state = AppState::new(store.clone(), ratings, charts.clone(), &config, shutdown_tx);
    let app = build_router(state.clone());

    TestApp {
        app,
        state,
        store,
        bus,
        propagator,
        charts,
        config,
        _temp_dir: temp_dir,
    }
}
