use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use axum::http::{header, HeaderValue};
use chart_backend::config::Config;
use chart_backend::events::{
    spawn_consumer, ActivityConsumer, EventPropagator, RatingEventBus, SummaryConsumer,
};
use chart_backend::lock::ClusterLock;
use chart_backend::logging::{init_tracing, LogConfig};
use chart_backend::routes::build_router;
use chart_backend::services::{ChartScoringService, RatingMutationService};
use chart_backend::state::AppState;
use chart_backend::store::Store;
use chart_backend::workers::WorkerManager;
use tokio::sync::broadcast;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    let config = Config::from_env();

    if let Err(e) = init_tracing(&LogConfig::from(&config)) {
        eprintln!("Failed to initialise logging: {e}");
        return ExitCode::FAILURE;
    }
    tracing::info!(instance_id = %config.worker.instance_id, "Starting chart-backend");

    let store = match Store::open(&config.sled_path) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            tracing::error!(error = %e, path = %config.sled_path, "Failed to open sled database");
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = store.run_migrations() {
        tracing::error!(error = %e, "Failed to run migrations");
        return ExitCode::FAILURE;
    }

    let cors_layer = match build_cors_layer(&config) {
        Ok(layer) => layer,
        Err(e) => {
            tracing::error!(cors_origin = %config.cors_origin, error = %e, "Invalid CORS_ORIGIN");
            return ExitCode::FAILURE;
        }
    };

    let (shutdown_tx, _) = broadcast::channel::<()>(8);

    let bus = RatingEventBus::declare(config.messaging.max_redeliveries);
    let propagator = EventPropagator::new(store.clone(), bus.exchange.clone());
    let consumers = vec![
        spawn_consumer(
            store.clone(),
            bus.summary_queue.clone(),
            Arc::new(SummaryConsumer::new(store.clone(), bus.summary_queue.name())),
        ),
        spawn_consumer(
            store.clone(),
            bus.activity_queue.clone(),
            Arc::new(ActivityConsumer::new(store.clone())),
        ),
    ];
    // Events the previous run published but never saw confirmed.
    match propagator.relay_pending(chrono::Utc::now()) {
        Ok(report) => tracing::info!(republished = report.republished, "Startup outbox relay done"),
        Err(e) => tracing::error!(error = %e, "Startup outbox relay failed"),
    }

    let ratings = RatingMutationService::new(store.clone(), propagator.clone());
    let charts = ChartScoringService::new(store.clone());

    let state = AppState::new(
        store.clone(),
        ratings,
        charts.clone(),
        &config,
        shutdown_tx.clone(),
    );

    let worker_handle = if config.worker.is_leader {
        let worker_manager = WorkerManager::new(
            store.clone(),
            charts,
            propagator,
            ClusterLock::sled(store.clone(), &config.worker.instance_id),
            shutdown_tx.subscribe(),
            &config.worker,
        );
        Some(tokio::spawn(async move {
            if let Err(e) = worker_manager.start().await {
                tracing::error!(error = %e, "Worker manager failed");
            }
        }))
    } else {
        None
    };

    let app = build_router(state)
        .layer(cors_layer)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ));

    let addr = SocketAddr::new(config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind TCP listener");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(%addr, "Listening");

    let server_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await;
    if let Err(e) = &server_result {
        tracing::error!(error = %e, "HTTP server crashed");
        let _ = shutdown_tx.send(());
    }

    if let Some(handle) = worker_handle {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "Worker task panicked");
        }
    }

    for consumer in consumers {
        let name = consumer.name();
        consumer.stop().await;
        tracing::info!(consumer = name, "Consumer stopped");
    }

    tracing::info!("Flushing store before exit");
    if let Err(e) = store.flush() {
        tracing::error!(error = %e, "Failed to flush store before exit");
    }
    tracing::info!("Shutdown complete");

    if server_result.is_err() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

fn build_cors_layer(config: &Config) -> Result<CorsLayer, axum::http::header::InvalidHeaderValue> {
    let layer = CorsLayer::new()
        .allow_headers([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static(chart_backend::extractors::USER_ID_HEADER),
        ])
        .allow_methods(Any);

    if config.cors_origin.trim() == "*" {
        return Ok(layer.allow_origin(Any).allow_credentials(false));
    }
    Ok(layer.allow_origin(config.cors_origin.parse::<HeaderValue>()?))
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = sigterm.recv() => {},
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "SIGTERM handler unavailable; waiting for Ctrl-C only");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }

    tracing::info!("Shutdown signal received");
    let _ = shutdown_tx.send(());
}
