//! DocFlow: asynchronous document ingestion and classification pipeline.
//!
//! Startup wires the adapters behind the ports, starts the classification
//! worker and the DLQ reprocessor, and serves two HTTP surfaces: the document
//! API and the health/metrics listener. On SIGINT/SIGTERM the listeners stop
//! first, then the worker drains its in-flight delivery, then the
//! reprocessor exits its (cancellable) sleep, and finally the broker
//! connection closes.

use std::sync::Arc;

use anyhow::Context as _;
use docflow_api::{build_ops_router, build_router, AppContext};
use docflow_common::PipelineMetrics;
use docflow_core::{
    BlobStore, Classifier, ClassificationService, DocumentRepository, JobPublisher,
};
use docflow_infra::{
    connect_broker, AmqpJobPublisher, ClassificationWorker, ClassificationWorkerConfig,
    DbManager, DlqReprocessor, FsBlobStore, HttpClassifier, SqliteDocumentRepository,
};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    if let Ok(path) = dotenvy::dotenv() {
        info!(path = %path.display(), "loaded .env");
    }

    let config = docflow_infra::config::load()?;

    // Persistence
    let db = Arc::new(DbManager::new(&config.database.path, config.database.pool_size)?);
    db.run_migrations().context("running database migrations")?;
    let documents: Arc<dyn DocumentRepository> =
        Arc::new(SqliteDocumentRepository::new(Arc::clone(&db)));
    let blobs: Arc<dyn BlobStore> = Arc::new(FsBlobStore::new(config.blob.root.clone()));
    let metrics = Arc::new(PipelineMetrics::new());

    // Broker and classifier gateway
    let connection = Arc::new(connect_broker(&config.broker).await?);
    let publisher: Arc<dyn JobPublisher> = Arc::new(AmqpJobPublisher::new(&connection).await?);
    let classifier: Arc<dyn Classifier> = Arc::new(HttpClassifier::new(&config.classifier)?);

    // Worker pipeline and DLQ reprocessor
    let service = Arc::new(ClassificationService::new(
        Arc::clone(&documents),
        Arc::clone(&blobs),
        classifier,
        Arc::clone(&metrics),
    ));
    let mut worker = ClassificationWorker::new(
        Arc::clone(&connection),
        service,
        ClassificationWorkerConfig::default(),
    );
    worker.start().await.context("starting classification worker")?;

    let mut reprocessor = if config.dlq.enabled {
        let mut task = DlqReprocessor::new(
            Arc::clone(&connection),
            config.dlq.clone(),
            Arc::clone(&metrics),
        );
        task.start().context("starting DLQ reprocessor")?;
        Some(task)
    } else {
        info!("DLQ reprocessor disabled by configuration");
        None
    };

    // HTTP surfaces
    let context = Arc::new(AppContext::new(
        config.clone(),
        documents,
        blobs,
        publisher,
        Arc::clone(&metrics),
    ));
    let app = build_router(Arc::clone(&context))
        .layer(TimeoutLayer::new(config.http.request_timeout()))
        .layer(TraceLayer::new_for_http());
    let ops = build_ops_router(Arc::clone(&metrics));

    let api_listener = TcpListener::bind(&config.http.bind_addr)
        .await
        .with_context(|| format!("binding API listener on {}", config.http.bind_addr))?;
    let ops_listener = TcpListener::bind(&config.metrics.bind_addr)
        .await
        .with_context(|| format!("binding metrics listener on {}", config.metrics.bind_addr))?;
    info!(
        api = %config.http.bind_addr,
        metrics = %config.metrics.bind_addr,
        "docflow listening"
    );

    let shutdown = CancellationToken::new();
    let api_task = spawn_server(api_listener, app, shutdown.clone());
    let ops_task = spawn_server(ops_listener, ops, shutdown.clone());

    shutdown_signal().await;
    info!("shutdown signal received");

    // Stop accepting requests, then drain the pipeline back to front.
    shutdown.cancel();
    let _ = api_task.await;
    let _ = ops_task.await;

    if let Err(err) = worker.stop().await {
        warn!(error = %err, "worker stop reported an error");
    }
    if let Some(task) = reprocessor.as_mut() {
        if let Err(err) = task.stop().await {
            warn!(error = %err, "reprocessor stop reported an error");
        }
    }
    if let Err(err) = connection.close(200, "shutting down").await {
        warn!(error = %err, "broker close reported an error");
    }

    info!("shutdown complete");
    Ok(())
}

fn spawn_server(
    listener: TcpListener,
    router: axum::Router,
    shutdown: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await;
        if let Err(err) = result {
            error!(error = %err, "http server terminated with an error");
        }
    })
}

/// Resolve on SIGINT or (on unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,docflow=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
