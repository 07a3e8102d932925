//! Operator process: Alertmanager webhook intake, the Remediation
//! lifecycle controller, the metrics endpoint and the event dashboard.

use axum::http::header;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{error, info, Level};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use heal8s::config::OperatorConfig;
use heal8s::controller::run_remediation_controller;
use heal8s::dashboard::{self, EventLog};
use heal8s::metrics;
use heal8s::webhook::{build_webhook_router, IntakeState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,heal8s=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting heal8s operator v{}", env!("CARGO_PKG_VERSION"));

    let config = OperatorConfig::from_env()?;

    let client = kube::Client::try_default().await?;
    info!("connected to Kubernetes cluster");

    let events = EventLog::new();
    let intake = IntakeState::new(client.clone(), events.clone());

    // The controller runs alongside the HTTP server for the lifetime of
    // the process.
    let controller_handle = {
        let client = client.clone();
        let namespace = config.namespace.clone();
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(err) = run_remediation_controller(client, namespace, events).await {
                error!(error = %err, "controller error");
            }
        })
    };

    let dashboard_router = Router::new()
        .route("/", get(dashboard::events_html))
        .route("/dashboard", get(dashboard::events_html))
        .route("/index.html", get(dashboard::events_html))
        .route("/api/events", get(dashboard::events_json))
        .with_state(events);

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_text))
        .merge(build_webhook_router(intake))
        .merge(dashboard_router)
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(Duration::from_secs(60))),
        );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("operator HTTP server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Let in-flight reconciles observe the shutdown before tearing the
    // controller down.
    tokio::time::sleep(Duration::from_secs(2)).await;
    controller_handle.abort();
    info!("operator stopped");

    Ok(())
}

async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "service": "heal8s-operator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn readiness_check() -> Json<Value> {
    Json(json!({
        "status": "ready",
        "service": "heal8s-operator",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

async fn metrics_text() -> ([(header::HeaderName, &'static str); 1], String) {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, shutting down gracefully");
        },
        () = terminate => {
            info!("received SIGTERM, shutting down gracefully");
        },
    }
}
