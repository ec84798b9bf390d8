use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::http::{header, HeaderValue, Method};
use tokio::sync::mpsc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use storefront_api::auth::AuthVerifier;
use storefront_api::config;
use storefront_api::db;
use storefront_api::events;
use storefront_api::handlers::AppServices;
use storefront_api::services::payments::mpesa::DarajaClient;
use storefront_api::services::payments::paypal::PayPalClient;
use storefront_api::{app_router, ApiDoc, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("failed to load configuration")?;
    config::init_tracing(cfg.log_level(), cfg.log_json);

    let db = Arc::new(
        db::establish_connection(&cfg)
            .await
            .context("failed to connect to database")?,
    );
    if cfg.auto_migrate {
        db::run_migrations(&db)
            .await
            .context("failed to run migrations")?;
    }

    let (event_tx, event_rx) = mpsc::channel(1024);
    let event_sender = events::EventSender::new(event_tx);
    tokio::spawn(events::process_events(event_rx));

    let mpesa_gateway = Arc::new(DarajaClient::new(cfg.mpesa.clone()));
    let paypal_gateway = Arc::new(PayPalClient::new(cfg.paypal.clone()));
    let services = AppServices::new(
        db.clone(),
        event_sender.clone(),
        &cfg,
        mpesa_gateway,
        paypal_gateway,
    );

    let verifier = Arc::new(AuthVerifier::new(
        &cfg.jwt_secret,
        &cfg.jwt_issuer,
        &cfg.jwt_audience,
    ));

    let state = AppState {
        db,
        config: cfg.clone(),
        event_sender,
        services,
    };

    let app = app_router(state, verifier)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(cfg.cors_allowed_origins.as_deref()))
        .layer(CompressionLayer::new())
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .context("invalid host/port")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, environment = %cfg.environment, "Storefront API listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("Server shut down cleanly");
    Ok(())
}

fn cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    match allowed_origins {
        Some(raw) if !raw.trim().is_empty() => {
            let origins: Vec<HeaderValue> = raw
                .split(',')
                .filter_map(|o| {
                    let trimmed = o.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(v) => Some(v),
                        Err(_) => {
                            warn!(origin = trimmed, "Ignoring unparseable CORS origin");
                            None
                        }
                    }
                })
                .collect();
            base.allow_origin(origins)
        }
        _ => base.allow_origin(Any),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => warn!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received ctrl-c, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
}
