use anyhow::Context;
use axum::extract::DefaultBodyLimit;
use axum::http::{header, HeaderValue, Method};
use axum::Router;
use operators_hub::api::{self, webhooks::WebhookState, AppState};
use operators_hub::cache::{init_cache_pool, RedisCache, RedisPoolConfig};
use operators_hub::config::{AppConfig, ServerConfig};
use operators_hub::database::{init_pool_from_config, run_migrations, user_repository::UserRepository};
use operators_hub::health::HealthChecker;
use operators_hub::logging::init_tracing;
use operators_hub::middleware::auth::TokenVerifier;
use operators_hub::middleware::logging::{request_logging_middleware, UuidRequestId};
use operators_hub::services::audit::AuditService;
use operators_hub::services::catalog::CatalogService;
use operators_hub::services::dashboard::DashboardService;
use operators_hub::services::notification::{notifier_from_config, CallbackSigner, TelegramClient};
use operators_hub::services::orders::OrderService;
use operators_hub::services::payment_requests::PaymentRequestService;
use operators_hub::services::settlement::SettlementService;
use operators_hub::services::telegram_callback::TelegramCallbackService;
use operators_hub::services::users::UserService;
use operators_hub::workers::reconciliation::{ReconciliationConfig, ReconciliationWorker};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tracing::{error, info, warn};

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received, starting graceful shutdown");
}

async fn shutdown_signal_with_notify(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    let _ = shutdown_tx.send(true);
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let allow_origin = if config.cors_allowed_origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        AllowOrigin::list(allowed_origins(config))
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
}

fn allowed_origins(config: &ServerConfig) -> Vec<HeaderValue> {
    config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.logging);
    config.validate().context("invalid configuration")?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        bind = %config.server.bind_address(),
        telegram = config.telegram.is_enabled(),
        cache = config.cache.enabled,
        "Starting Operators Hub"
    );

    let db_pool = init_pool_from_config(&config.database)
        .await
        .context("failed to connect to the database")?;
    if config.database.run_migrations {
        run_migrations(&db_pool)
            .await
            .context("failed to run migrations")?;
    }

    let redis_cache = if config.cache.enabled {
        match init_cache_pool(RedisPoolConfig::from(&config.cache)).await {
            Ok(pool) => Some(RedisCache::new(pool)),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, product listings will not be cached");
                None
            }
        }
    } else {
        info!("Skipping Redis cache (SKIP_CACHE=true)");
        None
    };

    let telegram_client = if config.telegram.bot_token.is_some() {
        match TelegramClient::from_config(&config.telegram) {
            Ok(client) => Some(Arc::new(client)),
            Err(e) => {
                error!(error = %e, "Failed to initialize Telegram client");
                None
            }
        }
    } else {
        None
    };
    let notifier = notifier_from_config(&config.telegram, telegram_client.clone());

    let users = Arc::new(UserService::new(db_pool.clone()));
    let settlement = Arc::new(SettlementService::new(db_pool.clone(), notifier.clone()));
    let audit = Arc::new(AuditService::new(db_pool.clone()));

    let state = AppState {
        verifier: Arc::new(TokenVerifier::from_config(&config.auth)),
        users,
        catalog: Arc::new(CatalogService::new(
            db_pool.clone(),
            redis_cache.clone(),
            Duration::from_secs(config.cache.products_ttl),
        )),
        orders: Arc::new(OrderService::new(db_pool.clone(), notifier.clone())),
        payment_requests: Arc::new(PaymentRequestService::new(
            db_pool.clone(),
            config.storefront.clone(),
            notifier,
        )),
        settlement: settlement.clone(),
        dashboard: Arc::new(DashboardService::new(db_pool.clone())),
        audit: audit.clone(),
        reconciliation_batch: config.workers.reconciliation_batch,
    };

    let health_checker = HealthChecker::new(db_pool.clone(), redis_cache);

    let webhook_routes = match &config.telegram.webhook_secret {
        Some(secret) => {
            let callbacks = TelegramCallbackService::new(
                settlement,
                UserRepository::new(db_pool.clone()),
                telegram_client,
                CallbackSigner::new(&config.telegram.callback_secret),
                config.telegram.admins.clone(),
            );
            api::webhooks::router(Arc::new(WebhookState {
                callbacks: Arc::new(callbacks),
                secret: secret.clone(),
            }))
        }
        None => {
            info!("Skipping Telegram webhook route (TELEGRAM_WEBHOOK_SECRET not set)");
            Router::new()
        }
    };

    // base64 inflates the proof image by a third
    let body_limit = config.storefront.max_proof_bytes * 4 / 3 + 64 * 1024;

    let app = api::router(state, health_checker)
        .merge(webhook_routes)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors_layer(&config.server))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(UuidRequestId))
                .layer(axum::middleware::from_fn(request_logging_middleware))
                .layer(PropagateRequestIdLayer::x_request_id()),
        );

    let (worker_shutdown_tx, worker_shutdown_rx) = watch::channel(false);
    let reconciliation_handle = match ReconciliationConfig::from_worker_config(&config.workers) {
        Some(worker_config) => {
            let worker = ReconciliationWorker::new(audit, worker_config);
            Some(tokio::spawn(worker.run(worker_shutdown_rx)))
        }
        None => {
            info!("Ledger reconciliation worker disabled (RECONCILIATION_INTERVAL_SECS=0)");
            None
        }
    };

    let addr: SocketAddr = config
        .server
        .bind_address()
        .parse()
        .context("invalid bind address")?;
    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind to address {}: {}", addr, e);
        e
    })?;

    info!(address = %addr, "Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_with_notify(worker_shutdown_tx.clone()))
        .await
        .context("server error")?;

    let _ = worker_shutdown_tx.send(true);
    if let Some(handle) = reconciliation_handle {
        if tokio::time::timeout(Duration::from_secs(5), handle).await.is_err() {
            error!("Timed out waiting for reconciliation worker shutdown");
        }
    }

    info!("Server shutdown complete");
    Ok(())
}
