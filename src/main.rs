use std::process;
use std::sync::Arc;
use std::time::Duration;

use axum::{error_handling::HandleErrorLayer, http::StatusCode};
use tower::{BoxError, ServiceBuilder};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use uca_timetable_service::{
    config::{AppConfig, CatalogSource},
    create_router,
    services::{
        catalog::{CsvEntryCatalog, EntryCatalog, HttpEntryCatalog},
        notifications::NotificationService,
        selection_store::CsvSelectionStore,
        users::UserDirectory,
    },
    AppState, ServiceError, TimetableEngine, TokenSigner,
};

// Error handler
async fn handle_error(error: BoxError) -> (StatusCode, String) {
    if error.is::<tower::timeout::error::Elapsed>() {
        (
            StatusCode::REQUEST_TIMEOUT,
            "Request took too long".to_string(),
        )
    } else if error.is::<tower::load_shed::error::Overloaded>() {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Service is overloaded, try again later".to_string(),
        )
    } else {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Unhandled internal error: {}", error),
        )
    }
}

fn build_state(config: &AppConfig) -> Result<Arc<AppState>, ServiceError> {
    let catalog: Arc<dyn EntryCatalog> = match &config.catalog {
        CatalogSource::Csv(path) => Arc::new(CsvEntryCatalog::new(path.clone())),
        CatalogSource::Remote(url) => {
            Arc::new(HttpEntryCatalog::new(url, config.dependency_timeout)?)
        }
    };

    let store = Arc::new(CsvSelectionStore::new(config.selections_csv_path.clone())?);
    info!("Selection store initialized");

    let users = Arc::new(
        UserDirectory::load(&config.users_csv_path)?.with_password_cost(config.password_hash_cost),
    );

    Ok(Arc::new(AppState {
        engine: TimetableEngine::new(catalog, store, config.dependency_timeout),
        signer: Arc::new(TokenSigner::new(
            &config.auth_secret,
            config.access_token_ttl_secs,
            config.refresh_token_ttl_secs,
        )),
        users,
        notifications: Arc::new(NotificationService::new()),
    }))
}

#[tokio::main]
async fn main() {
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {}", e);
            process::exit(1);
        }
    };

    // Initialize tracing for logging, RUST_LOG wins over LOG_LEVEL
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    config.log_summary();

    let app_state = match build_state(&config) {
        Ok(state) => state,
        Err(e) => {
            error!("Failed to initialize services: {}", e);
            process::exit(1);
        }
    };

    let app = create_router(app_state).layer(
        ServiceBuilder::new()
            .layer(HandleErrorLayer::new(handle_error))
            .load_shed()
            .concurrency_limit(64)
            .timeout(Duration::from_secs(10))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::new().allow_origin(Any).allow_headers(Any).allow_methods(Any)),
    );

    info!("Server listening on {}", config.bind_addr);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", config.bind_addr, e);
            process::exit(1);
        }
    };

    // Set up signal handler for graceful shutdown
    let shutdown = async {
        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    error!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received interrupt signal, starting graceful shutdown");
            },
            _ = terminate => {
                info!("Received terminate signal, starting graceful shutdown");
            },
        }
    };

    info!("Server is ready to accept connections");
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!("Server error: {}", e);
        process::exit(1);
    }

    info!("Server has been gracefully shut down");
}
