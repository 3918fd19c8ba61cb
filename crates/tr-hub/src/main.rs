use axum::{routing::get, Router};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tr_core::SourceRegistry;

mod api;
mod config;
mod error;
mod executor;
mod service;
mod tail;

use config::Config;
use executor::HttpExecutor;
use service::LogsService;

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "tr-hub", version = "0.1.0", about = "TRIBUTARY unified log explorer")]
struct Args {
    /// Path to config file
    #[arg(long, default_value = "tr-hub.toml")]
    config: PathBuf,

    /// Server bind address (overrides the config file)
    #[arg(long)]
    bind: Option<String>,

    /// Execution endpoint (overrides the config file)
    #[arg(long)]
    endpoint: Option<String>,
}

// =============================================================================
// Application State
// =============================================================================

pub struct AppState {
    pub config: Config,
    pub service: Arc<LogsService>,
}

pub fn app(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/logs", get(api::get_logs))
        .route("/api/logs/sql", get(api::get_logs_sql))
        .route("/api/sources", get(api::list_sources))
        .route("/ws/tail", get(tail::ws_tail))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "tr_hub=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = Config::load(&args.config);
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(endpoint) = args.endpoint {
        config.execution.endpoint = endpoint;
    }

    let executor = match HttpExecutor::new(&config.execution) {
        Ok(executor) => Arc::new(executor),
        Err(e) => {
            tracing::error!("Failed to build execution client: {}", e);
            std::process::exit(1);
        }
    };

    let registry = Arc::new(SourceRegistry::with_default_sources());
    tracing::info!("Registered {} log sources: {:?}", registry.len(), registry);

    let service = Arc::new(LogsService::new(
        registry,
        executor,
        config.query.clone(),
    ));
    let state = Arc::new(AppState {
        config: config.clone(),
        service,
    });

    let listener = match tokio::net::TcpListener::bind(&config.server.bind).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", config.server.bind, e);
            std::process::exit(1);
        }
    };
    tracing::info!(
        "TRIBUTARY hub listening on http://{} (executing against {})",
        config.server.bind,
        config.execution.endpoint
    );

    if let Err(e) = axum::serve(listener, app(state)).await {
        tracing::error!("Server error: {}", e);
    }
}
