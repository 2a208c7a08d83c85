mod auth;
mod error;
mod routes;

use std::sync::Arc;

use anyhow::Result;
use axum::http::{header, HeaderValue, Method};
use sitesmith_core::config::SitesmithConfig;
use sitesmith_core::llm::LlmService;
use sitesmith_core::storage::{self, SqliteStorage};
use sitesmith_core::stripe::StripeClient;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

pub struct AppState {
    pub storage: SqliteStorage,
    pub llm: LlmService,
    pub payments: StripeClient,
    pub config: SitesmithConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sitesmith_web=info,sitesmith_core=info".parse().unwrap()),
        )
        .init();

    let cwd = std::env::current_dir().ok();
    let config = SitesmithConfig::load(cwd.as_deref()).unwrap_or_else(|e| {
        tracing::warn!("failed to load config, using defaults: {e}");
        SitesmithConfig::default_config()
    });

    let storage = storage::create_backend(&config)?;
    let llm = LlmService::from_config(&config.llm)?;
    let payments = StripeClient::from_config(&config.billing);

    tracing::info!(
        db = %storage.path().display(),
        provider = llm.provider_name(),
        model = llm.model_name(),
        "backends ready"
    );

    let cors = cors_layer(&config.web.trusted_origins);
    let addr = format!("{}:{}", config.web.host, config.web.port);

    let state = Arc::new(AppState {
        storage,
        llm,
        payments,
        config,
    });

    let app = routes::router()
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    tracing::info!("sitesmith-web listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Credentialed CORS for the configured client origins, permissive when none are set.
fn cors_layer(trusted_origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = trusted_origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o.trim()) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid trusted origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::permissive();
    }

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}
