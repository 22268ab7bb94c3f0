//! cbk-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config,
//! wires the manager over Postgres and the ERP sources, attaches
//! middleware, and starts the HTTP server. All route handlers live in
//! `routes.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use cbk_daemon::{routes, state};
use cbk_sources::erp::{ErpClient, ErpConfig, ErpIds};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    init_tracing();

    // Layered YAML config: CBK_CONFIG is a comma-separated path list,
    // empty means builtin dataset + default settings.
    let config_paths = std::env::var("CBK_CONFIG").unwrap_or_default();
    let paths: Vec<&str> = config_paths
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    let loaded = cbk_catalog::loader::load_layered_yaml(&paths)?;
    info!(config_hash = %loaded.config_hash, "config loaded");
    let settings = loaded.bundle.settings.clone();
    let catalog = loaded.bundle.catalog.clone();

    let pool = cbk_db::connect_from_env().await?;
    cbk_db::migrate(&pool).await?;
    let store = Arc::new(cbk_db::PgStore::new(pool));

    let api_key = std::env::var(&settings.erp.api_key_env)
        .with_context(|| format!("missing env var {}", settings.erp.api_key_env))?;
    let erp = Arc::new(ErpClient::new(
        ErpConfig {
            url: settings.erp.url.clone(),
            db: settings.erp.db.clone(),
            uid: settings.erp.uid,
            api_key,
        },
        ErpIds::default(),
        catalog.fallback_costs.clone(),
    ));

    let audit_path =
        std::env::var("CBK_AUDIT_LOG").unwrap_or_else(|_| "audit/settlements.jsonl".to_string());
    let audit = cbk_audit::AuditLog::open(&audit_path)?;

    let erp_for_sales: Arc<ErpClient> = Arc::clone(&erp);
    let sales: Arc<dyn cbk_sources::SalesSource> = erp_for_sales;
    let erp_for_purchases: Arc<ErpClient> = Arc::clone(&erp);
    let purchases: Arc<dyn cbk_sources::PurchaseSource> = erp_for_purchases;

    let manager = cbk_runtime::SettlementManager::new(
        store,
        sales,
        purchases,
        erp,
        audit,
        catalog,
        settings.clone(),
    );

    let shared = Arc::new(state::AppState::new(manager));
    let app = routes::build_router(shared)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_localhost_only());

    let addr = bind_addr(&settings.bind_addr)
        .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8790)));
    info!("cbk-daemon listening on http://{}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app)
        .await
        .context("server crashed")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

/// CBK_DAEMON_ADDR overrides the configured bind address.
fn bind_addr(configured: &Option<String>) -> Option<SocketAddr> {
    std::env::var("CBK_DAEMON_ADDR")
        .ok()
        .or_else(|| configured.clone())?
        .parse()
        .ok()
}

/// CORS: allow only localhost origins — the counter tablet UI is served
/// off the same box.
fn cors_localhost_only() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
