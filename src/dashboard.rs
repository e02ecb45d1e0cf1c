use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::{
    chain::{OptionContract, OptionType},
    config::Settings,
    store::ChainStore,
};

#[derive(Clone)]
pub struct DashboardState {
    pub symbols: Arc<Vec<String>>,
    pub store: Arc<dyn ChainStore>,
}

pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/api/symbols", get(api_symbols))
        .route("/api/expirations", get(api_expirations))
        .route("/api/chain", get(api_chain))
        .layer(cors)
        .with_state(state)
}

pub async fn serve_dashboard(settings: Settings, store: Arc<dyn ChainStore>) -> Result<()> {
    let state = DashboardState {
        symbols: Arc::new(settings.symbols.clone()),
        store: store.clone(),
    };

    let addr: SocketAddr = format!("{}:{}", settings.dashboard_host, settings.dashboard_port)
        .parse()
        .with_context(|| {
            format!(
                "dashboard addr {}:{}",
                settings.dashboard_host, settings.dashboard_port
            )
        })?;

    log::info!("dashboard.start url=http://{} store={}", addr, store.describe());
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            log::info!("dashboard.stop");
        })
        .await?;
    Ok(())
}

fn bad_request(error: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"ok": false, "error": error})),
    )
        .into_response()
}

fn store_error(e: anyhow::Error) -> Response {
    log::error!("dashboard.store_error err={:#}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    )
        .into_response()
}

fn param(v: Option<String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

async fn api_symbols(State(st): State<DashboardState>) -> impl IntoResponse {
    Json(st.symbols.as_ref().clone())
}

#[derive(Deserialize)]
struct ExpirationsQ {
    symbol: Option<String>,
}

async fn api_expirations(
    State(st): State<DashboardState>,
    Query(q): Query<ExpirationsQ>,
) -> Response {
    let Some(symbol) = param(q.symbol).map(|s| s.to_uppercase()) else {
        return bad_request("symbol_required");
    };
    match st.store.fetch_expirations(&symbol).await {
        Ok(expirations) => Json(serde_json::json!({
            "symbol": symbol,
            "expirations": expirations,
        }))
        .into_response(),
        Err(e) => store_error(e),
    }
}

#[derive(Deserialize)]
struct ChainQ {
    symbol: Option<String>,
    expiration: Option<String>,
}

async fn api_chain(State(st): State<DashboardState>, Query(q): Query<ChainQ>) -> Response {
    let Some(symbol) = param(q.symbol).map(|s| s.to_uppercase()) else {
        return bad_request("symbol_required");
    };
    let Some(expiration) = param(q.expiration) else {
        return bad_request("expiration_required");
    };
    match st.store.fetch_chain(&symbol, &expiration).await {
        Ok(rows) => {
            let (puts, calls): (Vec<OptionContract>, Vec<OptionContract>) = rows
                .into_iter()
                .partition(|r| r.option_type == OptionType::Put);
            Json(serde_json::json!({
                "symbol": symbol,
                "expiration": expiration,
                "calls": calls,
                "puts": puts,
            }))
            .into_response()
        }
        Err(e) => store_error(e),
    }
}
