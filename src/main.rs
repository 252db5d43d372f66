//! MAX Market Data Mirror
//!
//! Runs the configured order book, public trade and private feeds, serves
//! health and Prometheus metrics, and logs hedging reports until Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use max_market_data::{Config, MaxClient, MaxRestClient};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting MAX market data mirror");

    let config = Config::load()?;
    info!(
        books = ?config.book_markets,
        trades = ?config.trade_markets,
        private = ?config.private_feed,
        "Configuration loaded"
    );

    let rest = MaxRestClient::new(&config.rest_endpoint, config.credentials.clone())?;
    let health_port = config.health_port;
    let hedge_interval = config.hedge_interval;
    let client = Arc::new(MaxClient::new(config, Arc::new(rest)));
    client.start().await?;

    let health_client = client.clone();
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_client, health_port).await {
            warn!(error = %e, "Health server error");
        }
    });

    let (mut reports, hedging) = client
        .hedging_pass()
        .spawn(hedge_interval, client.child_token());
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            for delta in &report.deltas {
                info!(
                    market = %delta.market,
                    net_base = %delta.net_base,
                    net_quote = %delta.net_quote,
                    trades = delta.trade_count,
                    "Hedging delta"
                );
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    client.shutdown().await;
    if let Err(e) = hedging.await {
        warn!(error = %e, "Hedging task failed");
    }

    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(client: Arc<MaxClient>, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(client);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(client): State<Arc<MaxClient>>) -> Json<serde_json::Value> {
    let feeds = client.feed_status().await;
    let healthy = feeds.iter().all(|f| f.healthy);
    Json(serde_json::json!({
        "status": if healthy { "healthy" } else { "degraded" },
        "component": "max-market-data",
        "feeds": feeds,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics() -> Result<String, StatusCode> {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
