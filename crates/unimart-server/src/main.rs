mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use unimart_api::middleware::verify_token;
use unimart_api::state::AppStateInner;
use unimart_db::Database;
use unimart_realtime::connection;
use unimart_realtime::dispatcher::Dispatcher;

use crate::config::ServerConfig;

#[derive(Clone)]
struct GatewayState {
    db: Arc<Database>,
    dispatcher: Dispatcher,
    jwt_secret: Arc<str>,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "unimart=debug,tower_http=debug".into()),
        )
        .init();

    let config = ServerConfig::from_env()?;
    let addr = config.listen_addr()?;

    let db = Arc::new(Database::open(&config.db_path)?);
    let dispatcher = Dispatcher::new();
    let app_state = AppStateInner::new(db.clone(), dispatcher.clone(), config.jwt_secret.clone());

    let gateway = Router::new()
        .route("/realtime", get(realtime_upgrade))
        .with_state(GatewayState {
            db,
            dispatcher,
            jwt_secret: config.jwt_secret.into(),
        });

    let app = Router::new()
        .merge(unimart_api::router(app_state))
        .merge(gateway)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    info!("Unimart chat server listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Browsers cannot set headers on a WebSocket handshake, so the bearer token
/// travels in the query string and is checked before upgrading.
async fn realtime_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(claims) = query
        .token
        .as_deref()
        .and_then(|token| verify_token(&state.jwt_secret, token))
    else {
        warn!("Rejected realtime upgrade with missing or invalid token");
        return StatusCode::UNAUTHORIZED.into_response();
    };

    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.db, claims.sub))
}
