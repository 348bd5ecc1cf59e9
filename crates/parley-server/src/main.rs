mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    extract::{DefaultBodyLimit, Query, State, WebSocketUpgrade},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use parley_api::auth::verify_token;
use parley_api::{AppStateInner, chat_routes};
use parley_chat::janitor::run_staging_janitor;
use parley_chat::{ChatService, HttpObjectStore, LocalObjectStore, ObjectStore, Stager};
use parley_db::Database;
use parley_gateway::connection;
use parley_gateway::nats::{NatsRelay, run_bridge};
use parley_gateway::{Broker, BrokerKind, Dispatcher};

use crate::config::Config;

const STAGING_SWEEP_INTERVAL: std::time::Duration = std::time::Duration::from_secs(3600);
/// Request bodies may carry several files of up to `max_file_bytes` each.
const MAX_FILES_PER_REQUEST: usize = 10;

#[derive(Clone)]
struct GatewayState {
    dispatcher: Dispatcher,
    db: Arc<Database>,
    jwt_secret: String,
}

#[derive(Debug, Deserialize)]
struct GatewayQuery {
    token: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "parley=debug,tower_http=debug".into()),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            eprintln!("       Set it in your .env file and restart.");
            std::process::exit(1);
        }
    };

    // Init database
    let db = Arc::new(Database::open(&config.db_path)?);

    // Fan-out transport, chosen once for the process lifetime
    let dispatcher = Dispatcher::new();
    let broker = match config.broker {
        BrokerKind::Local => Broker::Local(dispatcher.clone()),
        BrokerKind::Nats => {
            let relay = NatsRelay::connect(&config.nats_url).await?;
            let client = relay.client().clone();
            let bridge_dispatcher = dispatcher.clone();
            tokio::spawn(async move {
                if let Err(e) = run_bridge(client, bridge_dispatcher).await {
                    error!("NATS bridge stopped: {}", e);
                }
            });
            Broker::Nats(relay)
        }
    };
    info!("Broker transport: {:?}", broker.kind());

    // Attachment storage
    let store: Arc<dyn ObjectStore> = match &config.storage_url {
        Some(url) => {
            info!("Object storage: HTTP at {}", url);
            Arc::new(HttpObjectStore::new(url))
        }
        None => Arc::new(
            LocalObjectStore::new(config.storage_dir.clone(), &config.public_base_url).await?,
        ),
    };
    let stager = Stager::new(config.staging_dir.clone())?;
    info!("Staging directory: {}", config.staging_dir.display());

    // Background sweep of orphaned staged files (runs at startup, then hourly)
    tokio::spawn(run_staging_janitor(
        config.staging_dir.clone(),
        config.staging_max_age,
        STAGING_SWEEP_INTERVAL,
    ));

    let chat = ChatService::new(db.clone(), broker, store, stager);
    let app_state = Arc::new(AppStateInner {
        chat: chat.clone(),
        jwt_secret: config.jwt_secret.clone(),
        max_file_bytes: config.max_file_bytes,
    });

    let gateway_state = GatewayState {
        dispatcher,
        db,
        jwt_secret: config.jwt_secret.clone(),
    };

    // Routes
    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(gateway_state);

    let mut app = Router::new()
        .merge(chat_routes(app_state))
        .merge(ws_route);

    if config.storage_url.is_none() {
        if config.public_base_url.starts_with('/') && config.public_base_url.len() > 1 {
            app = app.nest_service(&config.public_base_url, ServeDir::new(&config.storage_dir));
        } else {
            warn!(
                "PARLEY_PUBLIC_BASE_URL '{}' is not a local path; stored files are not served here",
                config.public_base_url
            );
        }
    }

    let app = app
        .layer(DefaultBodyLimit::max(
            config.max_file_bytes.saturating_mul(MAX_FILES_PER_REQUEST),
        ))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("Parley server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Waiting for in-flight uploads and publishes...");
    chat.drain().await;
    info!("Shutdown complete");

    Ok(())
}

async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    ws: WebSocketUpgrade,
) -> Result<impl IntoResponse, StatusCode> {
    let claims = verify_token(&state.jwt_secret, &query.token).map_err(|e| {
        warn!("Gateway auth failed: {}", e);
        StatusCode::UNAUTHORIZED
    })?;

    Ok(ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.dispatcher, state.db, claims.sub)
    }))
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                ctrl_c.await.ok();
                info!("Received Ctrl+C, shutting down...");
            }
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
