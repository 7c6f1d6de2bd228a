use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use ember_api::auth::{self, AppState, AppStateInner};
use ember_api::chats;
use ember_api::identity::ProviderRegistry;
use ember_api::matches;
use ember_api::middleware::require_auth;
use ember_gateway::Gateway;
use ember_gateway::connection;
use ember_gateway::notify::LogNotifier;
use ember_gateway::presence::DEFAULT_PRESENCE_TTL;
use ember_match::MatchEngine;

#[derive(Clone)]
struct ServerState {
    gateway: Gateway,
    jwt_secret: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| {
                    "ember_server=debug,ember_api=debug,ember_gateway=debug,\
                     ember_match=debug,ember_db=debug,tower_http=debug"
                        .into()
                }),
        )
        .init();

    // Config
    let jwt_secret =
        std::env::var("EMBER_JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".into());
    let db_path = std::env::var("EMBER_DB_PATH").unwrap_or_else(|_| "ember.db".into());
    let host = std::env::var("EMBER_HOST").unwrap_or_else(|_| "0.0.0.0".into());
    let port: u16 = std::env::var("EMBER_PORT")
        .unwrap_or_else(|_| "3000".into())
        .parse()?;
    let presence_ttl = std::env::var("EMBER_PRESENCE_TTL_SECS")
        .ok()
        .and_then(|raw| raw.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_PRESENCE_TTL);
    let oauth_redirect = std::env::var("EMBER_OAUTH_REDIRECT_URI")
        .unwrap_or_else(|_| format!("http://localhost:{}/auth/callback", port));

    // Init database
    let db = Arc::new(ember_db::Database::open(&PathBuf::from(&db_path))?);

    // Shared state
    let gateway = Gateway::new(db.clone(), presence_ttl, Arc::new(LogNotifier));
    let engine = MatchEngine::new(db.clone());
    let providers = ProviderRegistry::from_env(&oauth_redirect);

    let app_state: AppState = Arc::new(AppStateInner {
        db,
        engine,
        gateway: gateway.clone(),
        jwt_secret: jwt_secret.clone(),
        providers,
    });

    let state = ServerState {
        gateway,
        jwt_secret,
    };

    // Routes
    let public_routes = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/oauth", post(auth::oauth_login))
        .with_state(app_state.clone());

    let protected_routes = Router::new()
        .route("/swipe", post(matches::swipe))
        .route("/matches", get(matches::get_matches))
        .route("/matches/{match_id}/unmatch", post(matches::unmatch))
        .route("/chats/{chat_id}/messages", get(chats::get_messages))
        .route("/chats/{chat_id}/messages", post(chats::send_message))
        .layer(middleware::from_fn(require_auth))
        .with_state(app_state);

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    let app = Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Ember server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::handle_connection(socket, state.gateway, state.jwt_secret)
    })
}
