pub mod config;
pub mod data;
pub mod error;
pub mod handlers;
pub mod identity;
pub mod lobby;
pub mod session;
pub mod state;

use axum::{
    http::Method,
    routing::{get, post, put},
    Router,
};
use config::Config;
use handlers::{rest, ws};
use session::SessionController;
use state::AppState;
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::data::{GameStore, RedisStore};

pub fn create_app(config: Config) -> Router {
    let client = redis::Client::open(config.database.redis_url.clone()).expect("Invalid Redis URL");
    let store = Arc::new(RedisStore::new(client, config.lobby.game_ttl_secs));
    app_with_store(store, config)
}

/// Router over an explicit store, so tests and storeless local runs can
/// swap in `MemoryStore`.
pub fn app_with_store(store: Arc<dyn GameStore>, config: Config) -> Router {
    let controller = SessionController::new(store, config.lobby.clone());
    let state = Arc::new(AppState {
        controller,
        config: Arc::new(config),
    });

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_origin(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/game", post(rest::create_game_handler))
        .route(
            "/game/{code}",
            get(rest::get_game_handler).delete(rest::delete_game_handler),
        )
        .route("/game/{code}/join", post(rest::join_game_handler))
        .route("/game/{code}/player", put(rest::update_player_handler))
        .route("/game/{code}/leave", post(rest::leave_game_handler))
        .route("/ws/game/{code}", get(ws::websocket_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default().include_headers(true)))
        .layer(cors)
}
