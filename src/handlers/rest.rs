use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::instrument;

use crate::{
    data::{
        CreateGameRequest, CreateGameResponse, JoinGameRequest, JoinGameResponse,
        LeaveGameRequest, LeaveGameResponse, UpdatePlayerRequest,
    },
    error::AppError,
    lobby::{Game, GameCode, GameSettings},
    state::SharedState,
};

// ==============================================================================
// === REST API Handlers
// =============================================================================

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 50;

/// Form-boundary validation. The controller trusts its callers, so
/// malformed names stop here (and at the socket boundary, which applies
/// the same check).
pub(crate) fn validate_name(field: &str, name: &str) -> Result<(), AppError> {
    let len = name.chars().count();
    if len < NAME_MIN || len > NAME_MAX {
        return Err(AppError::Validation(format!(
            "{} must be between {} and {} characters",
            field, NAME_MIN, NAME_MAX
        )));
    }
    Ok(())
}

#[instrument(skip(state, payload))]
pub async fn create_game_handler(
    State(state): State<SharedState>,
    Json(payload): Json<CreateGameRequest>,
) -> Result<(StatusCode, Json<CreateGameResponse>), AppError> {
    validate_name("game name", &payload.name)?;
    validate_name("player name", &payload.player.name)?;
    if payload.max_players == 0 || payload.max_rounds == 0 {
        return Err(AppError::Validation(
            "maxPlayers and maxRounds must be at least 1".to_string(),
        ));
    }

    let settings = GameSettings {
        max_players: payload.max_players,
        max_rounds: payload.max_rounds,
        is_private: payload.is_private,
    };
    let creator = payload.player.into_player();

    let (game, route) = state
        .controller
        .create_game(&payload.name, settings, creator)
        .await?;

    tracing::info!(code = %game.id(), name = %game.name(), "game created");
    Ok((StatusCode::CREATED, Json(CreateGameResponse { game, route })))
}

#[instrument(skip(state))]
pub async fn get_game_handler(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
) -> Result<Json<Game>, AppError> {
    let game = state.controller.get_game(code).await?;
    Ok(Json(game))
}

#[instrument(skip(state, payload))]
pub async fn join_game_handler(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
    Json(payload): Json<JoinGameRequest>,
) -> Result<Json<JoinGameResponse>, AppError> {
    validate_name("player name", &payload.player.name)?;

    let player = payload.player.into_player();
    let (game, route) = state.controller.join_game(code, player).await?;

    tracing::info!(code = %code, "player joined");
    Ok(Json(JoinGameResponse { game, route }))
}

#[instrument(skip(state, payload))]
pub async fn update_player_handler(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
    Json(payload): Json<UpdatePlayerRequest>,
) -> Result<Json<Game>, AppError> {
    validate_name("player name", &payload.player.name)?;

    let game = state.controller.update_player(code, payload.player).await?;
    Ok(Json(game))
}

#[instrument(skip(state, payload))]
pub async fn leave_game_handler(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
    Json(payload): Json<LeaveGameRequest>,
) -> Result<Json<LeaveGameResponse>, AppError> {
    let route = state.controller.leave_game(code, payload.player_id).await?;
    Ok(Json(LeaveGameResponse { route }))
}

#[instrument(skip(state))]
pub async fn delete_game_handler(
    State(state): State<SharedState>,
    Path(code): Path<GameCode>,
) -> Result<Json<LeaveGameResponse>, AppError> {
    let route = state.controller.delete_game(code).await?;
    Ok(Json(LeaveGameResponse { route }))
}
