use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::instrument;

use crate::config::LobbyConfig;
use crate::data::GameStore;
use crate::error::AppError;
use crate::lobby::{CodeSource, Game, GameCode, GameSettings, Player, PlayerId, ThreadRngCodes};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Role {
    Host,
    Player,
}

/// Destination signalled back to the caller after a lifecycle operation.
/// The UI layer owns the actual route syntax; this carries the parameter
/// contract (code + role).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Route {
    Lobby { code: GameCode, role: Role },
    Landing,
}

/// Orchestrates code allocation, document creation, roster mutation and
/// live subscription. The only surface that touches the game store.
///
/// Constructed with its collaborators passed in; holds no global state.
pub struct SessionController {
    store: Arc<dyn GameStore>,
    cfg: LobbyConfig,
    codes: Mutex<Box<dyn CodeSource + Send>>,
}

impl SessionController {
    pub fn new(store: Arc<dyn GameStore>, cfg: LobbyConfig) -> Self {
        Self::with_codes(store, cfg, Box::new(ThreadRngCodes::new()))
    }

    pub fn with_codes(
        store: Arc<dyn GameStore>,
        cfg: LobbyConfig,
        codes: Box<dyn CodeSource + Send>,
    ) -> Self {
        Self {
            store,
            cfg,
            codes: Mutex::new(codes),
        }
    }

    fn next_code(&self) -> GameCode {
        let mut codes = self.codes.lock().unwrap_or_else(|e| e.into_inner());
        codes.next_code()
    }

    /// Allocates a free room code and persists the initial document. The
    /// creator becomes the sole roster entry and the game's host.
    ///
    /// Allocation is check-then-act: another client can claim the same code
    /// between `exists` and `create`, so a failed `create` re-enters the
    /// loop. Attempts are capped to give a deterministic failure mode under
    /// pathological occupancy.
    #[instrument(skip(self, creator), fields(creator = %creator.id))]
    pub async fn create_game(
        &self,
        name: &str,
        settings: GameSettings,
        creator: Player,
    ) -> Result<(Game, Route), AppError> {
        for _ in 0..self.cfg.code_attempts {
            let code = self.next_code();
            if self.store.exists(code).await? {
                continue;
            }

            let game = Game::new(code, name, settings, creator.clone());
            match self.store.create(&game).await {
                Ok(()) => {
                    tracing::info!(code = %code, "game created");
                    let route = Route::Lobby { code, role: Role::Host };
                    return Ok((game, route));
                }
                // Lost the check-then-act race; try a fresh code.
                Err(AppError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AppError::CodesExhausted(self.cfg.code_attempts))
    }

    /// Appends a player to an existing game's roster. Absent code: no
    /// mutation, `GameNotFound`. The append is a compare-and-swap retried
    /// against concurrent writers; a loser re-reads and re-applies, so two
    /// near-simultaneous joins both land.
    #[instrument(skip(self, player), fields(player = %player.id))]
    pub async fn join_game(&self, code: GameCode, player: Player) -> Result<(Game, Route), AppError> {
        let game = self
            .mutate_roster(code, |game| game.join(player.clone()).map(|()| true))
            .await?;

        tracing::info!(code = %code, "player joined");
        let route = Route::Lobby { code, role: Role::Player };
        Ok((game, route))
    }

    /// Replaces the roster entry matching `player.id`. An id with no match
    /// leaves the roster untouched and is not an error; in that case no
    /// write is issued at all.
    #[instrument(skip(self, player), fields(player = %player.id))]
    pub async fn update_player(&self, code: GameCode, player: Player) -> Result<Game, AppError> {
        self.mutate_roster(code, |game| Ok(game.update_player(player.clone())))
            .await
    }

    /// Removes the roster entry for `player_id`. The last player out tears
    /// the document down with them. Unknown ids are a no-op, mirroring
    /// `update_player`.
    #[instrument(skip(self))]
    pub async fn leave_game(&self, code: GameCode, player_id: PlayerId) -> Result<Route, AppError> {
        for _ in 0..=self.cfg.write_retries {
            let mut game = self.store.get(code).await?;
            if !game.remove_player(player_id) {
                return Ok(Route::Landing);
            }
            if game.players().is_empty() {
                // Version-guarded: a joiner racing the last leaver bumps the
                // version, the delete backs off and the retry re-reads the
                // roster they landed on.
                match self.store.delete(code, Some(game.version())).await {
                    Ok(()) => {
                        tracing::info!(code = %code, "last player left, lobby deleted");
                        return Ok(Route::Landing);
                    }
                    Err(AppError::Conflict(_)) => continue,
                    Err(e) => return Err(e),
                }
            }
            match self.store.put(&game).await {
                Ok(_) => {
                    tracing::info!(code = %code, player = %player_id, "player left");
                    return Ok(Route::Landing);
                }
                Err(AppError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AppError::Conflict(code))
    }

    /// Host-side teardown of the whole lobby.
    #[instrument(skip(self))]
    pub async fn delete_game(&self, code: GameCode) -> Result<Route, AppError> {
        self.store.delete(code, None).await?;
        tracing::info!(code = %code, "lobby deleted");
        Ok(Route::Landing)
    }

    /// Point read with no subscription side effect.
    pub async fn get_game(&self, code: GameCode) -> Result<Game, AppError> {
        self.store.get(code).await
    }

    /// Opens the live snapshot feed for a game. Subscribes before reading
    /// so the first delivery is the current document and no write can slip
    /// between the two; a write racing the read shows up again on the feed,
    /// which is harmless for full snapshots. Dropping the receiver is the
    /// unsubscribe.
    #[instrument(skip(self))]
    pub async fn watch(
        &self,
        code: GameCode,
    ) -> Result<(Game, broadcast::Receiver<Game>), AppError> {
        let rx = self.store.subscribe(code).await;
        let current = self.store.get(code).await?;
        Ok((current, rx))
    }

    /// Read-modify-write with CAS retry. `apply` edits the document in
    /// place and reports whether anything changed; unchanged documents are
    /// not written back.
    async fn mutate_roster<F>(&self, code: GameCode, mut apply: F) -> Result<Game, AppError>
    where
        F: FnMut(&mut Game) -> Result<bool, crate::lobby::LobbyError>,
    {
        for _ in 0..=self.cfg.write_retries {
            let mut game = self.store.get(code).await?;
            if !apply(&mut game)? {
                return Ok(game);
            }
            match self.store.put(&game).await {
                Ok(updated) => return Ok(updated),
                Err(AppError::Conflict(_)) => continue,
                Err(e) => return Err(e),
            }
        }
        Err(AppError::Conflict(code))
    }
}
