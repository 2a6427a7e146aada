use serde::{Deserialize, Serialize};

use super::types::{GameCode, LobbyError, PlayerId};

/// One roster entry. A plain record: the client owns its copy (identity
/// cache) and the game document holds the authoritative one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub id: PlayerId,
    pub name: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub is_host: bool,
    #[serde(default)]
    pub is_ready: bool,
    /// The player's authored question pool. Data only, consumed by the
    /// game-play engine, not by the lobby.
    #[serde(default)]
    pub questions: Vec<String>,
}

impl Player {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: PlayerId::new(),
            name: name.into(),
            score: 0,
            is_host: false,
            is_ready: false,
            questions: Vec::new(),
        }
    }
}

/// Creation-time bounds chosen by the host.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSettings {
    pub max_players: u32,
    pub max_rounds: u32,
    pub is_private: bool,
}

/// The shared game document. One per room code; every client observes the
/// same copy through the store subscription.
///
/// `is_started`, `is_finished`, `winner` and the round/question fields are
/// reserved for the game-play engine. The lobby carries them as data and
/// never writes them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Game {
    id: GameCode,
    name: String,
    players: Vec<Player>,
    max_players: u32,
    max_rounds: u32,
    is_private: bool,
    #[serde(default)]
    is_started: bool,
    #[serde(default)]
    is_finished: bool,
    #[serde(default)]
    current_question: String,
    #[serde(default)]
    current_round: u32,
    #[serde(default)]
    questions: Vec<String>,
    #[serde(default)]
    winner: Option<Player>,
    created_at: i64,
    /// Optimistic-concurrency token, bumped by the store on every roster
    /// write. Roster mutations compare-and-swap against it.
    #[serde(default)]
    version: u64,
}

impl Game {
    /// Builds the initial document for a freshly allocated code. The creator
    /// becomes the sole roster entry and is marked host here, so a created
    /// game always holds exactly one host.
    pub fn new(id: GameCode, name: impl Into<String>, settings: GameSettings, mut host: Player) -> Self {
        host.is_host = true;
        Self {
            id,
            name: name.into(),
            players: vec![host],
            max_players: settings.max_players,
            max_rounds: settings.max_rounds,
            is_private: settings.is_private,
            is_started: false,
            is_finished: false,
            current_question: String::new(),
            current_round: 0,
            questions: Vec::new(),
            winner: None,
            created_at: unix_millis(),
            version: 0,
        }
    }

    // Getters
    pub fn id(&self) -> GameCode {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn max_players(&self) -> u32 {
        self.max_players
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn host(&self) -> Option<&Player> {
        self.players.iter().find(|p| p.is_host)
    }

    pub fn is_full(&self) -> bool {
        self.players.len() as u32 >= self.max_players
    }

    /// True once the lobby can transition out of gathering: every seat is
    /// taken and every player has toggled ready.
    pub fn all_ready(&self) -> bool {
        self.is_full() && self.players.iter().all(|p| p.is_ready)
    }

    //  --- Roster mutators ---

    /// Appends a player to the roster, preserving join order. Joiners are
    /// never hosts; the flag is stripped regardless of what the caller sent.
    #[tracing::instrument(skip(self, player), fields(code = %self.id, player = %player.id))]
    pub fn join(&mut self, mut player: Player) -> Result<(), LobbyError> {
        if self.players.iter().any(|p| p.id == player.id) {
            return Err(LobbyError::AlreadyJoined(player.id));
        }
        if self.is_full() {
            return Err(LobbyError::LobbyFull { max: self.max_players });
        }
        player.is_host = false;
        self.players.push(player);
        Ok(())
    }

    /// Replaces the roster entry whose id matches, keeping its position.
    /// The stored host flag wins over the incoming one: hosting is never
    /// transferred through a profile update.
    ///
    /// Returns false when no entry matches. That is a documented no-op,
    /// not an error.
    #[tracing::instrument(skip(self, player), fields(code = %self.id, player = %player.id))]
    pub fn update_player(&mut self, mut player: Player) -> bool {
        match self.players.iter_mut().find(|p| p.id == player.id) {
            Some(entry) => {
                player.is_host = entry.is_host;
                *entry = player;
                true
            }
            None => {
                tracing::debug!("update for a player not on the roster, ignoring");
                false
            }
        }
    }

    /// Removes the roster entry whose id matches. Returns false when no
    /// entry matches.
    #[tracing::instrument(skip(self), fields(code = %self.id, player = %player_id))]
    pub fn remove_player(&mut self, player_id: PlayerId) -> bool {
        let before = self.players.len();
        self.players.retain(|p| p.id != player_id);
        self.players.len() < before
    }

    /// Store-side hook: marks the next revision of the document when a
    /// mutation is persisted.
    pub(crate) fn bump_version(&mut self) {
        self.version += 1;
    }
}

fn unix_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> GameSettings {
        GameSettings {
            max_players: 4,
            max_rounds: 5,
            is_private: false,
        }
    }

    fn new_game() -> Game {
        Game::new("AB12".parse().unwrap(), "Trivia Night", settings(), Player::new("Ada"))
    }

    #[test]
    fn test_new_game_marks_creator_as_sole_host() {
        let game = new_game();

        assert_eq!(game.players().len(), 1);
        let host = &game.players()[0];
        assert!(host.is_host);
        assert!(!host.is_ready);
        assert_eq!(host.score, 0);
        assert_eq!(game.players().iter().filter(|p| p.is_host).count(), 1);
    }

    #[test]
    fn test_join_preserves_order_without_duplication() {
        let mut game = new_game();
        let bob = Player::new("Bob");

        game.join(bob.clone()).unwrap();

        assert_eq!(game.players().len(), 2);
        assert_eq!(game.players()[0].name, "Ada");
        assert_eq!(game.players()[1].id, bob.id);
    }

    #[test]
    fn test_join_strips_forged_host_flag() {
        let mut game = new_game();
        let mut mallory = Player::new("Mallory");
        mallory.is_host = true;

        game.join(mallory).unwrap();

        assert_eq!(game.players().iter().filter(|p| p.is_host).count(), 1);
        assert_eq!(game.host().map(|p| p.name.as_str()), Some("Ada"));
    }

    #[test]
    fn test_join_rejects_duplicate_id() {
        let mut game = new_game();
        let bob = Player::new("Bob");
        game.join(bob.clone()).unwrap();

        let err = game.join(bob.clone()).unwrap_err();
        assert_eq!(err, LobbyError::AlreadyJoined(bob.id));
        assert_eq!(game.players().len(), 2);
    }

    #[test]
    fn test_join_rejects_full_lobby() {
        let mut game = new_game();
        game.join(Player::new("B")).unwrap();
        game.join(Player::new("C")).unwrap();
        game.join(Player::new("D")).unwrap();

        let err = game.join(Player::new("E")).unwrap_err();
        assert_eq!(err, LobbyError::LobbyFull { max: 4 });
    }

    #[test]
    fn test_update_player_replaces_matching_entry() {
        let mut game = new_game();
        let bob = Player::new("Bob");
        game.join(bob.clone()).unwrap();

        let mut updated = bob.clone();
        updated.is_ready = true;
        updated.name = "Robert".to_string();

        assert!(game.update_player(updated));
        assert_eq!(game.players()[1].name, "Robert");
        assert!(game.players()[1].is_ready);
        // Ada untouched
        assert_eq!(game.players()[0].name, "Ada");
    }

    #[test]
    fn test_update_player_unknown_id_is_a_noop() {
        let mut game = new_game();
        let before = game.players().to_vec();

        assert!(!game.update_player(Player::new("Ghost")));
        assert_eq!(game.players(), &before[..]);
    }

    #[test]
    fn test_update_player_cannot_transfer_host() {
        let mut game = new_game();
        let bob = Player::new("Bob");
        game.join(bob.clone()).unwrap();

        let mut promoted = bob.clone();
        promoted.is_host = true;
        game.update_player(promoted);

        assert!(!game.players()[1].is_host);
        assert!(game.players()[0].is_host);
    }

    #[test]
    fn test_remove_player() {
        let mut game = new_game();
        let bob = Player::new("Bob");
        game.join(bob.clone()).unwrap();

        assert!(game.remove_player(bob.id));
        assert_eq!(game.players().len(), 1);
        assert!(!game.remove_player(bob.id));
    }

    #[test]
    fn test_all_ready_requires_full_and_ready() {
        let mut game = new_game();
        assert!(!game.all_ready());

        for name in ["B", "C", "D"] {
            let mut p = Player::new(name);
            p.is_ready = true;
            game.join(p).unwrap();
        }
        // Full, but the host has not readied up.
        assert!(game.is_full());
        assert!(!game.all_ready());

        let mut host = game.players()[0].clone();
        host.is_ready = true;
        game.update_player(host);
        assert!(game.all_ready());
    }

    #[test]
    fn test_wire_shape_is_camel_case() {
        let game = new_game();
        let json = serde_json::to_value(&game).unwrap();

        assert!(json.get("maxPlayers").is_some());
        assert!(json.get("isPrivate").is_some());
        assert!(json.get("createdAt").is_some());
        assert!(json["players"][0].get("isHost").is_some());
    }
}
