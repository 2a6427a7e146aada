use std::collections::HashMap;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::instrument;

use crate::error::AppError;
use crate::lobby::{Game, GameCode, Player, PlayerId};
use crate::session::Route;

// --- DTOs (Data Transfer Objects) ---

/// Player identity as submitted by a form. Ids are client-generated and
/// survive reloads via the identity cache; a missing id means a brand-new
/// player.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerForm {
    #[serde(default)]
    pub id: Option<PlayerId>,
    pub name: String,
}

impl PlayerForm {
    pub fn into_player(self) -> Player {
        let mut player = Player::new(self.name);
        if let Some(id) = self.id {
            player.id = id;
        }
        player
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    pub name: String,
    pub max_players: u32,
    pub max_rounds: u32,
    #[serde(default)]
    pub is_private: bool,
    pub player: PlayerForm,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameResponse {
    pub game: Game,
    pub route: Route,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameRequest {
    pub player: PlayerForm,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinGameResponse {
    pub game: Game,
    pub route: Route,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePlayerRequest {
    pub player: Player,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveGameRequest {
    pub player_id: PlayerId,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveGameResponse {
    pub route: Route,
}

// --- WebSocket messages ---

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServerMessage {
    /// Full current document, delivered on subscribe and after every write.
    Snapshot(Game),
    Error { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClientMessage {
    /// Replace the caller's roster entry (ready toggle, rename, authored
    /// questions).
    UpdatePlayer(Player),
    Leave { player_id: PlayerId },
}

// --- Store contract ---

/// The shared game document collection, keyed by room code.
///
/// `create` fails if the key already exists: that is the backstop for the
/// check-then-act race in code allocation. `put` is a compare-and-swap on
/// the document's version token, so concurrent roster writers lose cleanly
/// instead of silently clobbering each other.
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn exists(&self, code: GameCode) -> Result<bool, AppError>;

    async fn get(&self, code: GameCode) -> Result<Game, AppError>;

    async fn create(&self, game: &Game) -> Result<(), AppError>;

    /// Persists a mutated document. `game` still carries the version it was
    /// read at; the write succeeds only if the stored document does too, and
    /// the persisted revision (version bumped) is returned.
    async fn put(&self, game: &Game) -> Result<Game, AppError>;

    /// Removes the document. With `expected_version` set the removal is
    /// guarded like `put`: a document that moved on since the caller read
    /// it stays put and the call fails with `Conflict`.
    async fn delete(&self, code: GameCode, expected_version: Option<u64>) -> Result<(), AppError>;

    /// Live snapshot feed for one code. Every successful write publishes
    /// the post-write document; dropping the receiver unsubscribes. The
    /// initial current-value delivery is the subscriber's job (read after
    /// subscribing), so no write slips between the two.
    async fn subscribe(&self, code: GameCode) -> broadcast::Receiver<Game>;
}

/// Per-code broadcast channels fanning full snapshots out to subscribers.
/// Receivers that fall behind see `Lagged` and pick up from the latest
/// snapshot, which matches the coalescing the contract allows.
#[derive(Debug, Default)]
pub struct SnapshotHub {
    channels: RwLock<HashMap<GameCode, broadcast::Sender<Game>>>,
}

const SNAPSHOT_BUFFER: usize = 32;

impl SnapshotHub {
    pub async fn subscribe(&self, code: GameCode) -> broadcast::Receiver<Game> {
        let mut channels = self.channels.write().await;
        channels
            .entry(code)
            .or_insert_with(|| broadcast::channel(SNAPSHOT_BUFFER).0)
            .subscribe()
    }

    pub async fn publish(&self, game: &Game) {
        let mut channels = self.channels.write().await;
        if let Some(tx) = channels.get(&game.id()) {
            // A send error means every receiver is gone; drop the idle
            // channel instead of keeping it around for a game nobody is
            // watching anymore.
            if tx.send(game.clone()).is_err() {
                channels.remove(&game.id());
            }
        }
    }

    /// Drops the channel for `code` if nothing is listening. Called on
    /// not-found reads, where a subscriber raced a document that never
    /// existed or already expired.
    pub async fn prune(&self, code: GameCode) {
        let mut channels = self.channels.write().await;
        if let Some(tx) = channels.get(&code) {
            if tx.receiver_count() == 0 {
                channels.remove(&code);
            }
        }
    }

    /// Tears down the channel for a deleted game so late subscribers see a
    /// closed feed rather than silence.
    pub async fn close(&self, code: GameCode) {
        self.channels.write().await.remove(&code);
    }

    #[cfg(test)]
    pub(crate) async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

// --- Redis implementation ---

/// Lua compare-and-swap on the document version. The replacement bytes are
/// serialized in Rust and written verbatim: cjson cannot re-encode a decoded
/// document faithfully (empty arrays come back as objects), so the script
/// only decodes the stored copy to read its version. KEEPTTL preserves the
/// document expiry across writes.
const CAS_PUT_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return false
end
if cjson.decode(raw)['version'] ~= tonumber(ARGV[1]) then
  return 'conflict'
end
redis.call('SET', KEYS[1], ARGV[2], 'KEEPTTL')
return 'ok'
"#;

/// Version-guarded delete, for the last-player-out teardown: a joiner that
/// slipped in after the leaver's read bumps the version, and the delete
/// backs off instead of destroying their lobby.
const CAS_DELETE_SCRIPT: &str = r#"
local raw = redis.call('GET', KEYS[1])
if not raw then
  return false
end
if cjson.decode(raw)['version'] ~= tonumber(ARGV[1]) then
  return 'conflict'
end
redis.call('DEL', KEYS[1])
return 'ok'
"#;

pub struct RedisStore {
    client: redis::Client,
    cas_put: redis::Script,
    cas_delete: redis::Script,
    hub: SnapshotHub,
    ttl_secs: u64,
}

impl RedisStore {
    pub fn new(client: redis::Client, ttl_secs: u64) -> Self {
        Self {
            client,
            cas_put: redis::Script::new(CAS_PUT_SCRIPT),
            cas_delete: redis::Script::new(CAS_DELETE_SCRIPT),
            hub: SnapshotHub::default(),
            ttl_secs,
        }
    }

    fn key(code: GameCode) -> String {
        format!("game:{}", code)
    }

    async fn conn(&self) -> Result<redis::aio::MultiplexedConnection, AppError> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// The CAS write against an explicit connection, so tests can drive it
    /// over a mock.
    async fn put_with_conn<C>(&self, conn: &mut C, game: &Game) -> Result<Game, AppError>
    where
        C: redis::aio::ConnectionLike + Send,
    {
        let mut next = game.clone();
        next.bump_version();
        let raw = serde_json::to_string(&next)?;

        let result: Option<String> = self
            .cas_put
            .key(Self::key(game.id()))
            .arg(game.version())
            .arg(&raw)
            .invoke_async(conn)
            .await?;

        match result.as_deref() {
            None => Err(AppError::GameNotFound(game.id())),
            Some("conflict") => Err(AppError::Conflict(game.id())),
            Some(_) => {
                self.hub.publish(&next).await;
                Ok(next)
            }
        }
    }
}

#[async_trait]
impl GameStore for RedisStore {
    #[instrument(skip(self))]
    async fn exists(&self, code: GameCode) -> Result<bool, AppError> {
        let mut conn = self.conn().await?;
        Ok(conn.exists(Self::key(code)).await?)
    }

    #[instrument(skip(self))]
    async fn get(&self, code: GameCode) -> Result<Game, AppError> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.get(Self::key(code)).await?;
        match raw {
            Some(raw) => Ok(serde_json::from_str(&raw)?),
            None => {
                // Expired or never created; a stale snapshot channel for
                // this code serves nobody.
                self.hub.prune(code).await;
                Err(AppError::GameNotFound(code))
            }
        }
    }

    #[instrument(skip_all, fields(code = %game.id()))]
    async fn create(&self, game: &Game) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        let raw = serde_json::to_string(game)?;

        // SET NX: fail if a concurrent create claimed the code first.
        let written: Option<String> = redis::cmd("SET")
            .arg(Self::key(game.id()))
            .arg(raw)
            .arg("NX")
            .arg("EX")
            .arg(self.ttl_secs)
            .query_async(&mut conn)
            .await?;

        if written.is_none() {
            return Err(AppError::Conflict(game.id()));
        }
        self.hub.publish(game).await;
        Ok(())
    }

    #[instrument(skip_all, fields(code = %game.id()))]
    async fn put(&self, game: &Game) -> Result<Game, AppError> {
        let mut conn = self.conn().await?;
        self.put_with_conn(&mut conn, game).await
    }

    #[instrument(skip(self))]
    async fn delete(&self, code: GameCode, expected_version: Option<u64>) -> Result<(), AppError> {
        let mut conn = self.conn().await?;
        match expected_version {
            Some(expected) => {
                let result: Option<String> = self
                    .cas_delete
                    .key(Self::key(code))
                    .arg(expected)
                    .invoke_async(&mut conn)
                    .await?;
                match result.as_deref() {
                    None => return Err(AppError::GameNotFound(code)),
                    Some("conflict") => return Err(AppError::Conflict(code)),
                    Some(_) => {}
                }
            }
            None => {
                let removed: i64 = conn.del(Self::key(code)).await?;
                if removed == 0 {
                    return Err(AppError::GameNotFound(code));
                }
            }
        }
        self.hub.close(code).await;
        Ok(())
    }

    async fn subscribe(&self, code: GameCode) -> broadcast::Receiver<Game> {
        self.hub.subscribe(code).await
    }
}

// --- In-memory implementation ---

/// Same contract as `RedisStore`, backed by a map. Used throughout the
/// tests and handy for storeless local runs.
#[derive(Default)]
pub struct MemoryStore {
    games: RwLock<HashMap<GameCode, Game>>,
    hub: SnapshotHub,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GameStore for MemoryStore {
    async fn exists(&self, code: GameCode) -> Result<bool, AppError> {
        Ok(self.games.read().await.contains_key(&code))
    }

    async fn get(&self, code: GameCode) -> Result<Game, AppError> {
        let found = self.games.read().await.get(&code).cloned();
        match found {
            Some(game) => Ok(game),
            None => {
                self.hub.prune(code).await;
                Err(AppError::GameNotFound(code))
            }
        }
    }

    async fn create(&self, game: &Game) -> Result<(), AppError> {
        let mut games = self.games.write().await;
        if games.contains_key(&game.id()) {
            return Err(AppError::Conflict(game.id()));
        }
        games.insert(game.id(), game.clone());
        drop(games);
        self.hub.publish(game).await;
        Ok(())
    }

    async fn put(&self, game: &Game) -> Result<Game, AppError> {
        let mut games = self.games.write().await;
        let stored = games
            .get_mut(&game.id())
            .ok_or(AppError::GameNotFound(game.id()))?;
        if stored.version() != game.version() {
            return Err(AppError::Conflict(game.id()));
        }
        let mut next = game.clone();
        next.bump_version();
        *stored = next.clone();
        drop(games);
        self.hub.publish(&next).await;
        Ok(next)
    }

    async fn delete(&self, code: GameCode, expected_version: Option<u64>) -> Result<(), AppError> {
        let mut games = self.games.write().await;
        let stored = games.get(&code).ok_or(AppError::GameNotFound(code))?;
        if let Some(expected) = expected_version {
            if stored.version() != expected {
                return Err(AppError::Conflict(code));
            }
        }
        games.remove(&code);
        drop(games);
        self.hub.close(code).await;
        Ok(())
    }

    async fn subscribe(&self, code: GameCode) -> broadcast::Receiver<Game> {
        self.hub.subscribe(code).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lobby::GameSettings;

    fn settings() -> GameSettings {
        GameSettings {
            max_players: 4,
            max_rounds: 3,
            is_private: false,
        }
    }

    fn game(code: &str) -> Game {
        Game::new(code.parse().unwrap(), "Test", settings(), Player::new("Ada"))
    }

    #[tokio::test]
    async fn test_get_absent_key_is_not_found_every_time() {
        let store = MemoryStore::new();
        let code: GameCode = "ZZZZ".parse().unwrap();

        for _ in 0..3 {
            let err = store.get(code).await.unwrap_err();
            assert!(matches!(err, AppError::GameNotFound(c) if c == code));
        }
    }

    #[tokio::test]
    async fn test_create_fails_if_code_taken() {
        let store = MemoryStore::new();
        let first = game("AB12");
        store.create(&first).await.unwrap();

        let racer = game("AB12");
        let err = store.create(&racer).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        // The original document survived.
        let stored = store.get(first.id()).await.unwrap();
        assert_eq!(stored.players()[0].id, first.players()[0].id);
    }

    #[tokio::test]
    async fn test_put_bumps_version() {
        let store = MemoryStore::new();
        let g = game("AB12");
        store.create(&g).await.unwrap();

        let mut joined = g.clone();
        joined.join(Player::new("Bob")).unwrap();

        let updated = store.put(&joined).await.unwrap();
        assert_eq!(updated.version(), 1);
        assert_eq!(updated.players().len(), 2);
    }

    #[tokio::test]
    async fn test_put_rejects_stale_version() {
        let store = MemoryStore::new();
        let g = game("AB12");
        store.create(&g).await.unwrap();

        let mut joined = g.clone();
        joined.join(Player::new("Bob")).unwrap();
        store.put(&joined).await.unwrap();

        // Second writer still holds the version-0 read.
        let err = store.put(&joined).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_put_on_absent_key_is_not_found() {
        let store = MemoryStore::new();
        let err = store.put(&game("ZZZZ")).await.unwrap_err();
        assert!(matches!(err, AppError::GameNotFound(_)));
    }

    #[tokio::test]
    async fn test_guarded_delete_rejects_moved_document() {
        let store = MemoryStore::new();
        let g = game("AB12");
        store.create(&g).await.unwrap();

        let mut joined = g.clone();
        joined.join(Player::new("Bob")).unwrap();
        store.put(&joined).await.unwrap();

        // Deleter still holds the version-0 read; Bob's lobby survives.
        let err = store.delete(g.id(), Some(0)).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
        assert!(store.exists(g.id()).await.unwrap());

        store.delete(g.id(), Some(1)).await.unwrap();
        assert!(!store.exists(g.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_subscribe_receives_every_write() {
        let store = MemoryStore::new();
        let g = game("AB12");
        let mut rx = store.subscribe(g.id()).await;

        store.create(&g).await.unwrap();
        let snap = rx.recv().await.unwrap();
        assert_eq!(snap.players().len(), 1);

        let mut joined = g.clone();
        joined.join(Player::new("Bob")).unwrap();
        store.put(&joined).await.unwrap();

        let snap = rx.recv().await.unwrap();
        assert_eq!(snap.players().len(), 2);
        assert_eq!(snap.version(), 1);
    }

    #[tokio::test]
    async fn test_delete_removes_document_and_closes_feed() {
        let store = MemoryStore::new();
        let g = game("AB12");
        store.create(&g).await.unwrap();
        let mut rx = store.subscribe(g.id()).await;

        store.delete(g.id(), None).await.unwrap();

        let err = store.get(g.id()).await.unwrap_err();
        assert!(matches!(err, AppError::GameNotFound(_)));

        let err = store.delete(g.id(), None).await.unwrap_err();
        assert!(matches!(err, AppError::GameNotFound(_)));

        // The snapshot feed is closed, not silently dangling.
        assert!(matches!(
            rx.recv().await,
            Err(broadcast::error::RecvError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_not_found_read_prunes_abandoned_channel() {
        let store = MemoryStore::new();
        let code: GameCode = "ZZZZ".parse().unwrap();

        let rx = store.subscribe(code).await;
        drop(rx);
        assert!(store.get(code).await.is_err());
        assert_eq!(store.hub.channel_count().await, 0);

        // A live subscriber keeps the channel.
        let _rx = store.subscribe(code).await;
        assert!(store.get(code).await.is_err());
        assert_eq!(store.hub.channel_count().await, 1);
    }

    #[tokio::test]
    async fn test_publish_drops_channel_when_last_receiver_gone() {
        let store = MemoryStore::new();
        let g = game("AB12");
        store.create(&g).await.unwrap();

        let rx = store.subscribe(g.id()).await;
        drop(rx);

        let mut joined = g.clone();
        joined.join(Player::new("Bob")).unwrap();
        store.put(&joined).await.unwrap();
        assert_eq!(store.hub.channel_count().await, 0);
    }

    fn redis_store() -> RedisStore {
        // The client never connects; the mock connection carries the traffic.
        let client = redis::Client::open("redis://127.0.0.1:6379/").unwrap();
        RedisStore::new(client, 3600)
    }

    /// The EVALSHA invocation `put_with_conn` issues for `game`, with the
    /// exact replacement bytes it sends.
    fn expected_cas_put(store: &RedisStore, game: &Game) -> (redis::Cmd, String) {
        let mut next = game.clone();
        next.bump_version();
        let raw = serde_json::to_string(&next).unwrap();

        let mut cmd = redis::cmd("EVALSHA");
        cmd.arg(store.cas_put.get_hash())
            .arg(1)
            .arg(RedisStore::key(game.id()))
            .arg(game.version())
            .arg(&raw);
        (cmd, raw)
    }

    #[tokio::test]
    async fn test_redis_put_sends_rust_serialized_replacement() {
        use redis_test::{MockCmd, MockRedisConnection};

        let store = redis_store();
        let g = game("AB12");
        let (cmd, raw) = expected_cas_put(&store, &g);

        // The replacement keeps empty question pools as JSON arrays, so a
        // later read parses. Round-tripping the document through Lua's
        // cjson instead would re-encode them as objects.
        assert!(raw.contains("\"questions\":[]"));
        let reread: Game = serde_json::from_str(&raw).unwrap();
        assert_eq!(reread.version(), 1);
        assert!(reread.players()[0].questions.is_empty());

        let mut conn = MockRedisConnection::new(vec![MockCmd::new(cmd, Ok("ok"))]);
        let updated = store.put_with_conn(&mut conn, &g).await.unwrap();
        assert_eq!(updated.version(), 1);
    }

    #[tokio::test]
    async fn test_redis_put_maps_conflict_and_missing_replies() {
        use redis_test::{MockCmd, MockRedisConnection};

        let store = redis_store();
        let g = game("AB12");

        let (cmd, _) = expected_cas_put(&store, &g);
        let mut conn = MockRedisConnection::new(vec![MockCmd::new(cmd, Ok("conflict"))]);
        let err = store.put_with_conn(&mut conn, &g).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let (cmd, _) = expected_cas_put(&store, &g);
        let mut conn = MockRedisConnection::new(vec![MockCmd::new(cmd, Ok(redis::Value::Nil))]);
        let err = store.put_with_conn(&mut conn, &g).await.unwrap_err();
        assert!(matches!(err, AppError::GameNotFound(_)));
    }

    #[tokio::test]
    async fn test_player_form_keeps_client_generated_id() {
        let id = PlayerId::new();
        let form = PlayerForm {
            id: Some(id),
            name: "Ada".to_string(),
        };
        assert_eq!(form.into_player().id, id);

        let fresh = PlayerForm {
            id: None,
            name: "Bob".to_string(),
        };
        let player = fresh.into_player();
        assert_eq!(player.score, 0);
        assert!(!player.is_ready);
    }
}
