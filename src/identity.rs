//! Per-client durable player identity.
//!
//! One JSON slot per installation, independent of any game document. The
//! roster entry inside a game is a copy of this and the two can drift; the
//! cache is the client's own record, not a conflict-resolution mechanism.

use std::fs;
use std::path::PathBuf;

use directories::ProjectDirs;
use thiserror::Error;

use crate::lobby::Player;

const IDENTITY_FILE: &str = "player.json";

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("could not determine a data directory for this platform")]
    NoDataDirectory,

    #[error("identity io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("identity serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable slot holding the local player's record.
///
/// `open` loads a previously saved identity if one exists; until something
/// is loaded or set, the cache reports itself as still loading.
pub struct IdentityCache {
    path: PathBuf,
    player: Option<Player>,
    loaded: bool,
}

impl IdentityCache {
    /// Opens the cache in the OS data directory
    /// (e.g. `~/.local/share/parlor/player.json` on Linux).
    pub fn open() -> Result<Self, IdentityError> {
        let dirs = ProjectDirs::from("", "", "parlor").ok_or(IdentityError::NoDataDirectory)?;
        let dir = dirs.data_dir().to_path_buf();
        fs::create_dir_all(&dir)?;
        Self::at(dir.join(IDENTITY_FILE))
    }

    /// Opens the cache at an explicit path. Used by tests and useful for
    /// running several clients on one machine.
    pub fn at(path: PathBuf) -> Result<Self, IdentityError> {
        let mut cache = Self {
            path,
            player: None,
            loaded: false,
        };
        cache.load()?;
        Ok(cache)
    }

    fn load(&mut self) -> Result<(), IdentityError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                self.player = Some(serde_json::from_str(&raw)?);
                self.loaded = true;
                tracing::debug!(path = %self.path.display(), "loaded cached identity");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn player(&self) -> Option<&Player> {
        self.player.as_ref()
    }

    /// True until a saved identity has been loaded or one has been set.
    pub fn is_loading(&self) -> bool {
        !self.loaded
    }

    /// Overwrites the durable copy and publishes the new identity
    /// synchronously.
    pub fn set_player(&mut self, player: Player) -> Result<(), IdentityError> {
        fs::write(&self.path, serde_json::to_string(&player)?)?;
        self.player = Some(player);
        self.loaded = true;
        Ok(())
    }

    /// Safeguard for a partially initialized state: if an identity lives in
    /// memory but not on disk, persist it. No-op otherwise.
    pub fn ensure_persisted(&self) -> Result<(), IdentityError> {
        if let Some(player) = &self.player {
            if !self.path.exists() {
                fs::write(&self.path, serde_json::to_string(player)?)?;
            }
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<(), IdentityError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        self.player = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join(IDENTITY_FILE)
    }

    #[test]
    fn test_fresh_cache_is_loading() {
        let dir = tempfile::tempdir().unwrap();
        let cache = IdentityCache::at(cache_path(&dir)).unwrap();

        assert!(cache.is_loading());
        assert!(cache.player().is_none());
    }

    #[test]
    fn test_set_player_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);

        let mut player = Player::new("Ada");
        player.is_ready = true;
        player.score = 7;

        let mut cache = IdentityCache::at(path.clone()).unwrap();
        cache.set_player(player.clone()).unwrap();
        assert!(!cache.is_loading());

        // Simulated page reload.
        let reopened = IdentityCache::at(path).unwrap();
        assert!(!reopened.is_loading());
        assert_eq!(reopened.player(), Some(&player));
    }

    #[test]
    fn test_set_player_overwrites_previous_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);

        let mut cache = IdentityCache::at(path.clone()).unwrap();
        cache.set_player(Player::new("Ada")).unwrap();
        let bob = Player::new("Bob");
        cache.set_player(bob.clone()).unwrap();

        let reopened = IdentityCache::at(path).unwrap();
        assert_eq!(reopened.player(), Some(&bob));
    }

    #[test]
    fn test_ensure_persisted_backfills_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);

        let mut cache = IdentityCache::at(path.clone()).unwrap();
        cache.set_player(Player::new("Ada")).unwrap();

        // The durable copy vanished underneath us.
        fs::remove_file(&path).unwrap();
        cache.ensure_persisted().unwrap();
        assert!(path.exists());

        // And with the file present it does not rewrite anything.
        cache.ensure_persisted().unwrap();
    }

    #[test]
    fn test_clear_removes_identity() {
        let dir = tempfile::tempdir().unwrap();
        let path = cache_path(&dir);

        let mut cache = IdentityCache::at(path.clone()).unwrap();
        cache.set_player(Player::new("Ada")).unwrap();
        cache.clear().unwrap();

        assert!(cache.player().is_none());
        assert!(!path.exists());

        // Clearing an already-empty cache is fine.
        cache.clear().unwrap();
    }
}
