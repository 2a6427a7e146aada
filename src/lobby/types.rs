use std::fmt::{self, Display};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)] // Serialize directly as the inner UUID string
pub struct PlayerId(Uuid);

impl PlayerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PlayerId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Number of characters in a room code.
pub const CODE_LEN: usize = 4;

/// The symbols a room code is drawn from: uppercase letters and digits.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// A 4-character room code, the document key for one game session.
///
/// Lowercase input is accepted when parsing (players type codes by hand)
/// and normalized to uppercase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GameCode([u8; CODE_LEN]);

impl GameCode {
    pub(crate) const fn from_raw(bytes: [u8; CODE_LEN]) -> Self {
        Self(bytes)
    }
}

impl Display for GameCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{}", b as char)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid room code {0:?}: expected {CODE_LEN} characters A-Z or 0-9")]
pub struct ParseCodeError(pub String);

impl FromStr for GameCode {
    type Err = ParseCodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        let bytes = upper.as_bytes();
        if bytes.len() != CODE_LEN || !bytes.iter().all(|b| CODE_ALPHABET.contains(b)) {
            return Err(ParseCodeError(s.to_string()));
        }
        let mut raw = [0u8; CODE_LEN];
        raw.copy_from_slice(bytes);
        Ok(Self(raw))
    }
}

impl Serialize for GameCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for GameCode {
    fn deserialize<D>(deserializer: D) -> Result<GameCode, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        GameCode::from_str(&s).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LobbyError {
    #[error("lobby is full ({max} players)")]
    LobbyFull { max: u32 },

    #[error("player {0} is already in the lobby")]
    AlreadyJoined(PlayerId),
}
