pub mod code;
pub mod domain;
pub mod types;

pub use code::{CodeSource, ThreadRngCodes};
pub use domain::{Game, GameSettings, Player};
pub use types::{GameCode, LobbyError, ParseCodeError, PlayerId};
