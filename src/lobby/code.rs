use super::types::{GameCode, CODE_ALPHABET, CODE_LEN};

/// Source of candidate room codes. The controller draws from this when
/// allocating a code for a new game; tests substitute scripted sequences.
pub trait CodeSource {
    fn next_code(&mut self) -> GameCode;
}

/// Uniform independent draws from the code alphabet. Holds no rng of its
/// own (`ThreadRng` is not `Send`, and the controller is shared across
/// tasks); each call borrows the thread-local generator.
pub struct ThreadRngCodes;

impl ThreadRngCodes {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ThreadRngCodes {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeSource for ThreadRngCodes {
    fn next_code(&mut self) -> GameCode {
        use rand::Rng;
        let mut rng = rand::rng();
        let mut raw = [0u8; CODE_LEN];
        for slot in &mut raw {
            *slot = CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())];
        }
        GameCode::from_raw(raw)
    }
}
