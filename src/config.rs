use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub redis_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

/// Tuning knobs for the session controller.
#[derive(Debug, Clone, Deserialize)]
pub struct LobbyConfig {
    /// Cap on room-code allocation attempts before giving up with a
    /// deterministic failure.
    pub code_attempts: u32,
    /// How many times a roster compare-and-swap is retried after losing a
    /// race before the conflict is surfaced to the caller.
    pub write_retries: u32,
    /// Expiry on stored game documents. Abandoned lobbies age out instead
    /// of squatting on their code.
    pub game_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub lobby: LobbyConfig,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let env = env::var("RUN_ENV").unwrap_or_else(|_| "local".into());

        let builder = ::config::Config::builder()
            .add_source(config::File::with_name("config/default.toml"))
            .add_source(
                config::File::with_name(&format!("config/{}", env))
                    .required(false),
            )
            .add_source(config::File::with_name("config/local.toml").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        builder.build()?.try_deserialize()
    }
}
