//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::util::rate_limit::INBOUND_RATE_LIMIT;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Emit JSON log lines (LOG_FORMAT=json)
    pub log_json: bool,
    /// Directory served for everything that is not an API route
    pub static_dir: PathBuf,
    /// Allowed client origins for CORS (empty = any)
    pub client_origins: Vec<String>,

    /// Peer read timeout; pings go out at 9/10 of this
    pub keepalive_timeout: Duration,
    /// Per-connection outbound queue bound
    pub outbound_queue_size: usize,
    /// Largest inbound WebSocket message accepted, in bytes
    pub max_message_size: usize,
    /// Deadline for a single frame or ping write
    pub write_timeout: Duration,
    /// Max inbound messages per second per connection
    pub inbound_rate_limit: u32,

    /// Room and match tunables
    pub game: GameSettings,
}

/// Tunables handed from the Directory down to every Session and Simulation
#[derive(Clone, Debug)]
pub struct GameSettings {
    pub max_players: usize,
    pub match_duration: Duration,
    pub countdown_secs: u32,
    pub post_match_delay: Duration,
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            max_players: 4,
            match_duration: Duration::from_secs(180),
            countdown_secs: 5,
            post_match_delay: Duration::from_secs(10),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // PORT wins over SERVER_ADDR for platform deployments
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let defaults = GameSettings::default();
        let game = GameSettings {
            max_players: parse_or("MAX_PLAYERS_PER_ROOM", defaults.max_players)?,
            match_duration: Duration::from_secs(parse_or(
                "MATCH_DURATION_SECS",
                defaults.match_duration.as_secs(),
            )?),
            countdown_secs: parse_or("COUNTDOWN_SECS", defaults.countdown_secs)?,
            post_match_delay: Duration::from_secs(parse_or(
                "POST_MATCH_DELAY_SECS",
                defaults.post_match_delay.as_secs(),
            )?),
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_json: env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json")),

            static_dir: env::var("STATIC_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./static")),

            client_origins: env::var("CLIENT_ORIGIN")
                .map(|v| {
                    v.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),

            keepalive_timeout: Duration::from_secs(parse_or("KEEPALIVE_TIMEOUT_SECS", 60)?),
            outbound_queue_size: parse_or("OUTBOUND_QUEUE_SIZE", 256)?,
            max_message_size: parse_or("MAX_MESSAGE_SIZE", 4096)?,
            write_timeout: Duration::from_secs(parse_or("WRITE_TIMEOUT_SECS", 10)?),
            inbound_rate_limit: parse_or("INBOUND_RATE_LIMIT", INBOUND_RATE_LIMIT)?,
            game,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that would panic or stall at runtime
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.game.max_players < 2 {
            return Err(ConfigError::Invalid("MAX_PLAYERS_PER_ROOM"));
        }
        if self.keepalive_timeout.is_zero() {
            return Err(ConfigError::Invalid("KEEPALIVE_TIMEOUT_SECS"));
        }
        if self.outbound_queue_size == 0 {
            return Err(ConfigError::Invalid("OUTBOUND_QUEUE_SIZE"));
        }
        if self.max_message_size == 0 {
            return Err(ConfigError::Invalid("MAX_MESSAGE_SIZE"));
        }
        if self.write_timeout.is_zero() {
            return Err(ConfigError::Invalid("WRITE_TIMEOUT_SECS"));
        }
        if self.inbound_rate_limit == 0 {
            return Err(ConfigError::Invalid("INBOUND_RATE_LIMIT"));
        }
        Ok(())
    }

    /// Interval between keepalive pings, strictly inside the read timeout
    pub fn ping_interval(&self) -> Duration {
        self.keepalive_timeout * 9 / 10
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            log_level: "info".to_string(),
            log_json: false,
            static_dir: PathBuf::from("./static"),
            client_origins: Vec::new(),
            keepalive_timeout: Duration::from_secs(60),
            outbound_queue_size: 256,
            max_message_size: 4096,
            write_timeout: Duration::from_secs(10),
            inbound_rate_limit: INBOUND_RATE_LIMIT,
            game: GameSettings::default(),
        }
    }
}

fn parse_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_interval_is_inside_timeout() {
        let config = Config::default();
        assert_eq!(config.ping_interval(), Duration::from_secs(54));
        assert!(config.ping_interval() < config.keepalive_timeout);
    }

    #[test]
    fn game_defaults() {
        let game = GameSettings::default();
        assert_eq!(game.max_players, 4);
        assert_eq!(game.countdown_secs, 5);
        assert_eq!(game.match_duration, Duration::from_secs(180));
    }

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        tokio_test::assert_ok!(config.validate());
        assert_eq!(config.max_message_size, 4096);
        assert_eq!(config.write_timeout, Duration::from_secs(10));
    }

    #[test]
    fn zero_outbound_queue_is_rejected() {
        let config = Config {
            outbound_queue_size: 0,
            ..Config::default()
        };
        let err = tokio_test::assert_err!(config.validate());
        assert!(matches!(err, ConfigError::Invalid("OUTBOUND_QUEUE_SIZE")));
    }

    #[test]
    fn zero_limits_are_rejected() {
        let cases = [
            (
                Config {
                    keepalive_timeout: Duration::ZERO,
                    ..Config::default()
                },
                "KEEPALIVE_TIMEOUT_SECS",
            ),
            (
                Config {
                    max_message_size: 0,
                    ..Config::default()
                },
                "MAX_MESSAGE_SIZE",
            ),
            (
                Config {
                    write_timeout: Duration::ZERO,
                    ..Config::default()
                },
                "WRITE_TIMEOUT_SECS",
            ),
        ];
        for (config, name) in cases {
            match config.validate() {
                Err(ConfigError::Invalid(field)) => assert_eq!(field, name),
                other => panic!("{name}: expected rejection, got {other:?}"),
            }
        }
    }

    #[test]
    fn parse_or_falls_back_when_unset() {
        let value: u32 = tokio_test::assert_ok!(parse_or("HAMMER_ARENA_TEST_SURELY_UNSET", 7));
        assert_eq!(value, 7);
    }
}
