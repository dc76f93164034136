//! Environment configuration (spec §6.4). Loaded once at startup via
//! `dotenvy` + `std::env`, the way the teacher's `Cargo.toml` (which already
//! depends on `dotenvy`) implies but never actually wires up.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub pubsub_url: String,
    pub database_url: String,
    pub token_shared_secret: String,
    pub token_issuer: Option<String>,
    pub ws_ping_interval: Duration,
    pub ws_idle_timeout: Duration,
    pub ws_send_queue_size: usize,
    pub ws_send_timeout: Duration,
    pub command_retry_max: u32,
    pub match_default_duration_seconds: i64,
    pub metrics_bind_addr: String,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            pubsub_url: require("PUBSUB_URL")?,
            database_url: require("DATABASE_URL")?,
            token_shared_secret: require("TOKEN_SHARED_SECRET")?,
            token_issuer: env::var("TOKEN_ISSUER").ok(),
            ws_ping_interval: Duration::from_secs(parse_default("WS_PING_INTERVAL_SECONDS", 25)?),
            ws_idle_timeout: Duration::from_secs(parse_default("WS_IDLE_TIMEOUT_SECONDS", 90)?),
            ws_send_queue_size: parse_default("WS_SEND_QUEUE_SIZE", 256)? as usize,
            ws_send_timeout: Duration::from_millis(parse_default("WS_SEND_TIMEOUT_MS", 2000)?),
            command_retry_max: parse_default("COMMAND_RETRY_MAX", 3)? as u32,
            match_default_duration_seconds: parse_default("MATCH_DEFAULT_DURATION_SECONDS", 300)?,
            metrics_bind_addr: env::var("METRICS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:9090".to_string()),
        })
    }
}

fn require(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("missing required environment variable: {key}"))
}

fn parse_default(key: &str, default: i64) -> anyhow::Result<i64> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("environment variable {key} is not a valid integer: {raw}")),
        Err(_) => Ok(default),
    }
}
