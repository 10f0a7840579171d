//! Client configuration, from code or from environment variables.

use std::time::Duration;

use hearth_shared::{ConnectionProperties, Intents, PresenceUpdate, GATEWAY_VERSION};
use rand::Rng;

use crate::error::ClientError;

pub const DEFAULT_API_URL: &str = "https://discord.com/api/v10";

pub fn default_gateway_url() -> String {
    format!("wss://gateway.discord.gg/?v={GATEWAY_VERSION}&encoding=json")
}

/// Configuration for auto-reconnect behavior.
///
/// Attempts are unbounded; only an explicit close or a fatal close code
/// stops the session from reconnecting.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay in milliseconds
    pub initial_delay_ms: u32,
    /// Maximum delay in milliseconds
    pub max_delay_ms: u32,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f32,
    /// Fraction of the delay that is randomized (0.0 = none, 1.0 = full)
    pub jitter: f32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            max_delay_ms: 60_000,
            backoff_multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

impl ReconnectConfig {
    /// Calculate the capped delay for a given attempt number (0-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> u32 {
        let exponent = attempt.min(32) as i32;
        let delay = self.initial_delay_ms as f32 * self.backoff_multiplier.powi(exponent);
        (delay as u32).min(self.max_delay_ms)
    }

    /// Delay for `attempt` with the configured share of it randomized away.
    pub fn jittered_delay(&self, attempt: u32, rng: &mut impl Rng) -> Duration {
        let delay = self.delay_for_attempt(attempt) as f32;
        let jitter = self.jitter.clamp(0.0, 1.0);
        let fixed = delay * (1.0 - jitter);
        let random = if jitter > 0.0 {
            rng.gen_range(0.0..=delay * jitter)
        } else {
            0.0
        };
        Duration::from_millis((fixed + random) as u64)
    }
}

/// Liveness and startup timing.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Consecutive unacknowledged heartbeats before the connection is
    /// considered dead.
    pub max_missed_acks: u32,
    /// How long to wait for HELLO after the transport opens.
    pub hello_timeout: Duration,
    /// How long to wait for unavailable guilds from READY to stream in.
    pub guild_ready_timeout: Duration,
    /// Bounds of the random pause before re-identifying after an invalid
    /// session.
    pub invalid_session_delay: (Duration, Duration),
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            max_missed_acks: 2,
            hello_timeout: Duration::from_secs(20),
            guild_ready_timeout: Duration::from_secs(2),
            invalid_session_delay: (Duration::from_secs(1), Duration::from_secs(5)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub token: String,
    pub gateway_url: String,
    pub api_url: String,
    pub shard_id: u32,
    pub shard_count: u32,
    pub intents: Intents,
    /// Guilds above this member count only send online members.
    pub large_threshold: u8,
    pub properties: ConnectionProperties,
    /// Presence sent along with IDENTIFY.
    pub initial_presence: Option<PresenceUpdate>,
    pub reconnect: ReconnectConfig,
    pub heartbeat: HeartbeatConfig,
}

impl ClientConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            gateway_url: default_gateway_url(),
            api_url: DEFAULT_API_URL.to_string(),
            shard_id: 0,
            shard_count: 1,
            intents: Intents::default(),
            large_threshold: 250,
            properties: ConnectionProperties::default(),
            initial_presence: None,
            reconnect: ReconnectConfig::default(),
            heartbeat: HeartbeatConfig::default(),
        }
    }

    /// Read configuration from environment variables.
    ///
    /// Environment variables:
    /// - `HEARTH_TOKEN`: bot token (required)
    /// - `HEARTH_GATEWAY_URL`: gateway endpoint (default: the public gateway)
    /// - `HEARTH_API_URL`: REST base URL (default: `https://discord.com/api/v10`)
    /// - `HEARTH_SHARD_ID` / `HEARTH_SHARD_COUNT`: sharding (default: 0 / 1)
    /// - `HEARTH_INTENTS`: intent bits as a decimal number
    pub fn from_env() -> Result<Self, ClientError> {
        let token = std::env::var("HEARTH_TOKEN")
            .map_err(|_| ClientError::Config("HEARTH_TOKEN is not set".to_string()))?;
        let mut config = Self::new(token);

        if let Ok(url) = std::env::var("HEARTH_GATEWAY_URL") {
            config.gateway_url = url;
        }
        if let Ok(url) = std::env::var("HEARTH_API_URL") {
            config.api_url = url;
        }
        if let Some(id) = parse_env("HEARTH_SHARD_ID")? {
            config.shard_id = id;
        }
        if let Some(count) = parse_env("HEARTH_SHARD_COUNT")? {
            config.shard_count = count;
        }
        if let Some(bits) = parse_env("HEARTH_INTENTS")? {
            config.intents = Intents::from_bits_retain(bits);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn with_gateway_url(mut self, url: impl Into<String>) -> Self {
        self.gateway_url = url.into();
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn with_shard(mut self, shard_id: u32, shard_count: u32) -> Self {
        self.shard_id = shard_id;
        self.shard_count = shard_count;
        self
    }

    pub fn with_intents(mut self, intents: Intents) -> Self {
        self.intents = intents;
        self
    }

    pub fn with_initial_presence(mut self, presence: PresenceUpdate) -> Self {
        self.initial_presence = Some(presence);
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if self.token.trim().is_empty() {
            return Err(ClientError::Config("token is empty".to_string()));
        }
        if self.shard_count == 0 || self.shard_id >= self.shard_count {
            return Err(ClientError::Config(format!(
                "shard {} is out of range for {} shards",
                self.shard_id, self.shard_count
            )));
        }
        if self.heartbeat.max_missed_acks == 0 {
            return Err(ClientError::Config(
                "max_missed_acks must be at least 1".to_string(),
            ));
        }
        url::Url::parse(&self.gateway_url)
            .map_err(|e| ClientError::Config(format!("gateway url: {e}")))?;
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ClientError> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ClientError::Config(format!("{key} is not a valid number: {raw}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn backoff_grows_and_caps() {
        let config = ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            jitter: 0.0,
        };
        assert_eq!(config.delay_for_attempt(0), 100);
        assert_eq!(config.delay_for_attempt(1), 200);
        assert_eq!(config.delay_for_attempt(3), 800);
        assert_eq!(config.delay_for_attempt(4), 1000);
        assert_eq!(config.delay_for_attempt(500), 1000);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let config = ReconnectConfig {
            initial_delay_ms: 1000,
            max_delay_ms: 1000,
            backoff_multiplier: 2.0,
            jitter: 0.5,
        };
        let mut rng = StdRng::seed_from_u64(7);
        for attempt in 0..50 {
            let delay = config.jittered_delay(attempt, &mut rng);
            assert!(delay >= Duration::from_millis(500), "{delay:?}");
            assert!(delay <= Duration::from_millis(1000), "{delay:?}");
        }
    }

    #[test]
    fn validate_rejects_bad_shards() {
        let config = ClientConfig::new("token").with_shard(2, 2);
        assert!(matches!(config.validate(), Err(ClientError::Config(_))));
        assert!(ClientConfig::new("token").with_shard(1, 2).validate().is_ok());
    }

    #[test]
    fn validate_rejects_empty_token() {
        assert!(ClientConfig::new("  ").validate().is_err());
    }
}
