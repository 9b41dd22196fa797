//! Config schema types (discord, telegram, discovery, poll, delivery, state, seed).
use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use {secrecy::Secret, serde::Deserialize};

/// Bootstrap seed: community name → (channel id → channel name).
pub type SeedMap = BTreeMap<String, BTreeMap<String, String>>;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HeraldConfig {
    pub discord: DiscordConfig,
    pub telegram: TelegramConfig,
    pub discovery: DiscoveryConfig,
    pub poll: PollConfig,
    pub delivery: DeliveryConfig,
    pub state: StateConfig,
    /// Channels that are in scope before any discovery has run.
    pub seed: SeedMap,
}

/// Source side: one gateway connection and one REST client per token.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscordConfig {
    /// Credential tokens. Each one gets its own streaming session.
    pub tokens: Vec<Secret<String>>,
    /// REST base URL, without trailing slash.
    pub api_base: String,
    /// Fixed websocket URL. When unset the URL is fetched from `GET /gateway`.
    pub gateway_url: Option<String>,
    /// Capability bitmask sent in the identify frame.
    pub intents: u64,
    /// Fixed delay between a lost session and the next connect attempt.
    pub reconnect_delay_secs: u64,
    /// How long to wait for the hello frame after the socket opens.
    pub handshake_timeout_secs: u64,
}

impl DiscordConfig {
    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }
}

impl Default for DiscordConfig {
    fn default() -> Self {
        Self {
            tokens: Vec::new(),
            api_base: "https://discord.com/api/v9".into(),
            gateway_url: None,
            intents: 513,
            reconnect_delay_secs: 30,
            handshake_timeout_secs: 30,
        }
    }
}

/// Destination side.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelegramConfig {
    /// Bot token from @BotFather.
    pub token: Secret<String>,
    /// Destination chat. Forum supergroups get one topic per community.
    pub chat_id: String,
    pub api_base: String,
    /// Prefix each forwarded message with its source timestamp.
    pub show_timestamps: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            token: Secret::new(String::new()),
            chat_id: String::new(),
            api_base: "https://api.telegram.org".into(),
            show_timestamps: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub scan_interval_secs: u64,
    /// Channels kept per community by the periodic scan.
    pub scan_channel_limit: usize,
    /// Channels kept per community when a join event arrives.
    pub realtime_channel_limit: usize,
    /// Most-recent messages fetched per channel for a newly found community.
    pub backlog_limit: u32,
    /// Pause between communities during a scan, to spread request volume.
    pub community_delay_ms: u64,
    pub notify_new_communities: bool,
}

impl DiscoveryConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_secs)
    }

    pub fn community_delay(&self) -> Duration {
        Duration::from_millis(self.community_delay_ms)
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 300,
            scan_channel_limit: 5,
            realtime_channel_limit: 3,
            backlog_limit: 5,
            community_delay_ms: 500,
            notify_new_communities: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    pub fetch_limit: u32,
    pub max_channels_per_cycle: usize,
    /// Only messages newer than this are forwarded. Defaults to twice the interval.
    pub recency_secs: Option<u64>,
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn recency(&self) -> Duration {
        Duration::from_secs(
            self.recency_secs
                .unwrap_or_else(|| self.interval_secs.saturating_mul(2)),
        )
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            fetch_limit: 10,
            max_channels_per_cycle: 25,
            recency_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    pub max_attempts: u32,
    pub retry_delay_secs: u64,
    /// Used when a rate-limit reply carries no parseable wait.
    pub rate_limit_default_secs: u64,
    pub chunk_len: usize,
    /// Concurrent outbound jobs.
    pub workers: usize,
    /// Jobs admitted (queued + running) before new ones are rejected.
    pub queue_capacity: usize,
}

impl DeliveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn rate_limit_default(&self) -> Duration {
        Duration::from_secs(self.rate_limit_default_secs)
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 5,
            rate_limit_default_secs: 60,
            chunk_len: 4000,
            workers: 8,
            queue_capacity: 256,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("herald-state.json"),
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret};

    #[test]
    fn defaults_match_documented_values() {
        let cfg = HeraldConfig::default();
        assert_eq!(cfg.discord.intents, 513);
        assert_eq!(cfg.discord.reconnect_delay(), Duration::from_secs(30));
        assert_eq!(cfg.discovery.scan_channel_limit, 5);
        assert_eq!(cfg.discovery.realtime_channel_limit, 3);
        assert_eq!(cfg.delivery.max_attempts, 3);
        assert_eq!(cfg.poll.recency(), Duration::from_secs(120));
        assert!(cfg.seed.is_empty());
    }

    #[test]
    fn deserialize_partial_toml() {
        let raw = r#"
            [discord]
            tokens = ["a", "b"]

            [telegram]
            token = "123:ABC"
            chat_id = "-1002541501551"

            [poll]
            interval_secs = 30
            recency_secs = 45

            [seed."Hugging Face"]
            "1014577787039924226" = "announcements"
        "#;
        let cfg: HeraldConfig = toml::from_str(raw).unwrap();
        assert_eq!(cfg.discord.tokens.len(), 2);
        assert_eq!(cfg.discord.tokens[1].expose_secret(), "b");
        assert_eq!(cfg.telegram.token.expose_secret(), "123:ABC");
        assert_eq!(cfg.poll.recency(), Duration::from_secs(45));
        assert_eq!(
            cfg.seed["Hugging Face"]["1014577787039924226"],
            "announcements"
        );
        // unspecified sections keep defaults
        assert_eq!(cfg.delivery.chunk_len, 4000);
    }

    #[test]
    fn debug_output_redacts_tokens() {
        let raw = r#"{"telegram": {"token": "super-secret"}}"#;
        let cfg: HeraldConfig = serde_json::from_str(raw).unwrap();
        let rendered = format!("{cfg:?}");
        assert!(!rendered.contains("super-secret"));
    }
}
