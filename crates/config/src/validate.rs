//! Semantic checks on a loaded [`HeraldConfig`].
//!
//! Parsing already rejects malformed files; this catches configurations that
//! parse fine but cannot run (no credentials, zero intervals, and so on).

use {secrecy::ExposeSecret, std::fmt};

use crate::schema::HeraldConfig;

/// Telegram rejects messages longer than this many characters.
const TELEGRAM_TEXT_LIMIT: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

/// A single finding, addressed by dotted path (e.g. `poll.interval_secs`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    pub path: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.severity, self.path, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
}

impl ValidationResult {
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    fn push(&mut self, severity: Severity, path: &str, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity,
            path: path.to_string(),
            message: message.into(),
        });
    }

    fn error(&mut self, path: &str, message: impl Into<String>) {
        self.push(Severity::Error, path, message);
    }

    fn warn(&mut self, path: &str, message: impl Into<String>) {
        self.push(Severity::Warning, path, message);
    }
}

/// Validate a fully loaded config (file values plus environment overrides).
#[must_use]
pub fn validate(config: &HeraldConfig) -> ValidationResult {
    let mut result = ValidationResult::default();

    if config.discord.tokens.is_empty() {
        result.error(
            "discord.tokens",
            "no credentials configured (set DISCORD_AUTH_TOKENS)",
        );
    }
    for (i, token) in config.discord.tokens.iter().enumerate() {
        if token.expose_secret().contains("${") {
            result.error(
                &format!("discord.tokens[{i}]"),
                "unresolved environment placeholder",
            );
        }
    }
    if config.discord.reconnect_delay_secs == 0 {
        result.warn(
            "discord.reconnect_delay_secs",
            "zero delay reconnects in a tight loop",
        );
    }

    let tg_token = config.telegram.token.expose_secret();
    if tg_token.trim().is_empty() {
        result.error(
            "telegram.token",
            "bot token is missing (set TELEGRAM_BOT_TOKEN)",
        );
    } else if tg_token.contains("${") {
        result.error("telegram.token", "unresolved environment placeholder");
    }
    if config.telegram.chat_id.trim().is_empty() {
        result.error(
            "telegram.chat_id",
            "destination chat is missing (set TELEGRAM_CHAT_ID)",
        );
    }

    if config.discovery.scan_interval_secs == 0 {
        result.error("discovery.scan_interval_secs", "must be greater than zero");
    }
    if config.discovery.scan_channel_limit == 0 {
        result.error("discovery.scan_channel_limit", "must be greater than zero");
    }
    if config.discovery.realtime_channel_limit == 0 {
        result.error(
            "discovery.realtime_channel_limit",
            "must be greater than zero",
        );
    }

    if config.poll.enabled {
        if config.poll.interval_secs == 0 {
            result.error("poll.interval_secs", "must be greater than zero");
        }
        if config.poll.fetch_limit == 0 || config.poll.fetch_limit > 100 {
            result.error("poll.fetch_limit", "must be between 1 and 100");
        }
        if config.poll.max_channels_per_cycle == 0 {
            result.error("poll.max_channels_per_cycle", "must be greater than zero");
        }
    }

    if config.delivery.max_attempts == 0 {
        result.error("delivery.max_attempts", "must be at least 1");
    }
    if config.delivery.workers == 0 {
        result.error("delivery.workers", "must be at least 1");
    }
    if config.delivery.queue_capacity < config.delivery.workers {
        result.warn(
            "delivery.queue_capacity",
            "smaller than the worker count; some workers will never run",
        );
    }
    if config.delivery.chunk_len == 0 {
        result.error("delivery.chunk_len", "must be greater than zero");
    } else if config.delivery.chunk_len > TELEGRAM_TEXT_LIMIT {
        result.warn(
            "delivery.chunk_len",
            format!("exceeds Telegram's {TELEGRAM_TEXT_LIMIT} character limit; it will be clamped"),
        );
    }

    for (community, channels) in &config.seed {
        if community.trim().is_empty() {
            result.error("seed", "community name must not be empty");
        }
        for id in channels.keys() {
            if id.parse::<u64>().is_err() {
                result.error(
                    &format!("seed.{community}.{id}"),
                    "channel id must be numeric",
                );
            }
        }
    }

    result
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest, secrecy::Secret};

    fn runnable() -> HeraldConfig {
        let mut cfg = HeraldConfig::default();
        cfg.discord.tokens = vec![Secret::new("tok".into())];
        cfg.telegram.token = Secret::new("123:ABC".into());
        cfg.telegram.chat_id = "-1002541501551".into();
        cfg
    }

    fn paths(result: &ValidationResult, severity: Severity) -> Vec<&str> {
        result
            .diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .map(|d| d.path.as_str())
            .collect()
    }

    #[test]
    fn runnable_config_is_clean() {
        let result = validate(&runnable());
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn defaults_report_missing_credentials() {
        let result = validate(&HeraldConfig::default());
        assert!(result.has_errors());
        assert_eq!(
            paths(&result, Severity::Error),
            vec!["discord.tokens", "telegram.token", "telegram.chat_id"]
        );
    }

    #[rstest]
    #[case::scan_interval(|c: &mut HeraldConfig| c.discovery.scan_interval_secs = 0, "discovery.scan_interval_secs")]
    #[case::poll_interval(|c: &mut HeraldConfig| c.poll.interval_secs = 0, "poll.interval_secs")]
    #[case::fetch_limit(|c: &mut HeraldConfig| c.poll.fetch_limit = 101, "poll.fetch_limit")]
    #[case::attempts(|c: &mut HeraldConfig| c.delivery.max_attempts = 0, "delivery.max_attempts")]
    #[case::workers(|c: &mut HeraldConfig| c.delivery.workers = 0, "delivery.workers")]
    fn zero_or_out_of_range_is_error(#[case] tweak: fn(&mut HeraldConfig), #[case] path: &str) {
        let mut cfg = runnable();
        tweak(&mut cfg);
        let result = validate(&cfg);
        assert!(paths(&result, Severity::Error).contains(&path));
    }

    #[test]
    fn disabled_poll_skips_poll_checks() {
        let mut cfg = runnable();
        cfg.poll.enabled = false;
        cfg.poll.interval_secs = 0;
        assert!(!validate(&cfg).has_errors());
    }

    #[test]
    fn oversized_chunk_is_warning() {
        let mut cfg = runnable();
        cfg.delivery.chunk_len = 5000;
        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert_eq!(result.count(Severity::Warning), 1);
    }

    #[test]
    fn unresolved_placeholder_is_reported() {
        let mut cfg = runnable();
        cfg.telegram.token = Secret::new("${TELEGRAM_BOT_TOKEN}".into());
        let result = validate(&cfg);
        assert_eq!(paths(&result, Severity::Error), vec!["telegram.token"]);
    }

    #[test]
    fn non_numeric_seed_id_is_error() {
        let mut cfg = runnable();
        cfg.seed
            .entry("Acme".into())
            .or_default()
            .insert("general".into(), "news".into());
        let result = validate(&cfg);
        assert_eq!(paths(&result, Severity::Error), vec!["seed.Acme.general"]);
    }

    #[test]
    fn diagnostic_display() {
        let d = Diagnostic {
            severity: Severity::Warning,
            path: "delivery.chunk_len".into(),
            message: "too big".into(),
        };
        assert_eq!(d.to_string(), "warning: delivery.chunk_len: too big");
    }
}
