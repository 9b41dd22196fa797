use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, info},
};

use crate::{
    env_subst::substitute_env,
    error::{Error, Result},
    schema::HeraldConfig,
};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &["herald.toml", "herald.yaml", "herald.yml", "herald.json"];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> Result<HeraldConfig> {
    let raw = std::fs::read_to_string(path).map_err(|source| Error::Read {
        path: path.display().to_string(),
        source,
    })?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Load the explicit path if given, otherwise the first file found in the
/// standard locations, otherwise defaults. Env overrides are applied last.
///
/// Search order:
/// 1. `./herald.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/herald/herald.{toml,yaml,yml,json}` (user-global)
pub fn discover_and_load(explicit: Option<&Path>) -> Result<(HeraldConfig, Option<PathBuf>)> {
    let path = match explicit {
        Some(p) => Some(p.to_path_buf()),
        None => find_config_file(),
    };

    let mut config = match &path {
        Some(p) => {
            debug!(path = %p.display(), "loading config");
            load_config(p)?
        },
        None => {
            info!("no config file found, using defaults and environment");
            HeraldConfig::default()
        },
    };

    apply_env_overrides(&mut config);
    Ok((config, path))
}

/// Find the first config file in standard locations.
pub fn find_config_file() -> Option<PathBuf> {
    for name in CONFIG_FILENAMES {
        let p = PathBuf::from(name);
        if p.exists() {
            return Some(p);
        }
    }

    let dir = config_dir()?;
    CONFIG_FILENAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/herald/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "herald").map(|d| d.config_dir().to_path_buf())
}

/// Apply the deployment environment variables on top of file values.
///
/// `DISCORD_AUTH_TOKENS` is a comma-separated credential list.
pub fn apply_env_overrides(config: &mut HeraldConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

fn apply_env_overrides_with(config: &mut HeraldConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(tokens) = lookup("DISCORD_AUTH_TOKENS") {
        let parsed: Vec<Secret<String>> = tokens
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(|t| Secret::new(t.to_string()))
            .collect();
        if !parsed.is_empty() {
            config.discord.tokens = parsed;
        }
    }
    if let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.trim().is_empty()) {
        config.telegram.token = Secret::new(token.trim().to_string());
    }
    if let Some(chat_id) = lookup("TELEGRAM_CHAT_ID").filter(|c| !c.trim().is_empty()) {
        config.telegram.chat_id = chat_id.trim().to_string();
    }
    if let Some(path) = lookup("HERALD_STATE_PATH").filter(|p| !p.trim().is_empty()) {
        config.state.path = PathBuf::from(path.trim());
    }
}

fn parse_config(raw: &str, path: &Path) -> Result<HeraldConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => Err(Error::UnsupportedFormat {
            extension: ext.to_string(),
        }),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, secrecy::ExposeSecret, tempfile::TempDir};

    #[test]
    fn loads_yaml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("herald.yaml");
        std::fs::write(
            &path,
            "telegram:\n  chat_id: \"-100\"\nseed:\n  Monad:\n    \"1036885738182168597\": announcements\n",
        )
        .unwrap();

        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.telegram.chat_id, "-100");
        assert_eq!(cfg.seed["Monad"].len(), 1);
    }

    #[test]
    fn rejects_unknown_extension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("herald.ini");
        std::fs::write(&path, "x=1").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn missing_file_reports_path() {
        let err = load_config(Path::new("/nonexistent/herald.toml")).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/herald.toml"));
    }

    #[test]
    fn env_overrides_split_token_list() {
        let mut cfg = HeraldConfig::default();
        apply_env_overrides_with(&mut cfg, |name| match name {
            "DISCORD_AUTH_TOKENS" => Some(" tok-a , ,tok-b".into()),
            "TELEGRAM_CHAT_ID" => Some("-1002541501551".into()),
            _ => None,
        });

        let tokens: Vec<&str> = cfg
            .discord
            .tokens
            .iter()
            .map(|t| t.expose_secret().as_str())
            .collect();
        assert_eq!(tokens, vec!["tok-a", "tok-b"]);
        assert_eq!(cfg.telegram.chat_id, "-1002541501551");
        assert!(cfg.telegram.token.expose_secret().is_empty());
    }

    #[test]
    fn blank_env_values_do_not_clobber_file_values() {
        let mut cfg = HeraldConfig::default();
        cfg.telegram.chat_id = "-100".into();
        apply_env_overrides_with(&mut cfg, |name| match name {
            "TELEGRAM_CHAT_ID" | "DISCORD_AUTH_TOKENS" => Some("  ".into()),
            _ => None,
        });
        assert_eq!(cfg.telegram.chat_id, "-100");
        assert!(cfg.discord.tokens.is_empty());
    }
}
