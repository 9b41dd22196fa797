//! Bootstrap configuration: schema, loading, env substitution, and validation.
//!
//! Config files: `herald.toml`, `herald.yaml`, or `herald.json`
//! Searched in `./` then `~/.config/herald/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values. The loaded config
//! is read-only at runtime; discovered state lives in the state store.

pub mod env_subst;
pub mod error;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    error::{Error, Result},
    loader::{apply_env_overrides, config_dir, discover_and_load, find_config_file, load_config},
    schema::{
        DeliveryConfig, DiscordConfig, DiscoveryConfig, HeraldConfig, PollConfig, SeedMap,
        StateConfig, TelegramConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult, validate},
};
