//! Configuration loading, validation and env substitution.
//!
//! Config files: `ladderbot.toml`, `ladderbot.yaml`, or `ladderbot.json`
//! Searched in `./` then `~/.config/ladderbot/`.
//!
//! Supports `${ENV_VAR}` and `${ENV_VAR:-default}` substitution in all string
//! values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{config_dir, data_dir, discover_and_load, find_config_file, load_config, save_config},
    schema::{
        BotConfig, DatabaseConfig, IrcConfig, LadderbotConfig, NotificationsConfig, OAuthSection,
        RolesConfig,
    },
    validate::{Diagnostic, Severity, ValidationResult},
};
