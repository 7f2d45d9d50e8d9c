//! Config schema types (bot identity, oauth client, roles, notifications,
//! database, chat network).
use std::path::PathBuf;

use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LadderbotConfig {
    pub bot: BotConfig,
    pub oauth: OAuthSection,
    pub roles: RolesConfig,
    pub notifications: NotificationsConfig,
    pub database: DatabaseConfig,
    pub irc: IrcConfig,
}

/// The bot's own chat identity, shared by every IRC-only channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Login name of the bot account.
    pub login: String,
    /// Long-lived chat token. The `oauth:` prefix is optional.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
    /// Unix seconds when `token` was minted. Used to estimate its expiry.
    pub token_issued_at: Option<i64>,
}

/// OAuth client used to refresh per-channel tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthSection {
    pub client_id: String,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
    pub token_url: String,
    pub validate_url: String,
}

impl Default for OAuthSection {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            token_url: "https://id.twitch.tv/oauth2/token".into(),
            validate_url: "https://id.twitch.tv/oauth2/validate".into(),
        }
    }
}

/// Operator lists. Names are matched case-insensitively.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RolesConfig {
    pub admins: Vec<String>,
    pub superadmins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
    /// Webhook receiving operator notifications. Log-only when unset.
    pub webhook_url: Option<String>,
    /// Warn this many days before the shared token's estimated expiry.
    pub warning_days: u64,
    pub check_interval_secs: u64,
}

impl Default for NotificationsConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            warning_days: 7,
            check_interval_secs: 86_400,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file. Defaults to `ladderbot.db` in the data directory.
    pub path: Option<PathBuf>,
}

impl DatabaseConfig {
    /// Configured path, or `ladderbot.db` under `data_dir`.
    pub fn resolve(&self, data_dir: &std::path::Path) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| data_dir.join("ladderbot.db"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IrcConfig {
    pub host: String,
    pub port: u16,
}

impl Default for IrcConfig {
    fn default() -> Self {
        Self {
            host: "irc.chat.twitch.tv".into(),
            port: 6667,
        }
    }
}

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
