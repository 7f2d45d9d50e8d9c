use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

use crate::{Error, Result};

/// Current unix time in seconds.
pub fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// Authorization tier of a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthLevel {
    /// Served by the bot's shared chat credential.
    #[default]
    Irc,
    /// Served by a channel-specific OAuth credential.
    Oauth,
}

impl AuthLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Irc => "irc",
            Self::Oauth => "oauth",
        }
    }
}

impl std::fmt::Display for AuthLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AuthLevel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "irc" => Ok(Self::Irc),
            "oauth" => Ok(Self::Oauth),
            other => Err(Error::invalid_input(format!("unknown auth level: {other}"))),
        }
    }
}

/// A channel-specific OAuth token pair with its absolute expiry.
#[derive(Clone)]
pub struct TokenSet {
    pub access_token: Secret<String>,
    pub refresh_token: Secret<String>,
    /// Unix timestamp (seconds) when the access token expires.
    pub expires_at: i64,
}

impl TokenSet {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_at: i64,
    ) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: Secret::new(refresh_token.into()),
            expires_at,
        }
    }

    /// Build a token set from a relative lifetime.
    pub fn expiring_in(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        expires_in_secs: u64,
        now: i64,
    ) -> Self {
        Self::new(
            access_token,
            refresh_token,
            now.saturating_add(i64::try_from(expires_in_secs).unwrap_or(i64::MAX)),
        )
    }

    fn is_complete(&self) -> bool {
        !self.access_token.expose_secret().is_empty()
            && !self.refresh_token.expose_secret().is_empty()
    }
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// How a token write changed a registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// `irc` → `oauth`.
    Upgrade,
    /// `oauth` → `oauth` with a fresh token pair.
    Reauthorization,
}

/// Persisted record for one channel the bot serves.
#[derive(Clone)]
pub struct ChannelRegistration {
    /// Lowercase channel name, unique.
    pub username: String,
    /// Linked game-profile id, if the streamer registered one.
    pub player_id: Option<String>,
    pub auth_level: AuthLevel,
    pub access_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    /// Unix timestamp (seconds); only meaningful for `oauth`.
    pub token_expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ChannelRegistration {
    /// Canonical channel key: trimmed, without a leading `#`, lowercase.
    pub fn normalize_username(raw: &str) -> String {
        raw.trim().trim_start_matches('#').to_lowercase()
    }

    pub fn new_irc(username: &str, now: i64) -> Self {
        Self {
            username: Self::normalize_username(username),
            player_id: None,
            auth_level: AuthLevel::Irc,
            access_token: None,
            refresh_token: None,
            token_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn new_oauth(username: &str, tokens: TokenSet, now: i64) -> Self {
        let mut registration = Self::new_irc(username, now);
        registration.set_tokens(tokens, now);
        registration
    }

    /// Install a fresh token pair. Always lands on `oauth`.
    pub fn apply_tokens(&mut self, tokens: TokenSet, now: i64) -> Transition {
        let transition = match self.auth_level {
            AuthLevel::Irc => Transition::Upgrade,
            AuthLevel::Oauth => Transition::Reauthorization,
        };
        self.set_tokens(tokens, now);
        transition
    }

    fn set_tokens(&mut self, tokens: TokenSet, now: i64) {
        self.auth_level = AuthLevel::Oauth;
        self.access_token = Some(tokens.access_token);
        self.refresh_token = Some(tokens.refresh_token);
        self.token_expires_at = Some(tokens.expires_at);
        self.updated_at = now;
    }

    /// Apply a partial update.
    pub fn apply_patch(&mut self, patch: ChannelPatch) {
        if let Some(player_id) = patch.player_id {
            self.player_id = player_id;
        }
        match patch.tokens {
            Some(tokens) => self.set_tokens(tokens, patch.updated_at),
            None => self.updated_at = patch.updated_at,
        }
    }

    /// Both tokens, when present and non-empty.
    pub fn tokens(&self) -> Option<(&Secret<String>, &Secret<String>)> {
        match (&self.access_token, &self.refresh_token) {
            (Some(access), Some(refresh))
                if !access.expose_secret().is_empty() && !refresh.expose_secret().is_empty() =>
            {
                Some((access, refresh))
            },
            _ => None,
        }
    }

    /// Seconds until the access token expires, negative once it has.
    pub fn expires_in(&self, now: i64) -> Option<i64> {
        self.token_expires_at.map(|at| at - now)
    }

    /// Check the tier/token invariant.
    pub fn validate(&self) -> Result<()> {
        if self.username.is_empty() {
            return Err(Error::invalid_input("channel username is empty"));
        }
        if self.auth_level == AuthLevel::Oauth
            && (self.tokens().is_none() || self.token_expires_at.is_none())
        {
            return Err(Error::invalid_input(format!(
                "oauth channel {} requires access token, refresh token and expiry",
                self.username
            )));
        }
        Ok(())
    }
}

impl std::fmt::Debug for ChannelRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistration")
            .field("username", &self.username)
            .field("player_id", &self.player_id)
            .field("auth_level", &self.auth_level)
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("token_expires_at", &self.token_expires_at)
            .finish_non_exhaustive()
    }
}

/// Partial update for [`crate::ChannelStore::update`].
#[derive(Debug, Clone, Default)]
pub struct ChannelPatch {
    /// `Some(None)` clears the link.
    pub player_id: Option<Option<String>>,
    /// Writing tokens always moves the record to `oauth`.
    pub tokens: Option<TokenSet>,
    pub updated_at: i64,
}

impl ChannelPatch {
    pub fn tokens(tokens: TokenSet, now: i64) -> Self {
        Self {
            player_id: None,
            tokens: Some(tokens),
            updated_at: now,
        }
    }

    pub fn player_id(player_id: Option<String>, now: i64) -> Self {
        Self {
            player_id: Some(player_id),
            tokens: None,
            updated_at: now,
        }
    }

    /// Reject token writes that would break the oauth invariant.
    pub fn validate(&self) -> Result<()> {
        match &self.tokens {
            Some(tokens) if !tokens.is_complete() => Err(Error::invalid_input(
                "token update requires non-empty access and refresh tokens",
            )),
            _ => Ok(()),
        }
    }
}
