use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use {
    ladderbot_channels::{
        AuthLevel, ChannelPatch, ChannelRegistration, ChannelStore, ChatCredential, TokenSet,
        unix_now,
    },
    ladderbot_oauth::{TokenExchange, TokenGrant},
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, info},
};

use crate::{Error, Result};

/// Assumed lifetime of the shared chat token.
pub const SHARED_TOKEN_LIFETIME: Duration = Duration::from_secs(60 * 24 * 60 * 60);

fn lifetime_secs() -> i64 {
    SHARED_TOKEN_LIFETIME.as_secs() as i64
}

/// The bot's own long-lived chat credential, used by every IRC-only channel.
///
/// It is never refreshed. The expiry is an estimate: `issued_at` plus
/// [`SHARED_TOKEN_LIFETIME`] when the issue time is configured, otherwise
/// the time of the first strategy built from it.
pub struct SharedCredential {
    credential: ChatCredential,
    issued_at: Option<i64>,
    first_use: OnceLock<i64>,
}

impl SharedCredential {
    pub fn new(login: impl Into<String>, token: Secret<String>, issued_at: Option<i64>) -> Self {
        Self {
            credential: ChatCredential::new(login, token),
            issued_at,
            first_use: OnceLock::new(),
        }
    }

    pub fn login(&self) -> &str {
        &self.credential.login
    }

    pub fn credential(&self) -> &ChatCredential {
        &self.credential
    }

    /// Record first use. Later calls keep the first timestamp.
    pub fn mark_used(&self, now: i64) {
        if self.first_use.set(now).is_ok() && self.issued_at.is_none() {
            debug!(
                login = %self.credential.login,
                "shared credential first used, expiry estimated from now"
            );
        }
    }

    /// Estimated expiry in unix seconds, once one can be derived.
    pub fn expires_at(&self) -> Option<i64> {
        self.issued_at
            .or_else(|| self.first_use.get().copied())
            .map(|start| start.saturating_add(lifetime_secs()))
    }
}

/// Runs the token exchange and persists its result before handing it out.
pub struct TokenRefresher {
    exchange: Arc<dyn TokenExchange>,
    store: Arc<dyn ChannelStore>,
}

impl TokenRefresher {
    pub fn new(exchange: Arc<dyn TokenExchange>, store: Arc<dyn ChannelStore>) -> Self {
        Self { exchange, store }
    }

    pub fn exchange(&self) -> &Arc<dyn TokenExchange> {
        &self.exchange
    }

    /// Exchange `refresh_token` for a new pair.
    ///
    /// The new pair is written to the store before it is returned; callers
    /// only ever see persisted credentials.
    pub async fn refresh(&self, channel: &str, refresh_token: &Secret<String>) -> Result<TokenGrant> {
        let grant = self
            .exchange
            .refresh(refresh_token.expose_secret())
            .await
            .map_err(|e| Error::refresh_failed(channel, e))?;

        let now = unix_now();
        self.store
            .update(channel, ChannelPatch::tokens(token_set(&grant, now), now))
            .await
            .map_err(|e| Error::persistence_failed(channel, e))?;

        info!(channel, expires_in = grant.expires_in, "refreshed channel tokens");
        Ok(grant)
    }
}

/// Absolute-expiry token set for a grant received at `now`.
pub(crate) fn token_set(grant: &TokenGrant, now: i64) -> TokenSet {
    TokenSet {
        access_token: grant.access_token.clone(),
        refresh_token: grant.refresh_token.clone(),
        expires_at: now.saturating_add(i64::try_from(grant.expires_in).unwrap_or(i64::MAX)),
    }
}

/// Per-channel OAuth credential that can rotate itself.
pub struct RefreshingStrategy {
    channel: String,
    credential: ChatCredential,
    refresh_token: Secret<String>,
    expires_at: Option<i64>,
    refresher: Arc<TokenRefresher>,
}

impl RefreshingStrategy {
    pub fn refresh_token(&self) -> &Secret<String> {
        &self.refresh_token
    }

    pub fn expires_at(&self) -> Option<i64> {
        self.expires_at
    }

    pub async fn refresh(&self) -> Result<TokenGrant> {
        self.refresher
            .refresh(&self.channel, &self.refresh_token)
            .await
    }
}

/// Credential a channel connects with.
pub enum AuthStrategy {
    Shared(Arc<SharedCredential>),
    Refreshing(RefreshingStrategy),
}

impl AuthStrategy {
    pub fn auth_level(&self) -> AuthLevel {
        match self {
            Self::Shared(_) => AuthLevel::Irc,
            Self::Refreshing(_) => AuthLevel::Oauth,
        }
    }

    pub fn credential(&self) -> &ChatCredential {
        match self {
            Self::Shared(shared) => shared.credential(),
            Self::Refreshing(strategy) => &strategy.credential,
        }
    }

    pub async fn refresh(&self) -> Result<TokenGrant> {
        match self {
            Self::Shared(shared) => Err(Error::RefreshUnsupported {
                channel: shared.login().to_string(),
            }),
            Self::Refreshing(strategy) => strategy.refresh().await,
        }
    }
}

/// Builds the [`AuthStrategy`] for a registration. The only place that
/// branches on [`AuthLevel`].
pub struct AuthStrategyFactory {
    shared: Arc<SharedCredential>,
    refresher: Arc<TokenRefresher>,
}

impl AuthStrategyFactory {
    pub fn new(shared: Arc<SharedCredential>, refresher: Arc<TokenRefresher>) -> Self {
        Self { shared, refresher }
    }

    pub fn shared(&self) -> &Arc<SharedCredential> {
        &self.shared
    }

    pub fn refresher(&self) -> &Arc<TokenRefresher> {
        &self.refresher
    }

    pub fn build(&self, registration: &ChannelRegistration) -> Result<AuthStrategy> {
        match registration.auth_level {
            AuthLevel::Irc => {
                self.shared.mark_used(unix_now());
                Ok(AuthStrategy::Shared(Arc::clone(&self.shared)))
            },
            AuthLevel::Oauth => {
                let (access, refresh) = registration
                    .tokens()
                    .ok_or_else(|| Error::missing_credentials(&registration.username))?;
                Ok(AuthStrategy::Refreshing(RefreshingStrategy {
                    channel: registration.username.clone(),
                    credential: ChatCredential::new(&registration.username, access.clone()),
                    refresh_token: refresh.clone(),
                    expires_at: registration.token_expires_at,
                    refresher: Arc::clone(&self.refresher),
                }))
            },
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        async_trait::async_trait,
        ladderbot_channels::InMemoryChannelStore,
        ladderbot_oauth::TokenValidation,
        std::sync::atomic::{AtomicUsize, Ordering},
    };

    struct StaticExchange {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl TokenExchange for StaticExchange {
        async fn refresh(&self, refresh_token: &str) -> ladderbot_oauth::Result<TokenGrant> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ladderbot_oauth::Error::rejected(400, "Invalid refresh token"));
            }
            assert_eq!(refresh_token, "r1");
            Ok(TokenGrant::new("a2", "r2", 3600))
        }

        async fn validate(&self, _access_token: &str) -> ladderbot_oauth::Result<TokenValidation> {
            Ok(TokenValidation::default())
        }
    }

    fn factory(store: Arc<InMemoryChannelStore>, fail: bool) -> AuthStrategyFactory {
        let exchange = Arc::new(StaticExchange {
            fail,
            calls: AtomicUsize::new(0),
        });
        AuthStrategyFactory::new(
            Arc::new(SharedCredential::new("ladderbot", Secret::new("shared".into()), None)),
            Arc::new(TokenRefresher::new(exchange, store)),
        )
    }

    #[test]
    fn irc_registration_gets_shared_strategy() {
        let factory = factory(Arc::new(InMemoryChannelStore::new()), false);
        assert!(factory.shared().expires_at().is_none());

        let strategy = factory.build(&ChannelRegistration::new_irc("foo", 10)).unwrap();
        assert_eq!(strategy.auth_level(), AuthLevel::Irc);
        assert_eq!(strategy.credential().login, "ladderbot");
        assert_eq!(strategy.credential().token.expose_secret(), "shared");

        let first = factory.shared().expires_at().unwrap();
        factory.build(&ChannelRegistration::new_irc("bar", 10)).unwrap();
        assert_eq!(factory.shared().expires_at(), Some(first));
    }

    #[test]
    fn configured_issue_time_drives_expiry() {
        let shared = SharedCredential::new("b", Secret::new("t".into()), Some(1_000));
        assert_eq!(shared.expires_at(), Some(1_000 + 60 * 86_400));
        shared.mark_used(5_000);
        assert_eq!(shared.expires_at(), Some(1_000 + 60 * 86_400));
    }

    #[test]
    fn oauth_without_tokens_is_missing_credentials() {
        let factory = factory(Arc::new(InMemoryChannelStore::new()), false);
        let mut reg = ChannelRegistration::new_oauth("foo", TokenSet::new("a", "r", 100), 1);
        reg.refresh_token = Some(Secret::new(String::new()));
        assert!(matches!(
            factory.build(&reg),
            Err(Error::MissingCredentials { channel }) if channel == "foo"
        ));
    }

    #[tokio::test]
    async fn shared_strategy_cannot_refresh() {
        let factory = factory(Arc::new(InMemoryChannelStore::new()), false);
        let strategy = factory.build(&ChannelRegistration::new_irc("foo", 1)).unwrap();
        assert!(matches!(
            strategy.refresh().await,
            Err(Error::RefreshUnsupported { .. })
        ));
    }

    #[tokio::test]
    async fn refresh_persists_before_returning() {
        let reg = ChannelRegistration::new_oauth("foo", TokenSet::new("a1", "r1", 100), 1);
        let store = Arc::new(InMemoryChannelStore::with_registrations([reg.clone()]));
        let factory = factory(Arc::clone(&store), false);

        let grant = factory.build(&reg).unwrap().refresh().await.unwrap();
        assert_eq!(grant.access_token.expose_secret(), "a2");

        let stored = store.get("foo").await.unwrap().unwrap();
        assert_eq!(stored.access_token.unwrap().expose_secret(), "a2");
        assert_eq!(stored.refresh_token.unwrap().expose_secret(), "r2");
        assert!(stored.token_expires_at.unwrap() >= unix_now() + 3590);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_store_untouched() {
        let reg = ChannelRegistration::new_oauth("foo", TokenSet::new("a1", "r1", 100), 1);
        let store = Arc::new(InMemoryChannelStore::with_registrations([reg.clone()]));
        let factory = factory(Arc::clone(&store), true);

        let err = factory.build(&reg).unwrap().refresh().await.unwrap_err();
        assert!(matches!(err, Error::RefreshFailed { .. }));

        let stored = store.get("foo").await.unwrap().unwrap();
        assert_eq!(stored.access_token.unwrap().expose_secret(), "a1");
    }

    #[tokio::test]
    async fn unwritable_store_is_persistence_failure() {
        // No record to update, so the write fails after a successful exchange.
        let reg = ChannelRegistration::new_oauth("foo", TokenSet::new("a1", "r1", 100), 1);
        let factory = factory(Arc::new(InMemoryChannelStore::new()), false);

        let err = factory.build(&reg).unwrap().refresh().await.unwrap_err();
        assert!(matches!(err, Error::PersistenceFailed { channel, .. } if channel == "foo"));
    }
}
