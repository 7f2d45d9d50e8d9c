use std::{path::Path, sync::Arc, time::Duration};

use {
    anyhow::{Context, Result, bail},
    ladderbot_channels::{
        ChannelStore, ChatNetworkClient, CommandRegistry, NotificationSink, Roles,
    },
    ladderbot_config::{BotConfig, LadderbotConfig, NotificationsConfig, OAuthSection},
    ladderbot_irc::{IrcClient, IrcClientConfig},
    ladderbot_oauth::{HttpTokenExchange, OAuthConfig, TokenExchange},
    ladderbot_sessions::{SessionManager, SharedCredential, SharedCredentialNotifier},
    secrecy::{ExposeSecret, Secret},
    sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::{
    admin_commands::register_admin_commands,
    channel_store::SqliteChannelStore,
    notify::{LogNotificationSink, WebhookNotificationSink},
};

/// Create the `channels` table and any later schema changes.
pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/// Open (creating if needed) the channel database at `path` and migrate it.
pub async fn open_database(path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let db_url = format!("sqlite:{}?mode=rwc", path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await
        .with_context(|| format!("failed to open {}", path.display()))?;
    run_migrations(&pool).await?;
    Ok(pool)
}

fn shared_credential(bot: &BotConfig) -> Result<SharedCredential> {
    if bot.login.trim().is_empty() {
        bail!("bot.login is not configured");
    }
    let Some(token) = &bot.token else {
        bail!("bot.token is not configured");
    };
    if token_is_empty(token) {
        bail!("bot.token is empty");
    }
    Ok(SharedCredential::new(
        bot.login.trim().to_lowercase(),
        token.clone(),
        bot.token_issued_at,
    ))
}

fn token_is_empty(token: &Secret<String>) -> bool {
    token.expose_secret().trim().is_empty()
}

fn token_exchange(oauth: &OAuthSection) -> Arc<dyn TokenExchange> {
    if oauth.client_id.is_empty() || oauth.client_secret.is_none() {
        warn!("oauth client credentials missing, token refresh will fail");
    }
    Arc::new(HttpTokenExchange::new(OAuthConfig {
        client_id: oauth.client_id.clone(),
        client_secret: oauth
            .client_secret
            .clone()
            .unwrap_or_else(|| Secret::new(String::new())),
        token_url: oauth.token_url.clone(),
        validate_url: oauth.validate_url.clone(),
    }))
}

fn notification_sink(notifications: &NotificationsConfig) -> Arc<dyn NotificationSink> {
    match &notifications.webhook_url {
        Some(url) if !url.trim().is_empty() => Arc::new(WebhookNotificationSink::new(url.trim())),
        _ => {
            debug!("no webhook configured, notifications go to the log");
            Arc::new(LogNotificationSink)
        },
    }
}

/// A running bot: the session manager plus the shared-token expiry watcher.
pub struct Gateway {
    manager: Arc<SessionManager>,
    cancel: CancellationToken,
    notifier: JoinHandle<()>,
}

impl Gateway {
    /// Build the production stack from `config` and start every channel.
    pub async fn start(config: &LadderbotConfig, data_dir: &Path) -> Result<Self> {
        let db_path = config.database.resolve(data_dir);
        let pool = open_database(&db_path).await?;
        info!(path = %db_path.display(), "channel database ready");

        let store: Arc<dyn ChannelStore> = Arc::new(SqliteChannelStore::new(pool));
        let client: Arc<dyn ChatNetworkClient> = Arc::new(IrcClient::new(IrcClientConfig {
            host: config.irc.host.clone(),
            port: config.irc.port,
            ..Default::default()
        }));
        Self::start_with(config, store, client, token_exchange(&config.oauth)).await
    }

    /// Start with caller-provided store, chat client and token exchange.
    pub async fn start_with(
        config: &LadderbotConfig,
        store: Arc<dyn ChannelStore>,
        client: Arc<dyn ChatNetworkClient>,
        exchange: Arc<dyn TokenExchange>,
    ) -> Result<Self> {
        let shared = Arc::new(shared_credential(&config.bot)?);
        let roles = Roles::new(&config.roles.admins, &config.roles.superadmins);
        if roles.superadmins().is_empty() {
            warn!("no superadmins configured, !resetdb is unavailable");
        }

        let manager = Arc::new_cyclic(|weak| {
            let mut commands = CommandRegistry::new();
            register_admin_commands(&mut commands, weak.clone());
            SessionManager::new(store, client, exchange, Arc::clone(&shared), roles, commands)
        });

        let report = manager.start().await;
        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "channel sessions started"
        );
        if !report.failed.is_empty() {
            warn!(channels = ?report.failed, "some channels failed to start");
        }

        let cancel = CancellationToken::new();
        let notifications = &config.notifications;
        let notifier = Arc::new(SharedCredentialNotifier::new(
            shared,
            notification_sink(notifications),
            Duration::from_secs(notifications.warning_days.saturating_mul(86_400)),
            Duration::from_secs(notifications.check_interval_secs),
        ))
        .spawn(cancel.clone());

        Ok(Self {
            manager,
            cancel,
            notifier,
        })
    }

    pub fn manager(&self) -> &Arc<SessionManager> {
        &self.manager
    }

    /// Stop the expiry watcher and every channel session.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.notifier.await {
            warn!(error = %e, "expiry watcher ended abnormally");
        }
        self.manager.shutdown().await;
    }
}
