//! Session orchestration: start/stop/reconnect, authorization-tier
//! transitions, and dispatch of inbound chat commands.

use std::{
    sync::{Arc, Mutex, Weak},
    time::Duration,
};

use {
    async_trait::async_trait,
    ladderbot_channels::{
        AuthLevel, ChannelRegistration, ChannelStore, ChatNetworkClient, CommandContext,
        CommandRegistry, ConnectionHandle, InboundMessage, Invoker, MessageSink, Permission, Roles,
        Transition, parse_command,
        permissions::{evaluate, meets_requirement},
        unix_now,
    },
    ladderbot_oauth::{TokenExchange, TokenGrant},
    secrecy::ExposeSecret,
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, error, info, warn},
};

use crate::{
    Error, Result,
    registry::{ChannelLocks, Session, SessionRegistry},
    scheduler::{RefreshScheduler, SessionEvent, refresh_delay},
    strategy::{AuthStrategy, AuthStrategyFactory, SharedCredential, TokenRefresher, token_set},
};

/// How an authorization callback changed a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationKind {
    /// No registration existed.
    New,
    /// `irc` → `oauth`.
    Upgrade,
    /// `oauth` → `oauth` with fresh tokens.
    Reauthorization,
}

impl From<Transition> for AuthorizationKind {
    fn from(transition: Transition) -> Self {
        match transition {
            Transition::Upgrade => Self::Upgrade,
            Transition::Reauthorization => Self::Reauthorization,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthorizationOutcome {
    pub kind: AuthorizationKind,
    pub session: Session,
}

/// What happened to an inbound chat line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a command.
    Ignored,
    /// No handler registered under that name.
    UnknownCommand,
    /// The channel has no live session or registration.
    NoSession,
    /// Refused by the channel's tier; a notice was sent.
    Denied(Permission),
    /// The invoker lacks the required role; a notice was sent.
    Forbidden,
    Handled,
    /// The handler or a lookup failed; logged.
    Failed,
}

/// Channels started and channels that failed during a bulk start.
#[derive(Debug, Clone, Default)]
pub struct StartupReport {
    pub started: Vec<String>,
    pub failed: Vec<String>,
}

pub struct SessionManager {
    store: Arc<dyn ChannelStore>,
    client: Arc<dyn ChatNetworkClient>,
    exchange: Arc<dyn TokenExchange>,
    factory: AuthStrategyFactory,
    registry: SessionRegistry,
    scheduler: Arc<RefreshScheduler>,
    locks: Arc<ChannelLocks>,
    roles: Roles,
    commands: CommandRegistry,
    events: Mutex<Option<mpsc::UnboundedReceiver<SessionEvent>>>,
    event_task: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn ChannelStore>,
        client: Arc<dyn ChatNetworkClient>,
        exchange: Arc<dyn TokenExchange>,
        shared: Arc<SharedCredential>,
        roles: Roles,
        commands: CommandRegistry,
    ) -> Self {
        let refresher = Arc::new(TokenRefresher::new(
            Arc::clone(&exchange),
            Arc::clone(&store),
        ));
        let locks = Arc::new(ChannelLocks::new());
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            scheduler: Arc::new(RefreshScheduler::new(
                Arc::clone(&refresher),
                Arc::clone(&locks),
                tx,
            )),
            factory: AuthStrategyFactory::new(shared, refresher),
            store,
            client,
            exchange,
            registry: SessionRegistry::new(),
            locks,
            roles,
            commands,
            events: Mutex::new(Some(rx)),
            event_task: Mutex::new(None),
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn scheduler(&self) -> &Arc<RefreshScheduler> {
        &self.scheduler
    }

    pub fn roles(&self) -> &Roles {
        &self.roles
    }

    pub fn commands(&self) -> &CommandRegistry {
        &self.commands
    }

    pub fn store(&self) -> &Arc<dyn ChannelStore> {
        &self.store
    }

    pub fn shared_credential(&self) -> &Arc<SharedCredential> {
        self.factory.shared()
    }

    pub fn sessions(&self) -> Vec<Session> {
        self.registry.sessions()
    }

    /// Start every registered channel, then make sure each superadmin's own
    /// channel is served. Per-channel failures are logged and skipped.
    pub async fn start(self: &Arc<Self>) -> StartupReport {
        self.spawn_event_loop();

        let registrations = match self.store.list().await {
            Ok(registrations) => registrations,
            Err(e) => {
                error!(error = %e, "failed to list channel registrations");
                Vec::new()
            },
        };
        info!(count = registrations.len(), "starting channel sessions");

        let mut report = self
            .start_all(registrations.iter().map(|r| r.username.as_str()))
            .await;
        let bootstrap = self.ensure_superadmin_channels().await;
        report.started.extend(bootstrap.started);
        report.failed.extend(bootstrap.failed);

        info!(
            started = report.started.len(),
            failed = report.failed.len(),
            "channel sessions started"
        );
        report
    }

    /// Bring live sessions in line with the store: start channels that are
    /// registered but not connected, stop those whose record is gone.
    pub async fn reload(self: &Arc<Self>) -> Result<StartupReport> {
        let registrations = self
            .store
            .list()
            .await
            .map_err(|e| Error::store("*", e))?;

        for channel in self.registry.channels() {
            if registrations.iter().any(|r| r.username == channel)
                || self.is_superadmin_channel(&channel)
            {
                continue;
            }
            let _guard = self.locks.lock(&channel).await;
            // The listing may predate a registration made since.
            match self.store.get(&channel).await {
                Ok(None) => {
                    self.stop_locked(&channel).await;
                },
                Ok(Some(_)) => {},
                Err(e) => {
                    warn!(channel = %channel, error = %e, "failed to recheck registration during reload");
                },
            }
        }

        let missing: Vec<&str> = registrations
            .iter()
            .map(|r| r.username.as_str())
            .filter(|c| !self.registry.has(c))
            .collect();
        let mut report = self.start_all(missing).await;
        let bootstrap = self.ensure_superadmin_channels().await;
        report.started.extend(bootstrap.started);
        report.failed.extend(bootstrap.failed);
        Ok(report)
    }

    async fn start_all<'a>(self: &Arc<Self>, channels: impl IntoIterator<Item = &'a str>) -> StartupReport {
        let channels: Vec<&str> = channels.into_iter().collect();
        let results =
            futures::future::join_all(channels.iter().map(|c| self.start_channel(c))).await;

        let mut report = StartupReport::default();
        for (channel, result) in channels.into_iter().zip(results) {
            match result {
                Ok(_) => report.started.push(channel.to_string()),
                Err(e) => {
                    error!(channel, error = %e, "failed to start channel session");
                    report.failed.push(channel.to_string());
                },
            }
        }
        report
    }

    async fn ensure_superadmin_channels(self: &Arc<Self>) -> StartupReport {
        let mut report = StartupReport::default();
        for channel in self.roles.superadmins() {
            if self.registry.has(&channel) {
                continue;
            }
            let result = async {
                self.ensure_registered(&channel).await?;
                self.start_channel(&channel).await
            }
            .await;
            match result {
                Ok(_) => report.started.push(channel),
                Err(e) => {
                    error!(channel = %channel, error = %e, "failed to start superadmin channel");
                    report.failed.push(channel);
                },
            }
        }
        report
    }

    fn is_superadmin_channel(&self, channel: &str) -> bool {
        self.roles.is_super_admin(channel)
    }

    /// Open a session for a registered channel. Returns the existing session
    /// unchanged when one is live.
    pub async fn start_channel(self: &Arc<Self>, channel: &str) -> Result<Session> {
        let channel = normalize(channel)?;
        let _guard = self.locks.lock(&channel).await;
        self.start_locked(&channel).await
    }

    /// Close the session for `channel` and cancel its refresh timer.
    /// Returns whether a session was live.
    pub async fn stop(&self, channel: &str) -> bool {
        let channel = ChannelRegistration::normalize_username(channel);
        let _guard = self.locks.lock(&channel).await;
        self.stop_locked(&channel).await
    }

    /// Stop then start from the latest persisted record.
    pub async fn reconnect(self: &Arc<Self>, channel: &str) -> Result<Session> {
        let channel = normalize(channel)?;
        let _guard = self.locks.lock(&channel).await;
        self.stop_locked(&channel).await;
        self.start_locked(&channel).await
    }

    /// Install tokens from a completed authorization for `username`.
    ///
    /// The record is persisted before any connection changes. A failed write
    /// returns [`Error::PersistenceFailed`] and leaves the live session as is.
    pub async fn handle_authorization_callback(
        self: &Arc<Self>,
        username: &str,
        grant: TokenGrant,
    ) -> Result<AuthorizationOutcome> {
        let channel = normalize(username)?;
        let _guard = self.locks.lock(&channel).await;

        let now = unix_now();
        let tokens = token_set(&grant, now);
        let existing = self
            .store
            .get(&channel)
            .await
            .map_err(|e| Error::store(&channel, e))?;
        let (record, kind) = match existing {
            Some(mut record) => {
                let transition = record.apply_tokens(tokens, now);
                (record, AuthorizationKind::from(transition))
            },
            None => (
                ChannelRegistration::new_oauth(&channel, tokens, now),
                AuthorizationKind::New,
            ),
        };

        self.store
            .upsert(record)
            .await
            .map_err(|e| Error::persistence_failed(&channel, e))?;
        info!(channel = %channel, kind = ?kind, "channel authorized");

        self.stop_locked(&channel).await;
        let session = self.start_locked(&channel).await?;
        Ok(AuthorizationOutcome { kind, session })
    }

    /// Admin-only: register `channel` on the shared credential if needed and
    /// join it.
    pub async fn admin_join(self: &Arc<Self>, invoker: &str, channel: &str) -> Result<Session> {
        if !self.roles.has_admin_privileges(invoker) {
            return Err(Error::not_permitted(invoker, "join channels"));
        }
        let channel = normalize(channel)?;
        let _guard = self.locks.lock(&channel).await;
        if self.registry.has(&channel) {
            return Err(Error::already_connected(&channel));
        }
        self.ensure_registered(&channel).await?;
        self.start_locked(&channel).await
    }

    /// Leave `channel`, keeping its registration. Returns whether it was live.
    pub async fn part(&self, channel: &str) -> bool {
        self.stop(channel).await
    }

    /// Leave `channel` and delete its registration.
    pub async fn unlink(&self, channel: &str) -> Result<bool> {
        let channel = normalize(channel)?;
        let _guard = self.locks.lock(&channel).await;
        let was_live = self.stop_locked(&channel).await;
        self.store
            .delete(&channel)
            .await
            .map_err(|e| Error::store(&channel, e))?;
        info!(channel = %channel, "channel unlinked");
        Ok(was_live)
    }

    /// Superadmin-only: drop every registration and session, then rejoin the
    /// superadmin channels. Returns how many registrations were removed.
    ///
    /// Each channel is stopped and deleted in one critical section.
    pub async fn reset(self: &Arc<Self>, invoker: &str) -> Result<usize> {
        if !self.roles.is_super_admin(invoker) {
            return Err(Error::not_permitted(invoker, "reset the channel database"));
        }
        let registrations = self
            .store
            .list()
            .await
            .map_err(|e| Error::store("*", e))?;

        let mut channels: Vec<String> = registrations.into_iter().map(|r| r.username).collect();
        for channel in self.registry.channels() {
            if !channels.contains(&channel) {
                channels.push(channel);
            }
        }

        let mut removed = 0;
        for channel in &channels {
            let _guard = self.locks.lock(channel).await;
            self.stop_locked(channel).await;
            let existing = self
                .store
                .get(channel)
                .await
                .map_err(|e| Error::store(channel, e))?;
            if existing.is_some() {
                self.store
                    .delete(channel)
                    .await
                    .map_err(|e| Error::store(channel, e))?;
                removed += 1;
            }
        }
        warn!(invoker, removed, "channel database reset");
        self.ensure_superadmin_channels().await;
        Ok(removed)
    }

    /// Route one inbound chat line through the permission checks to its
    /// command handler.
    pub async fn dispatch(
        &self,
        channel: &str,
        text: &str,
        invoker: &Invoker,
        message_id: Option<&str>,
    ) -> DispatchOutcome {
        let Some((name, args)) = parse_command(text) else {
            return DispatchOutcome::Ignored;
        };
        let Some(handler) = self.commands.lookup(&name) else {
            debug!(command = %name, "unknown command");
            return DispatchOutcome::UnknownCommand;
        };
        let channel = ChannelRegistration::normalize_username(channel);
        let Some(session) = self.registry.get(&channel) else {
            return DispatchOutcome::NoSession;
        };
        let registration = match self.store.get(&channel).await {
            Ok(Some(registration)) => registration,
            Ok(None) => return DispatchOutcome::NoSession,
            Err(e) => {
                warn!(channel = %channel, error = %e, "failed to load registration for dispatch");
                return DispatchOutcome::Failed;
            },
        };

        let command = handler.name().to_string();
        let permission = evaluate(registration.auth_level, &command);
        if let Some(notice) = permission.notice(&command, &channel) {
            debug!(channel = %channel, command = %command, ?permission, "command refused by channel tier");
            self.notify_chat(session.handle, &channel, &notice, message_id)
                .await;
            return DispatchOutcome::Denied(permission);
        }

        if !meets_requirement(&self.roles, invoker, &channel, handler.requirement()) {
            debug!(channel = %channel, command = %command, user = %invoker.username, "command refused by role");
            let notice = format!("You don't have permission to use !{command}.");
            self.notify_chat(session.handle, &channel, &notice, message_id)
                .await;
            return DispatchOutcome::Forbidden;
        }

        let ctx = CommandContext::new(
            registration,
            invoker.clone(),
            command,
            args,
            message_id.map(str::to_string),
            session.handle,
            Arc::clone(&self.client),
        );
        match handler.run(&ctx).await {
            Ok(()) => DispatchOutcome::Handled,
            Err(e) => {
                warn!(channel = %channel, command = %ctx.command, error = %e, "command failed");
                DispatchOutcome::Failed
            },
        }
    }

    /// Stop every session and timer.
    pub async fn shutdown(&self) {
        if let Some(task) = self
            .event_task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            task.abort();
        }
        self.scheduler.cancel_all();
        for channel in self.registry.channels() {
            self.stop(&channel).await;
        }
        info!("all channel sessions stopped");
    }

    async fn start_locked(self: &Arc<Self>, channel: &str) -> Result<Session> {
        if let Some(session) = self.registry.get(channel) {
            return Ok(session);
        }

        let registration = self
            .store
            .get(channel)
            .await
            .map_err(|e| Error::store(channel, e))?
            .ok_or_else(|| Error::not_registered(channel))?;
        let now = unix_now();
        let registration = self.ensure_fresh(registration, now).await?;
        let strategy = self.factory.build(&registration)?;

        let handle = self
            .client
            .connect(strategy.credential(), channel)
            .await
            .map_err(|e| Error::connection_failed(channel, e))?;
        let sink = Arc::new(ManagerSink {
            manager: Arc::downgrade(self),
        });
        if let Err(e) = self.client.on_message(handle, sink).await {
            self.disconnect_quietly(channel, handle).await;
            return Err(Error::connection_failed(channel, e));
        }

        let session = Session {
            channel: channel.to_string(),
            handle,
            auth_level: strategy.auth_level(),
            created_at: now,
        };
        if let Err(e) = self.registry.put(session.clone()) {
            self.disconnect_quietly(channel, handle).await;
            return Err(e);
        }

        if let AuthStrategy::Refreshing(refreshing) = &strategy {
            let delay = refreshing
                .expires_at()
                .map_or(Duration::ZERO, |at| refresh_delay(at - now));
            self.scheduler
                .schedule(channel, refreshing.refresh_token().clone(), delay);
        }

        info!(
            channel,
            auth_level = %session.auth_level,
            handle = %handle,
            "session started"
        );
        Ok(session)
    }

    async fn stop_locked(&self, channel: &str) -> bool {
        self.scheduler.cancel(channel);
        let Some(session) = self.registry.remove(channel) else {
            return false;
        };
        self.disconnect_quietly(channel, session.handle).await;
        info!(channel, handle = %session.handle, "session stopped");
        true
    }

    async fn disconnect_quietly(&self, channel: &str, handle: ConnectionHandle) {
        if let Err(e) = self.client.disconnect(handle).await {
            warn!(channel, handle = %handle, error = %e, "failed to disconnect");
        }
    }

    async fn ensure_registered(&self, channel: &str) -> Result<()> {
        let existing = self
            .store
            .get(channel)
            .await
            .map_err(|e| Error::store(channel, e))?;
        if existing.is_none() {
            self.store
                .upsert(ChannelRegistration::new_irc(channel, unix_now()))
                .await
                .map_err(|e| Error::store(channel, e))?;
            info!(channel, "registered channel on the shared credential");
        }
        Ok(())
    }

    /// Refresh an `oauth` registration whose access token is no longer
    /// accepted, before connecting with it.
    async fn ensure_fresh(
        &self,
        mut registration: ChannelRegistration,
        now: i64,
    ) -> Result<ChannelRegistration> {
        if registration.auth_level != AuthLevel::Oauth {
            return Ok(registration);
        }
        let Some((access, refresh)) = registration
            .tokens()
            .map(|(access, refresh)| (access.clone(), refresh.clone()))
        else {
            return Ok(registration);
        };
        let channel = registration.username.clone();

        let needs_refresh = match self.exchange.validate(access.expose_secret()).await {
            Ok(validation) if validation.expires_in == 0 => true,
            Ok(validation) => {
                registration.token_expires_at = Some(
                    now.saturating_add(i64::try_from(validation.expires_in).unwrap_or(i64::MAX)),
                );
                false
            },
            Err(e) if e.is_invalid_token() => true,
            Err(e) => {
                warn!(channel = %channel, error = %e, "token validation unavailable, using stored expiry");
                registration.expires_in(now).is_some_and(|secs| secs <= 0)
            },
        };
        if !needs_refresh {
            return Ok(registration);
        }

        info!(channel = %channel, "access token expired, refreshing before connect");
        let grant = self.factory.refresher().refresh(&channel, &refresh).await?;
        registration.apply_tokens(token_set(&grant, now), now);
        Ok(registration)
    }

    async fn notify_chat(
        &self,
        handle: ConnectionHandle,
        channel: &str,
        text: &str,
        reply_to: Option<&str>,
    ) {
        if let Err(e) = self.client.send(handle, channel, text, reply_to).await {
            warn!(channel, error = %e, "failed to send notice");
        }
    }

    fn spawn_event_loop(self: &Arc<Self>) {
        let Some(mut events) = self
            .events
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        else {
            return;
        };
        let manager = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                manager.handle_event(event).await;
            }
        });
        *self.event_task.lock().unwrap_or_else(|e| e.into_inner()) = Some(task);
    }

    async fn handle_event(self: &Arc<Self>, event: SessionEvent) {
        match event {
            SessionEvent::CredentialsRotated { channel } => {
                let _guard = self.locks.lock(&channel).await;
                if !self.registry.has(&channel) {
                    debug!(channel = %channel, "credentials rotated for a stopped channel");
                    return;
                }
                self.stop_locked(&channel).await;
                if let Err(e) = self.start_locked(&channel).await {
                    error!(channel = %channel, error = %e, "failed to reconnect after credential rotation");
                }
            },
        }
    }
}

fn normalize(channel: &str) -> Result<String> {
    let normalized = ChannelRegistration::normalize_username(channel);
    if normalized.is_empty() || normalized.contains(char::is_whitespace) {
        return Err(Error::InvalidChannel {
            channel: channel.to_string(),
        });
    }
    Ok(normalized)
}

/// Feeds inbound messages from live connections back into dispatch.
struct ManagerSink {
    manager: Weak<SessionManager>,
}

#[async_trait]
impl MessageSink for ManagerSink {
    async fn deliver(&self, handle: ConnectionHandle, message: InboundMessage) {
        let Some(manager) = self.manager.upgrade() else {
            return;
        };
        let channel = ChannelRegistration::normalize_username(&message.channel);
        if manager
            .registry
            .get(&channel)
            .is_none_or(|session| session.handle != handle)
        {
            debug!(channel = %channel, handle = %handle, "message from a closed connection dropped");
            return;
        }
        tokio::spawn(async move {
            manager
                .dispatch(
                    &message.channel,
                    &message.text,
                    &message.sender,
                    message.message_id.as_deref(),
                )
                .await;
        });
    }
}
