use std::sync::Arc;

use {
    anyhow::Result,
    async_trait::async_trait,
    secrecy::Secret,
    tracing::warn,
};

/// Opaque id of one live connection owned by a [`ChatNetworkClient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Login name plus access token presented during the chat handshake.
#[derive(Clone)]
pub struct ChatCredential {
    pub login: String,
    pub token: Secret<String>,
}

impl ChatCredential {
    pub fn new(login: impl Into<String>, token: Secret<String>) -> Self {
        Self {
            login: login.into(),
            token,
        }
    }
}

impl std::fmt::Debug for ChatCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCredential")
            .field("login", &self.login)
            .field("token", &"[REDACTED]")
            .finish()
    }
}

/// The chat user who sent a message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invoker {
    /// Lowercase login name.
    pub username: String,
    pub display_name: Option<String>,
    pub is_moderator: bool,
    pub is_broadcaster: bool,
}

impl Invoker {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into().to_lowercase(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn moderator(mut self) -> Self {
        self.is_moderator = true;
        self
    }

    #[must_use]
    pub fn broadcaster(mut self) -> Self {
        self.is_broadcaster = true;
        self
    }
}

/// A chat line received on one channel.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    /// Channel name without the `#` prefix.
    pub channel: String,
    pub text: String,
    pub sender: Invoker,
    /// Network message id, used to thread replies.
    pub message_id: Option<String>,
}

/// Receives inbound messages for a connection.
#[async_trait]
pub trait MessageSink: Send + Sync {
    async fn deliver(&self, handle: ConnectionHandle, message: InboundMessage);
}

/// Transport to the chat network. One connection serves one channel.
#[async_trait]
pub trait ChatNetworkClient: Send + Sync {
    /// Authenticate with `credential` and join `channel`.
    async fn connect(&self, credential: &ChatCredential, channel: &str) -> Result<ConnectionHandle>;

    async fn send(
        &self,
        handle: ConnectionHandle,
        channel: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<()>;

    /// Route inbound messages of `handle` to `sink`, replacing any previous sink.
    async fn on_message(&self, handle: ConnectionHandle, sink: Arc<dyn MessageSink>) -> Result<()>;

    /// Close the connection. Unknown handles are ignored.
    async fn disconnect(&self, handle: ConnectionHandle) -> Result<()>;
}

/// Operator-facing notification channel (webhook, log, ...).
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, message: &str) -> Result<()>;
}

/// Send a notification, logging and swallowing any failure.
pub async fn notify_quietly(sink: &dyn NotificationSink, message: &str) {
    if let Err(e) = sink.notify(message).await {
        warn!(error = %e, "failed to deliver operator notification");
    }
}
