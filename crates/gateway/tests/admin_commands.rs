#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicU64, Ordering},
};

use {
    anyhow::Result,
    async_trait::async_trait,
    ladderbot_channels::{
        ChannelRegistration, ChannelStore, ChatCredential, ChatNetworkClient, ConnectionHandle,
        InMemoryChannelStore, Invoker, MessageSink,
    },
    ladderbot_config::{BotConfig, LadderbotConfig, RolesConfig},
    ladderbot_gateway::Gateway,
    ladderbot_oauth::{TokenExchange, TokenGrant, TokenValidation},
    ladderbot_sessions::DispatchOutcome,
    secrecy::Secret,
};

#[derive(Default)]
struct RecordingClient {
    next: AtomicU64,
    connected: Mutex<Vec<String>>,
    disconnects: Mutex<Vec<ConnectionHandle>>,
    sent: Mutex<Vec<(String, String, Option<String>)>>,
}

impl RecordingClient {
    fn last_reply(&self) -> (String, String, Option<String>) {
        self.sent.lock().unwrap().last().cloned().expect("nothing sent")
    }

    fn replies(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|(_, text, _)| text.clone())
            .collect()
    }
}

#[async_trait]
impl ChatNetworkClient for RecordingClient {
    async fn connect(&self, _credential: &ChatCredential, channel: &str) -> Result<ConnectionHandle> {
        self.connected.lock().unwrap().push(channel.to_string());
        Ok(ConnectionHandle::new(self.next.fetch_add(1, Ordering::SeqCst) + 1))
    }

    async fn send(
        &self,
        _handle: ConnectionHandle,
        channel: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> Result<()> {
        self.sent.lock().unwrap().push((
            channel.to_string(),
            text.to_string(),
            reply_to.map(str::to_string),
        ));
        Ok(())
    }

    async fn on_message(&self, _handle: ConnectionHandle, _sink: Arc<dyn MessageSink>) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&self, handle: ConnectionHandle) -> Result<()> {
        self.disconnects.lock().unwrap().push(handle);
        Ok(())
    }
}

struct StaticExchange;

#[async_trait]
impl TokenExchange for StaticExchange {
    async fn refresh(&self, _refresh_token: &str) -> ladderbot_oauth::Result<TokenGrant> {
        Ok(TokenGrant::new("a2", "r2", 3600))
    }

    async fn validate(&self, _access_token: &str) -> ladderbot_oauth::Result<TokenValidation> {
        Ok(TokenValidation {
            expires_in: 3600,
            ..Default::default()
        })
    }
}

fn config(token: Option<&str>) -> LadderbotConfig {
    LadderbotConfig {
        bot: BotConfig {
            login: "ladderbot".into(),
            token: token.map(|t| Secret::new(t.to_string())),
            token_issued_at: None,
        },
        roles: RolesConfig {
            admins: vec!["alice".into()],
            superadmins: vec!["root".into()],
        },
        ..Default::default()
    }
}

async fn gateway() -> (Gateway, Arc<RecordingClient>, Arc<InMemoryChannelStore>) {
    let store = Arc::new(InMemoryChannelStore::with_registrations([
        ChannelRegistration::new_irc("foo", 1),
    ]));
    let client = Arc::new(RecordingClient::default());
    let gateway = Gateway::start_with(
        &config(Some("shared")),
        Arc::clone(&store) as Arc<dyn ChannelStore>,
        Arc::clone(&client) as Arc<dyn ChatNetworkClient>,
        Arc::new(StaticExchange),
    )
    .await
    .unwrap();
    (gateway, client, store)
}

#[tokio::test]
async fn start_joins_registered_and_superadmin_channels() {
    let (gateway, _client, store) = gateway().await;
    assert_eq!(gateway.manager().registry().channels(), vec!["foo", "root"]);
    assert!(store.get("root").await.unwrap().is_some());
    gateway.shutdown().await;
}

#[tokio::test]
async fn missing_bot_token_is_fatal() {
    let result = Gateway::start_with(
        &config(None),
        Arc::new(InMemoryChannelStore::new()),
        Arc::new(RecordingClient::default()),
        Arc::new(StaticExchange),
    )
    .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn channels_lists_live_sessions() {
    let (gateway, client, _store) = gateway().await;
    let manager = gateway.manager();

    let outcome = manager
        .dispatch("foo", "!channels", &Invoker::new("alice"), Some("m1"))
        .await;
    assert_eq!(outcome, DispatchOutcome::Handled);
    let (channel, text, reply_to) = client.last_reply();
    assert_eq!(channel, "foo");
    assert_eq!(text, "Connected to 2 channel(s): foo (irc), root (irc)");
    assert_eq!(reply_to.as_deref(), Some("m1"));

    let outcome = manager
        .dispatch("foo", "!channels", &Invoker::new("bob"), None)
        .await;
    assert_eq!(outcome, DispatchOutcome::Forbidden);
    gateway.shutdown().await;
}

#[tokio::test]
async fn join_and_part() {
    let (gateway, client, store) = gateway().await;
    let manager = gateway.manager();
    let alice = Invoker::new("alice");

    let outcome = manager.dispatch("foo", "!join #Bar", &alice, None).await;
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert_eq!(client.last_reply().1, "Joined #bar (irc).");
    assert!(manager.registry().has("bar"));
    assert!(store.get("bar").await.unwrap().is_some());

    manager.dispatch("foo", "!join bar", &alice, None).await;
    assert_eq!(client.last_reply().1, "Already in #bar.");

    manager.dispatch("foo", "!join", &alice, None).await;
    assert_eq!(client.last_reply().1, "Usage: !join <channel>");

    // Viewers may not part; the owner may part their own channel.
    let outcome = manager
        .dispatch("bar", "!part", &Invoker::new("bob"), None)
        .await;
    assert_eq!(outcome, DispatchOutcome::Forbidden);
    assert!(manager.registry().has("bar"));

    let outcome = manager
        .dispatch("bar", "!leave", &Invoker::new("bar"), None)
        .await;
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert!(!manager.registry().has("bar"));
    assert_eq!(client.last_reply().1, "Leaving #bar.");
    // Parting keeps the registration.
    assert!(store.get("bar").await.unwrap().is_some());

    // An owner cannot part someone else's channel.
    manager
        .dispatch("foo", "!part root", &Invoker::new("foo"), None)
        .await;
    assert_eq!(client.last_reply().1, "Only admins can part other channels.");
    assert!(manager.registry().has("root"));
    gateway.shutdown().await;
}

#[tokio::test]
async fn unlink_removes_registration_but_spares_superadmins() {
    let (gateway, client, store) = gateway().await;
    let manager = gateway.manager();
    let alice = Invoker::new("alice");

    manager.dispatch("foo", "!unlink root", &alice, None).await;
    assert_eq!(
        client.last_reply().1,
        "#root is a superadmin channel and stays linked."
    );
    assert!(store.get("root").await.unwrap().is_some());

    let outcome = manager.dispatch("foo", "!unlink", &alice, None).await;
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert!(!manager.registry().has("foo"));
    assert!(store.get("foo").await.unwrap().is_none());
    gateway.shutdown().await;
}

#[tokio::test]
async fn reload_picks_up_new_registrations() {
    let (gateway, client, store) = gateway().await;
    let manager = gateway.manager();
    store
        .upsert(ChannelRegistration::new_irc("baz", 5))
        .await
        .unwrap();

    let outcome = manager
        .dispatch("foo", "!reload", &Invoker::new("alice"), None)
        .await;
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert!(manager.registry().has("baz"));
    assert_eq!(client.last_reply().1, "Reloaded channels: 1 started.");
    gateway.shutdown().await;
}

#[tokio::test]
async fn resetdb_is_superadmin_only() {
    let (gateway, client, store) = gateway().await;
    let manager = gateway.manager();

    let outcome = manager
        .dispatch("foo", "!resetdb", &Invoker::new("alice"), None)
        .await;
    assert_eq!(outcome, DispatchOutcome::Forbidden);
    assert_eq!(
        client.last_reply().1,
        "You don't have permission to use !resetdb."
    );

    let outcome = manager
        .dispatch("root", "!resetdb", &Invoker::new("root"), None)
        .await;
    assert_eq!(outcome, DispatchOutcome::Handled);
    assert!(client.replies().contains(&"Resetting the channel database.".to_string()));
    assert_eq!(manager.registry().channels(), vec!["root"]);
    let remaining: Vec<String> = store
        .list()
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.username)
        .collect();
    assert_eq!(remaining, vec!["root"]);
    gateway.shutdown().await;
}

#[tokio::test]
async fn shutdown_disconnects_everything() {
    let (gateway, client, _store) = gateway().await;
    let manager = Arc::clone(gateway.manager());
    gateway.shutdown().await;
    assert!(manager.registry().is_empty());
    assert_eq!(client.disconnects.lock().unwrap().len(), 2);
    assert_eq!(client.connected.lock().unwrap().len(), 2);
}
