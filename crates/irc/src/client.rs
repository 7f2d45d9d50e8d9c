use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    anyhow::{Context, anyhow, bail},
    async_trait::async_trait,
    futures::{SinkExt, StreamExt},
    ladderbot_channels::{
        ChatCredential, ChatNetworkClient, ConnectionHandle, InboundMessage, Invoker, MessageSink,
    },
    secrecy::ExposeSecret,
    tokio::{net::TcpStream, sync::mpsc},
    tokio_util::{codec::Framed, sync::CancellationToken},
    tracing::{debug, info, warn},
};

use crate::{codec::IrcCodec, message::Message};

type Transport = Framed<TcpStream, IrcCodec>;
type SinkSlot = Arc<RwLock<Option<Arc<dyn MessageSink>>>>;

const CAPABILITIES: &str = "twitch.tv/tags twitch.tv/commands";

/// Where and how to reach the chat server.
#[derive(Debug, Clone)]
pub struct IrcClientConfig {
    pub host: String,
    pub port: u16,
    /// How long to wait for the welcome numeric after `NICK`.
    pub login_timeout: Duration,
}

impl Default for IrcClientConfig {
    fn default() -> Self {
        Self {
            host: "irc.chat.twitch.tv".into(),
            port: 6667,
            login_timeout: Duration::from_secs(10),
        }
    }
}

struct Connection {
    channel: String,
    outgoing: mpsc::UnboundedSender<Message>,
    sink: SinkSlot,
    cancel: CancellationToken,
}

/// [`ChatNetworkClient`] speaking Twitch-flavoured IRC, one socket per channel.
pub struct IrcClient {
    config: IrcClientConfig,
    next_id: AtomicU64,
    connections: Mutex<HashMap<ConnectionHandle, Connection>>,
}

impl IrcClient {
    pub fn new(config: IrcClientConfig) -> Self {
        Self {
            config,
            next_id: AtomicU64::new(1),
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Number of connections not yet disconnected.
    pub fn connection_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<ConnectionHandle, Connection>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ChatNetworkClient for IrcClient {
    async fn connect(
        &self,
        credential: &ChatCredential,
        channel: &str,
    ) -> anyhow::Result<ConnectionHandle> {
        let channel = channel.trim_start_matches('#').to_lowercase();
        let addr = (self.config.host.as_str(), self.config.port);
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to {}:{}", self.config.host, self.config.port))?;
        let mut transport = Framed::new(stream, IrcCodec);

        authenticate(&mut transport, credential, self.config.login_timeout).await?;
        transport
            .send(Message::new("JOIN", vec![format!("#{channel}")]))
            .await?;

        let handle = ConnectionHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (outgoing, rx) = mpsc::unbounded_channel();
        let sink: SinkSlot = Arc::new(RwLock::new(None));
        let cancel = CancellationToken::new();

        tokio::spawn(drive(
            handle,
            transport,
            rx,
            Arc::clone(&sink),
            cancel.clone(),
        ));
        self.lock().insert(handle, Connection {
            channel: channel.clone(),
            outgoing,
            sink,
            cancel,
        });

        info!(channel = %channel, login = %credential.login, %handle, "joined channel");
        Ok(handle)
    }

    async fn send(
        &self,
        handle: ConnectionHandle,
        channel: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> anyhow::Result<()> {
        let outgoing = self
            .lock()
            .get(&handle)
            .map(|c| c.outgoing.clone())
            .ok_or_else(|| anyhow!("unknown connection {handle}"))?;

        let target = format!("#{}", channel.trim_start_matches('#'));
        let mut message = Message::new("PRIVMSG", vec![target, text.replace(['\r', '\n'], " ")]);
        if let Some(parent) = reply_to {
            message = message.with_tag("reply-parent-msg-id", parent);
        }
        outgoing
            .send(message)
            .map_err(|_| anyhow!("connection {handle} is closed"))
    }

    async fn on_message(
        &self,
        handle: ConnectionHandle,
        sink: Arc<dyn MessageSink>,
    ) -> anyhow::Result<()> {
        let connections = self.lock();
        let conn = connections
            .get(&handle)
            .ok_or_else(|| anyhow!("unknown connection {handle}"))?;
        *conn.sink.write().unwrap_or_else(|e| e.into_inner()) = Some(sink);
        Ok(())
    }

    async fn disconnect(&self, handle: ConnectionHandle) -> anyhow::Result<()> {
        if let Some(conn) = self.lock().remove(&handle) {
            conn.cancel.cancel();
            debug!(channel = %conn.channel, %handle, "disconnecting");
        }
        Ok(())
    }
}

async fn authenticate(
    transport: &mut Transport,
    credential: &ChatCredential,
    timeout: Duration,
) -> anyhow::Result<()> {
    let token = credential.token.expose_secret();
    let pass = if token.starts_with("oauth:") {
        token.clone()
    } else {
        format!("oauth:{token}")
    };

    transport
        .send(Message::new("CAP", vec!["REQ".into(), CAPABILITIES.into()]))
        .await?;
    transport.send(Message::new("PASS", vec![pass])).await?;
    transport
        .send(Message::new("NICK", vec![credential.login.to_lowercase()]))
        .await?;

    tokio::time::timeout(timeout, await_welcome(transport))
        .await
        .map_err(|_| anyhow!("timed out waiting for login confirmation"))?
}

async fn await_welcome(transport: &mut Transport) -> anyhow::Result<()> {
    while let Some(message) = transport.next().await {
        let message = message?;
        match message.command.as_str() {
            "001" => return Ok(()),
            "PING" => transport.send(pong(&message)).await?,
            "NOTICE" => {
                let text = message.params.last().map(String::as_str).unwrap_or_default();
                if text.contains("authentication failed") || text.contains("Improperly formatted auth") {
                    bail!("login rejected: {text}");
                }
            },
            _ => {},
        }
    }
    bail!("connection closed during login")
}

async fn drive(
    handle: ConnectionHandle,
    mut transport: Transport,
    mut outgoing: mpsc::UnboundedReceiver<Message>,
    sink: SinkSlot,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                if let Err(e) = transport.send(Message::new("QUIT", vec![])).await {
                    debug!(%handle, error = %e, "failed to send QUIT");
                }
                break;
            },
            Some(message) = outgoing.recv() => {
                if let Err(e) = transport.send(message).await {
                    warn!(%handle, error = %e, "write failed, closing connection");
                    break;
                }
            },
            incoming = transport.next() => match incoming {
                Some(Ok(message)) => {
                    if !handle_incoming(handle, &mut transport, &sink, message).await {
                        break;
                    }
                },
                Some(Err(e)) => {
                    warn!(%handle, error = %e, "read failed, closing connection");
                    break;
                },
                None => {
                    warn!(%handle, "connection closed by server");
                    break;
                },
            },
        }
    }
}

/// Returns `false` when the connection should close.
async fn handle_incoming(
    handle: ConnectionHandle,
    transport: &mut Transport,
    sink: &SinkSlot,
    message: Message,
) -> bool {
    match message.command.as_str() {
        "PING" => {
            if let Err(e) = transport.send(pong(&message)).await {
                warn!(%handle, error = %e, "failed to answer PING");
                return false;
            }
        },
        "PRIVMSG" => {
            let Some(inbound) = to_inbound(&message) else {
                debug!(%handle, "ignoring PRIVMSG without channel or text");
                return true;
            };
            let target = sink.read().unwrap_or_else(|e| e.into_inner()).clone();
            match target {
                Some(target) => target.deliver(handle, inbound).await,
                None => debug!(%handle, "no sink registered, dropping message"),
            }
        },
        "NOTICE" => {
            let text = message.params.last().map(String::as_str).unwrap_or_default();
            info!(%handle, msg_id = message.tag("msg-id"), text, "server notice");
        },
        "RECONNECT" => {
            warn!(%handle, "server requested reconnect");
            return false;
        },
        _ => {},
    }
    true
}

fn pong(ping: &Message) -> Message {
    Message::new("PONG", ping.params.clone())
}

fn to_inbound(message: &Message) -> Option<InboundMessage> {
    let channel = message.param(0)?.trim_start_matches('#').to_lowercase();
    let text = message.param(1)?.to_string();
    let username = message
        .tag("login")
        .filter(|l| !l.is_empty())
        .or_else(|| message.nick())?;

    let badges = message.tag("badges").unwrap_or_default();
    let has_badge = |name: &str| badges.split(',').any(|b| b.split('/').next() == Some(name));

    let mut sender = Invoker::new(username);
    sender.display_name = message
        .tag("display-name")
        .filter(|d| !d.is_empty())
        .map(str::to_string);
    sender.is_broadcaster = has_badge("broadcaster") || sender.username == channel;
    sender.is_moderator = message.tag("mod") == Some("1") || has_badge("moderator");

    Some(InboundMessage {
        channel,
        text,
        sender,
        message_id: message.tag("id").filter(|i| !i.is_empty()).map(str::to_string),
    })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn privmsg(line: &str) -> InboundMessage {
        to_inbound(&Message::parse(line).unwrap()).unwrap()
    }

    #[test]
    fn moderator_from_mod_tag() {
        let msg = privmsg(
            "@badges=;display-name=Alice;id=m1;mod=1 :alice!alice@alice.tmi.twitch.tv PRIVMSG #Foo :!title hi",
        );
        assert_eq!(msg.channel, "foo");
        assert_eq!(msg.text, "!title hi");
        assert_eq!(msg.sender.username, "alice");
        assert_eq!(msg.sender.display_name.as_deref(), Some("Alice"));
        assert!(msg.sender.is_moderator);
        assert!(!msg.sender.is_broadcaster);
        assert_eq!(msg.message_id.as_deref(), Some("m1"));
    }

    #[test]
    fn broadcaster_from_badge_or_name() {
        let badge = privmsg("@badges=broadcaster/1;mod=0 :foo!foo@x PRIVMSG #foo :hi");
        assert!(badge.sender.is_broadcaster);
        assert!(!badge.sender.is_moderator);

        let untagged = privmsg(":foo!foo@x PRIVMSG #foo :hi");
        assert!(untagged.sender.is_broadcaster);
        assert_eq!(untagged.message_id, None);
    }

    #[test]
    fn badge_prefix_does_not_match_longer_names() {
        let msg = privmsg("@badges=moderator-ish/1 :bob!bob@x PRIVMSG #foo :hi");
        assert!(!msg.sender.is_moderator);
    }

    #[test]
    fn privmsg_without_text_is_dropped() {
        assert!(to_inbound(&Message::parse(":bob!bob@x PRIVMSG #foo").unwrap()).is_none());
    }

    #[test]
    fn pong_echoes_ping_params() {
        let ping = Message::parse("PING :tmi.twitch.tv").unwrap();
        assert_eq!(pong(&ping).to_wire(), "PONG tmi.twitch.tv");
    }
}
