use std::{collections::HashMap, sync::Arc};

use {anyhow::Result, async_trait::async_trait};

use crate::{
    permissions::{CommandRequirement, normalize_command},
    plugin::{ChatNetworkClient, ConnectionHandle, Invoker},
    registration::ChannelRegistration,
};

/// Split `!name arg1 arg2` into a normalized name and its arguments.
///
/// Returns `None` for lines that are not commands.
pub fn parse_command(text: &str) -> Option<(String, Vec<String>)> {
    let rest = text.trim().strip_prefix('!')?;
    if rest.starts_with(char::is_whitespace) {
        return None;
    }
    let mut parts = rest.split_whitespace();
    let name = normalize_command(parts.next()?);
    if name.is_empty() {
        return None;
    }
    Some((name, parts.map(str::to_string).collect()))
}

/// Everything a handler needs to run and reply.
pub struct CommandContext {
    pub channel: ChannelRegistration,
    pub invoker: Invoker,
    pub command: String,
    pub args: Vec<String>,
    pub message_id: Option<String>,
    handle: ConnectionHandle,
    client: Arc<dyn ChatNetworkClient>,
}

impl CommandContext {
    pub fn new(
        channel: ChannelRegistration,
        invoker: Invoker,
        command: String,
        args: Vec<String>,
        message_id: Option<String>,
        handle: ConnectionHandle,
        client: Arc<dyn ChatNetworkClient>,
    ) -> Self {
        Self {
            channel,
            invoker,
            command,
            args,
            message_id,
            handle,
            client,
        }
    }

    /// Live connection of the channel the command came from.
    pub fn handle(&self) -> ConnectionHandle {
        self.handle
    }

    /// Reply threaded to the triggering message.
    pub async fn reply(&self, text: &str) -> Result<()> {
        self.client
            .send(
                self.handle,
                &self.channel.username,
                text,
                self.message_id.as_deref(),
            )
            .await
    }

    /// Plain message into the channel.
    pub async fn say(&self, text: &str) -> Result<()> {
        self.client
            .send(self.handle, &self.channel.username, text, None)
            .await
    }
}

/// A chat command implementation.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// Canonical name, lowercase, without `!`.
    fn name(&self) -> &str;

    fn aliases(&self) -> &[&str] {
        &[]
    }

    fn requirement(&self) -> CommandRequirement {
        CommandRequirement::Anyone
    }

    async fn run(&self, ctx: &CommandContext) -> Result<()>;
}

/// Name → handler table, aliases included.
#[derive(Default)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler under its name and aliases. Later registrations win.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        for alias in handler.aliases() {
            self.handlers
                .insert(normalize_command(alias), Arc::clone(&handler));
        }
        self.handlers
            .insert(normalize_command(handler.name()), handler);
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&normalize_command(name)).cloned()
    }

    /// Canonical names of the registered handlers, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .handlers
            .values()
            .map(|h| normalize_command(h.name()))
            .collect();
        names.sort();
        names.dedup();
        names
    }

    pub fn len(&self) -> usize {
        self.names().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    struct Rank;

    #[async_trait]
    impl CommandHandler for Rank {
        fn name(&self) -> &str {
            "rank"
        }

        fn aliases(&self) -> &[&str] {
            &["elo", "!MMR"]
        }

        async fn run(&self, _ctx: &CommandContext) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn parses_command_lines() {
        assert_eq!(
            parse_command("!Rank  eu west"),
            Some(("rank".to_string(), vec!["eu".to_string(), "west".to_string()]))
        );
        assert_eq!(parse_command("  !ping"), Some(("ping".to_string(), vec![])));
        assert_eq!(parse_command("hello !rank"), None);
        assert_eq!(parse_command("!"), None);
        assert_eq!(parse_command("! rank"), None);
    }

    #[test]
    fn lookup_resolves_aliases() {
        let mut registry = CommandRegistry::new();
        registry.register(Arc::new(Rank));

        assert_eq!(registry.lookup("rank").unwrap().name(), "rank");
        assert_eq!(registry.lookup("ELO").unwrap().name(), "rank");
        assert_eq!(registry.lookup("!mmr").unwrap().name(), "rank");
        assert!(registry.lookup("match").is_none());
        assert_eq!(registry.names(), vec!["rank"]);
        assert_eq!(registry.len(), 1);
    }
}
