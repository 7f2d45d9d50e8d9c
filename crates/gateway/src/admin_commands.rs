//! Chat commands that manage the bot's own channel sessions.
//!
//! Handlers hold a [`Weak`] reference: the manager owns the command registry
//! they are registered in.

use std::sync::{Arc, Weak};

use {
    anyhow::{Result, anyhow},
    async_trait::async_trait,
    ladderbot_channels::{
        ChannelRegistration, CommandContext, CommandHandler, CommandRegistry, CommandRequirement,
    },
    ladderbot_sessions::{Error, SessionManager},
    tracing::{info, warn},
};

/// Register `!join`, `!part`, `!unlink`, `!channels`, `!reload` and `!resetdb`.
pub fn register_admin_commands(registry: &mut CommandRegistry, manager: Weak<SessionManager>) {
    registry.register(Arc::new(JoinCommand(manager.clone())));
    registry.register(Arc::new(PartCommand(manager.clone())));
    registry.register(Arc::new(UnlinkCommand(manager.clone())));
    registry.register(Arc::new(ChannelsCommand(manager.clone())));
    registry.register(Arc::new(ReloadCommand(manager.clone())));
    registry.register(Arc::new(ResetDbCommand(manager)));
}

fn upgrade(manager: &Weak<SessionManager>) -> Result<Arc<SessionManager>> {
    manager
        .upgrade()
        .ok_or_else(|| anyhow!("session manager has shut down"))
}

/// Channel named by the first argument, or the channel the command came from.
fn target_channel(ctx: &CommandContext) -> String {
    ctx.args
        .first()
        .map_or_else(|| ctx.channel.username.clone(), |arg| {
            ChannelRegistration::normalize_username(arg)
        })
}

pub struct JoinCommand(Weak<SessionManager>);

#[async_trait]
impl CommandHandler for JoinCommand {
    fn name(&self) -> &str {
        "join"
    }

    fn requirement(&self) -> CommandRequirement {
        CommandRequirement::Admin
    }

    async fn run(&self, ctx: &CommandContext) -> Result<()> {
        let Some(arg) = ctx.args.first() else {
            return ctx.reply("Usage: !join <channel>").await;
        };
        let manager = upgrade(&self.0)?;
        let channel = ChannelRegistration::normalize_username(arg);
        match manager.admin_join(&ctx.invoker.username, &channel).await {
            Ok(session) => {
                info!(channel = %channel, by = %ctx.invoker.username, "joined by admin command");
                ctx.reply(&format!("Joined #{} ({}).", session.channel, session.auth_level))
                    .await
            },
            Err(Error::AlreadyConnected { .. }) => {
                ctx.reply(&format!("Already in #{channel}.")).await
            },
            Err(e @ Error::NotPermitted { .. }) => ctx.reply(&e.to_string()).await,
            Err(e) => {
                warn!(channel = %channel, error = %e, "admin join failed");
                ctx.reply(&format!("Could not join #{channel}.")).await
            },
        }
    }
}

/// `!part [channel]`: the channel owner may part their own channel; parting
/// another one needs operator rights.
pub struct PartCommand(Weak<SessionManager>);

#[async_trait]
impl CommandHandler for PartCommand {
    fn name(&self) -> &str {
        "part"
    }

    fn aliases(&self) -> &[&str] {
        &["leave"]
    }

    fn requirement(&self) -> CommandRequirement {
        CommandRequirement::Owner
    }

    async fn run(&self, ctx: &CommandContext) -> Result<()> {
        let manager = upgrade(&self.0)?;
        let channel = target_channel(ctx);
        if channel != ctx.channel.username
            && !manager.roles().has_admin_privileges(&ctx.invoker.username)
        {
            return ctx.reply("Only admins can part other channels.").await;
        }
        // Reply first: parting the current channel closes this connection.
        if manager.registry().has(&channel) {
            ctx.reply(&format!("Leaving #{channel}.")).await?;
            manager.part(&channel).await;
            Ok(())
        } else {
            ctx.reply(&format!("Not in #{channel}.")).await
        }
    }
}

pub struct UnlinkCommand(Weak<SessionManager>);

#[async_trait]
impl CommandHandler for UnlinkCommand {
    fn name(&self) -> &str {
        "unlink"
    }

    fn requirement(&self) -> CommandRequirement {
        CommandRequirement::Admin
    }

    async fn run(&self, ctx: &CommandContext) -> Result<()> {
        let manager = upgrade(&self.0)?;
        let channel = target_channel(ctx);
        if manager.roles().is_super_admin(&channel) {
            return ctx
                .reply(&format!("#{channel} is a superadmin channel and stays linked."))
                .await;
        }
        ctx.reply(&format!("Unlinking #{channel}.")).await?;
        manager.unlink(&channel).await?;
        Ok(())
    }
}

pub struct ChannelsCommand(Weak<SessionManager>);

#[async_trait]
impl CommandHandler for ChannelsCommand {
    fn name(&self) -> &str {
        "channels"
    }

    fn requirement(&self) -> CommandRequirement {
        CommandRequirement::Admin
    }

    async fn run(&self, ctx: &CommandContext) -> Result<()> {
        let manager = upgrade(&self.0)?;
        let sessions = manager.sessions();
        if sessions.is_empty() {
            return ctx.reply("Not connected to any channel.").await;
        }
        let listed: Vec<String> = sessions
            .iter()
            .map(|s| format!("{} ({})", s.channel, s.auth_level))
            .collect();
        ctx.reply(&format!(
            "Connected to {} channel(s): {}",
            sessions.len(),
            listed.join(", ")
        ))
        .await
    }
}

pub struct ReloadCommand(Weak<SessionManager>);

#[async_trait]
impl CommandHandler for ReloadCommand {
    fn name(&self) -> &str {
        "reload"
    }

    fn requirement(&self) -> CommandRequirement {
        CommandRequirement::Admin
    }

    async fn run(&self, ctx: &CommandContext) -> Result<()> {
        let manager = upgrade(&self.0)?;
        let report = manager.reload().await?;
        let mut text = format!("Reloaded channels: {} started", report.started.len());
        if !report.failed.is_empty() {
            text.push_str(&format!(", {} failed ({})", report.failed.len(), report.failed.join(", ")));
        }
        text.push('.');
        ctx.reply(&text).await
    }
}

pub struct ResetDbCommand(Weak<SessionManager>);

#[async_trait]
impl CommandHandler for ResetDbCommand {
    fn name(&self) -> &str {
        "resetdb"
    }

    fn requirement(&self) -> CommandRequirement {
        CommandRequirement::SuperAdmin
    }

    async fn run(&self, ctx: &CommandContext) -> Result<()> {
        let manager = upgrade(&self.0)?;
        // Every session closes during the reset, this one included.
        ctx.reply("Resetting the channel database.").await?;
        let removed = manager.reset(&ctx.invoker.username).await?;
        info!(removed, by = %ctx.invoker.username, "channel database reset by chat command");
        Ok(())
    }
}
