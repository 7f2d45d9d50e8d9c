//! Offline channel registry management against the SQLite store.

use std::path::Path;

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    ladderbot_channels::{ChannelRegistration, ChannelStore, unix_now},
    ladderbot_config::LadderbotConfig,
    ladderbot_gateway::{SqliteChannelStore, open_database},
};

#[derive(Subcommand)]
pub enum ChannelAction {
    /// List registered channels and their authorization tier.
    List,
    /// Register a channel on the bot's shared credential.
    Add {
        /// Channel name, with or without `#`.
        channel: String,
    },
    /// Delete a channel registration and any tokens stored for it.
    Remove {
        channel: String,
    },
}

pub async fn handle_channels(
    action: ChannelAction,
    config: &LadderbotConfig,
    data_dir: &Path,
) -> Result<()> {
    let pool = open_database(&config.database.resolve(data_dir)).await?;
    let store = SqliteChannelStore::new(pool);

    match action {
        ChannelAction::List => list(&store).await,
        ChannelAction::Add { channel } => add(&store, &channel).await,
        ChannelAction::Remove { channel } => remove(&store, &channel).await,
    }
}

async fn list(store: &SqliteChannelStore) -> Result<()> {
    let channels = store.list().await?;
    if channels.is_empty() {
        eprintln!("No channels registered.");
        return Ok(());
    }
    println!("{:<26} {:<6} {:<26} {}", "CHANNEL", "TIER", "TOKEN EXPIRES", "UPDATED");
    for channel in &channels {
        let expires = channel
            .token_expires_at
            .map_or_else(|| "-".to_string(), format_timestamp);
        println!(
            "{:<26} {:<6} {:<26} {}",
            channel.username,
            channel.auth_level,
            expires,
            format_timestamp(channel.updated_at)
        );
    }
    Ok(())
}

async fn add(store: &SqliteChannelStore, raw: &str) -> Result<()> {
    let channel = ChannelRegistration::normalize_username(raw);
    if channel.is_empty() || channel.contains(char::is_whitespace) {
        bail!("invalid channel name: {raw:?}");
    }
    if let Some(existing) = store.get(&channel).await? {
        eprintln!("#{channel} is already registered ({}).", existing.auth_level);
        return Ok(());
    }
    store
        .upsert(ChannelRegistration::new_irc(&channel, unix_now()))
        .await?;
    eprintln!("Registered #{channel}. A running bot picks it up on !reload or restart.");
    Ok(())
}

async fn remove(store: &SqliteChannelStore, raw: &str) -> Result<()> {
    let channel = ChannelRegistration::normalize_username(raw);
    if store.get(&channel).await?.is_none() {
        eprintln!("#{channel} is not registered.");
        return Ok(());
    }
    store.delete(&channel).await?;
    eprintln!("Removed #{channel}.");
    Ok(())
}

fn format_timestamp(secs: i64) -> String {
    chrono::DateTime::from_timestamp(secs, 0)
        .map_or_else(|| secs.to_string(), |t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_render_in_utc() {
        assert_eq!(format_timestamp(0), "1970-01-01 00:00:00 UTC");
        assert_eq!(format_timestamp(1_700_000_000), "2023-11-14 22:13:20 UTC");
    }
}
