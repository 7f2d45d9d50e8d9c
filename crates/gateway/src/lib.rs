//! Runtime wiring for ladderbot.
//!
//! Opens the SQLite channel store, builds the IRC client, the OAuth token
//! exchange and the operator notification sink from [`LadderbotConfig`],
//! registers the session-management chat commands, and starts the
//! [`SessionManager`].
//!
//! [`LadderbotConfig`]: ladderbot_config::LadderbotConfig
//! [`SessionManager`]: ladderbot_sessions::SessionManager

pub mod admin_commands;
pub mod channel_store;
pub mod notify;
pub mod server;

pub use {
    admin_commands::register_admin_commands,
    channel_store::SqliteChannelStore,
    notify::{LogNotificationSink, WebhookNotificationSink},
    server::{Gateway, open_database, run_migrations},
};
