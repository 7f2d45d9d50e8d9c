use {anyhow::Result, async_trait::async_trait};

use crate::registration::{ChannelPatch, ChannelRegistration};

/// Persistent storage for channel registrations.
///
/// Implementations must refuse writes that downgrade an `oauth` record to
/// `irc` with [`crate::Error::InvalidTransition`].
#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn get(&self, username: &str) -> Result<Option<ChannelRegistration>>;
    async fn list(&self) -> Result<Vec<ChannelRegistration>>;
    async fn upsert(&self, registration: ChannelRegistration) -> Result<()>;
    /// Apply a partial update and return the stored record.
    async fn update(&self, username: &str, patch: ChannelPatch) -> Result<ChannelRegistration>;
    /// Deleting a missing record is not an error.
    async fn delete(&self, username: &str) -> Result<()>;
}
