//! In-memory channel store.

use std::{collections::HashMap, sync::Mutex};

use {anyhow::Result, async_trait::async_trait};

use crate::{
    Error,
    registration::{AuthLevel, ChannelPatch, ChannelRegistration},
    store::ChannelStore,
};

/// `HashMap`-backed store. Nothing survives a restart; used by tests and
/// dry runs.
pub struct InMemoryChannelStore {
    channels: Mutex<HashMap<String, ChannelRegistration>>,
}

impl InMemoryChannelStore {
    pub fn new() -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
        }
    }

    /// Seed the store with existing records.
    pub fn with_registrations(registrations: impl IntoIterator<Item = ChannelRegistration>) -> Self {
        let channels = registrations
            .into_iter()
            .map(|r| (r.username.clone(), r))
            .collect();
        Self {
            channels: Mutex::new(channels),
        }
    }
}

impl Default for InMemoryChannelStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn get(&self, username: &str) -> Result<Option<ChannelRegistration>> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        Ok(channels.get(username).cloned())
    }

    async fn list(&self) -> Result<Vec<ChannelRegistration>> {
        let channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<_> = channels.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(all)
    }

    async fn upsert(&self, registration: ChannelRegistration) -> Result<()> {
        registration.validate()?;
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(existing) = channels.get(&registration.username)
            && existing.auth_level == AuthLevel::Oauth
            && registration.auth_level == AuthLevel::Irc
        {
            return Err(Error::invalid_transition(&registration.username).into());
        }
        let created_at = channels
            .get(&registration.username)
            .map_or(registration.created_at, |existing| existing.created_at);
        let username = registration.username.clone();
        channels.insert(username, ChannelRegistration {
            created_at,
            ..registration
        });
        Ok(())
    }

    async fn update(&self, username: &str, patch: ChannelPatch) -> Result<ChannelRegistration> {
        patch.validate()?;
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        let registration = channels
            .get_mut(username)
            .ok_or_else(|| Error::unknown_channel(username))?;
        registration.apply_patch(patch);
        Ok(registration.clone())
    }

    async fn delete(&self, username: &str) -> Result<()> {
        let mut channels = self.channels.lock().unwrap_or_else(|e| e.into_inner());
        channels.remove(username);
        Ok(())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::registration::TokenSet, secrecy::ExposeSecret};

    #[tokio::test]
    async fn upsert_and_get() {
        let store = InMemoryChannelStore::new();
        store
            .upsert(ChannelRegistration::new_irc("foo", 10))
            .await
            .unwrap();

        let got = store.get("foo").await.unwrap().unwrap();
        assert_eq!(got.auth_level, AuthLevel::Irc);
        assert!(store.get("bar").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn upsert_refuses_downgrade() {
        let store = InMemoryChannelStore::new();
        store
            .upsert(ChannelRegistration::new_oauth(
                "foo",
                TokenSet::new("a", "r", 100),
                10,
            ))
            .await
            .unwrap();

        let err = store
            .upsert(ChannelRegistration::new_irc("foo", 20))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::InvalidTransition { .. })
        ));
        let got = store.get("foo").await.unwrap().unwrap();
        assert_eq!(got.auth_level, AuthLevel::Oauth);
    }

    #[tokio::test]
    async fn upsert_keeps_created_at() {
        let store = InMemoryChannelStore::new();
        store
            .upsert(ChannelRegistration::new_irc("foo", 10))
            .await
            .unwrap();
        store
            .upsert(ChannelRegistration::new_oauth(
                "foo",
                TokenSet::new("a", "r", 100),
                50,
            ))
            .await
            .unwrap();

        let got = store.get("foo").await.unwrap().unwrap();
        assert_eq!(got.created_at, 10);
        assert_eq!(got.updated_at, 50);
    }

    #[tokio::test]
    async fn update_writes_tokens() {
        let store = InMemoryChannelStore::new();
        store
            .upsert(ChannelRegistration::new_irc("foo", 10))
            .await
            .unwrap();

        let updated = store
            .update("foo", ChannelPatch::tokens(TokenSet::new("a2", "r2", 999), 20))
            .await
            .unwrap();
        assert_eq!(updated.auth_level, AuthLevel::Oauth);

        let got = store.get("foo").await.unwrap().unwrap();
        assert_eq!(got.access_token.unwrap().expose_secret(), "a2");
        assert_eq!(got.refresh_token.unwrap().expose_secret(), "r2");
    }

    #[tokio::test]
    async fn update_unknown_channel_errors() {
        let store = InMemoryChannelStore::new();
        let err = store
            .update("nope", ChannelPatch::player_id(None, 1))
            .await
            .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<Error>(),
            Some(Error::UnknownChannel { .. })
        ));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = InMemoryChannelStore::new();
        store
            .upsert(ChannelRegistration::new_irc("foo", 10))
            .await
            .unwrap();
        store.delete("foo").await.unwrap();
        store.delete("foo").await.unwrap();
        assert!(store.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_orders_by_recent_update() {
        let store = InMemoryChannelStore::with_registrations([
            ChannelRegistration::new_irc("old", 100),
            ChannelRegistration::new_irc("new", 200),
        ]);
        let all = store.list().await.unwrap();
        assert_eq!(all[0].username, "new");
        assert_eq!(all[1].username, "old");
    }
}
