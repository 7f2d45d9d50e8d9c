use std::{
    collections::HashMap,
    sync::{Arc, Mutex, RwLock},
};

use {
    ladderbot_channels::{AuthLevel, ConnectionHandle},
    tokio::sync::OwnedMutexGuard,
};

use crate::{Error, Result};

/// A live connection to one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub channel: String,
    pub handle: ConnectionHandle,
    /// Tier the connection was opened with.
    pub auth_level: AuthLevel,
    pub created_at: i64,
}

/// Channel name → live session. At most one session per channel.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has(&self, channel: &str) -> bool {
        self.read().contains_key(channel)
    }

    pub fn get(&self, channel: &str) -> Option<Session> {
        self.read().get(channel).cloned()
    }

    /// Insert a session. Fails if the channel already has one.
    pub fn put(&self, session: Session) -> Result<()> {
        let mut sessions = self.sessions.write().unwrap_or_else(|e| e.into_inner());
        if sessions.contains_key(&session.channel) {
            return Err(Error::already_connected(&session.channel));
        }
        sessions.insert(session.channel.clone(), session);
        Ok(())
    }

    pub fn remove(&self, channel: &str) -> Option<Session> {
        self.sessions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(channel)
    }

    /// Connected channels, sorted.
    pub fn channels(&self) -> Vec<String> {
        let mut channels: Vec<String> = self.read().keys().cloned().collect();
        channels.sort();
        channels
    }

    pub fn sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.read().values().cloned().collect();
        sessions.sort_by(|a, b| a.channel.cmp(&b.channel));
        sessions
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Session>> {
        self.sessions.read().unwrap_or_else(|e| e.into_inner())
    }
}

/// Keyed async locks serializing lifecycle operations per channel.
#[derive(Default)]
pub struct ChannelLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ChannelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, channel: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(locks.entry(channel.to_string()).or_default())
        };
        lock.lock_owned().await
    }
}
