use thiserror::Error;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    /// An `oauth` registration without a usable token pair.
    #[error("channel {channel} is authorized but has no usable token pair")]
    MissingCredentials { channel: String },

    #[error("channel {channel} already has a live session")]
    AlreadyConnected { channel: String },

    #[error("channel {channel} is not registered")]
    NotRegistered { channel: String },

    #[error("invalid channel name: {channel:?}")]
    InvalidChannel { channel: String },

    #[error("token refresh failed for {channel}: {source}")]
    RefreshFailed {
        channel: String,
        #[source]
        source: ladderbot_oauth::Error,
    },

    /// The shared credential is never refreshed automatically.
    #[error("channel {channel} uses the shared credential, which cannot be refreshed")]
    RefreshUnsupported { channel: String },

    #[error("failed to connect {channel}: {source}")]
    ConnectionFailed {
        channel: String,
        #[source]
        source: BoxError,
    },

    /// A credential write failed; the new credential was not used.
    #[error("failed to persist credentials for {channel}: {source}")]
    PersistenceFailed {
        channel: String,
        #[source]
        source: BoxError,
    },

    #[error("channel store failed for {channel}: {source}")]
    Store {
        channel: String,
        #[source]
        source: BoxError,
    },

    #[error("{username} is not permitted to {action}")]
    NotPermitted {
        username: String,
        action: &'static str,
    },
}

impl Error {
    #[must_use]
    pub fn missing_credentials(channel: impl Into<String>) -> Self {
        Self::MissingCredentials {
            channel: channel.into(),
        }
    }

    #[must_use]
    pub fn already_connected(channel: impl Into<String>) -> Self {
        Self::AlreadyConnected {
            channel: channel.into(),
        }
    }

    #[must_use]
    pub fn not_registered(channel: impl Into<String>) -> Self {
        Self::NotRegistered {
            channel: channel.into(),
        }
    }

    #[must_use]
    pub fn refresh_failed(channel: impl Into<String>, source: ladderbot_oauth::Error) -> Self {
        Self::RefreshFailed {
            channel: channel.into(),
            source,
        }
    }

    #[must_use]
    pub fn connection_failed(channel: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::ConnectionFailed {
            channel: channel.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn persistence_failed(channel: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::PersistenceFailed {
            channel: channel.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn store(channel: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Store {
            channel: channel.into(),
            source: source.into(),
        }
    }

    #[must_use]
    pub fn not_permitted(username: impl Into<String>, action: &'static str) -> Self {
        Self::NotPermitted {
            username: username.into(),
            action,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
