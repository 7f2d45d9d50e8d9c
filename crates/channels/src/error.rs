use std::error::Error as StdError;

/// Crate-wide result type for channel operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Typed channel errors shared by stores and registration helpers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input payload or parameter is invalid.
    #[error("invalid channel input: {message}")]
    InvalidInput { message: String },

    /// No registration exists for the requested channel.
    #[error("unknown channel: {username}")]
    UnknownChannel { username: String },

    /// The write would move an `oauth` registration back to `irc`.
    #[error("channel {username} cannot be downgraded from oauth to irc")]
    InvalidTransition { username: String },

    /// Wrapped source error from an external dependency.
    #[error("channel operation failed: {context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn invalid_input(message: impl std::fmt::Display) -> Self {
        Self::InvalidInput {
            message: message.to_string(),
        }
    }

    #[must_use]
    pub fn unknown_channel(username: impl std::fmt::Display) -> Self {
        Self::UnknownChannel {
            username: username.to_string(),
        }
    }

    #[must_use]
    pub fn invalid_transition(username: impl std::fmt::Display) -> Self {
        Self::InvalidTransition {
            username: username.to_string(),
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}
