use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The identity service no longer accepts the token.
    #[error("token is invalid or expired")]
    InvalidToken,

    /// The token endpoint answered with a non-success status.
    #[error("token endpoint rejected the request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("{message}")]
    Message { message: String },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn rejected(status: u16, body: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            body: body.into(),
        }
    }

    /// `true` when the error means the token itself is bad, as opposed to a
    /// transport or server failure.
    pub fn is_invalid_token(&self) -> bool {
        matches!(self, Self::InvalidToken)
            || matches!(self, Self::Rejected { status, .. } if *status == 400 || *status == 401)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
