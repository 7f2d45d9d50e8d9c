//! Channel session and credential lifecycle.
//!
//! [`SessionManager`] owns one live chat connection per registered channel,
//! picks the credential each channel connects with ([`AuthStrategy`]), keeps
//! OAuth tokens fresh ([`RefreshScheduler`]) and gates inbound commands.

pub mod error;
pub mod expiry;
pub mod manager;
pub mod registry;
pub mod scheduler;
pub mod strategy;

pub use {
    error::{Error, Result},
    expiry::SharedCredentialNotifier,
    manager::{AuthorizationKind, AuthorizationOutcome, DispatchOutcome, SessionManager, StartupReport},
    registry::{ChannelLocks, Session, SessionRegistry},
    scheduler::{RefreshScheduler, SessionEvent, refresh_delay},
    strategy::{
        AuthStrategy, AuthStrategyFactory, RefreshingStrategy, SHARED_TOKEN_LIFETIME,
        SharedCredential, TokenRefresher,
    },
};
