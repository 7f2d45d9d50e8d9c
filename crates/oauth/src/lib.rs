//! OAuth token refresh and validation against the chat network's identity
//! service.

pub mod error;
pub mod exchange;
pub mod types;

pub use {
    error::{Error, Result},
    exchange::{HttpTokenExchange, TokenExchange},
    types::{OAuthConfig, TokenGrant, TokenValidation, serialize_option_secret, serialize_secret},
};
