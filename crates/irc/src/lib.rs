//! IRC transport for the chat network.
//!
//! One TCP connection per channel: `PASS`/`NICK` with the channel's
//! credential, then `JOIN`. IRCv3 tags carry sender badges and message ids.

pub mod client;
pub mod codec;
pub mod message;

pub use {
    client::{IrcClient, IrcClientConfig},
    codec::{CodecError, IrcCodec},
    message::{Message, ParseError},
};
