//! Channel registrations and the seams around them.
//!
//! A channel is one chat room the bot joins. This crate owns the persisted
//! registration record, the storage trait, the command permission policy,
//! and the traits the session layer uses to talk to the chat network,
//! the command layer and the operator notification sink.

pub mod commands;
pub mod error;
pub mod permissions;
pub mod plugin;
pub mod registration;
pub mod store;
pub mod store_memory;

pub use {
    commands::{CommandContext, CommandHandler, CommandRegistry, parse_command},
    error::{Error, Result},
    permissions::{CommandRequirement, Permission, Role, Roles},
    plugin::{
        ChatCredential, ChatNetworkClient, ConnectionHandle, InboundMessage, Invoker, MessageSink,
        NotificationSink, notify_quietly,
    },
    registration::{AuthLevel, ChannelPatch, ChannelRegistration, TokenSet, Transition, unix_now},
    store::ChannelStore,
    store_memory::InMemoryChannelStore,
};
