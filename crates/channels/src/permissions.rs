//! Which commands a channel may run, and who may run them.
//!
//! Two independent checks gate a chat command:
//!
//! - the channel's authorization tier ([`evaluate`] / [`is_allowed`]):
//!   `oauth` channels may run every registered command, `irc` channels only
//!   the commands on [`IRC_COMMANDS`];
//! - the invoker's role ([`Roles`], [`meets_requirement`]) against the
//!   handler's [`CommandRequirement`].

use std::collections::HashSet;

use crate::{
    plugin::Invoker,
    registration::{AuthLevel, ChannelRegistration},
};

/// Commands available to channels served by the shared credential.
pub const IRC_COMMANDS: &[&str] = &[
    "help",
    "commands",
    "ping",
    "rank",
    "lastmatch",
    "record",
    "link",
    "join",
    "part",
    "unlink",
    "channels",
    "reload",
    "resetdb",
];

/// Commands that need the channel's own OAuth grant (broadcaster scopes).
pub const OAUTH_ONLY_COMMANDS: &[&str] = &[
    "title",
    "game",
    "poll",
    "prediction",
    "shoutout",
    "clip",
];

/// Canonical command name: lowercase, without the `!` prefix.
pub fn normalize_command(name: &str) -> String {
    name.trim().trim_start_matches('!').to_lowercase()
}

/// Outcome of the tier check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    Allowed,
    /// Needs the channel owner to authorize the bot first.
    RequiresAuthorization,
    /// Not offered on this tier.
    NotAvailable,
}

impl Permission {
    /// Chat reply for a refused command.
    pub fn notice(&self, command: &str, channel: &str) -> Option<String> {
        match self {
            Self::Allowed => None,
            Self::RequiresAuthorization => Some(format!(
                "!{command} requires {channel} to authorize the bot first."
            )),
            Self::NotAvailable => Some(format!("!{command} is not available in this channel.")),
        }
    }
}

/// Tier check for a command on a channel at `auth_level`.
pub fn evaluate(auth_level: AuthLevel, command: &str) -> Permission {
    let command = normalize_command(command);
    match auth_level {
        AuthLevel::Oauth => Permission::Allowed,
        AuthLevel::Irc if IRC_COMMANDS.contains(&command.as_str()) => Permission::Allowed,
        AuthLevel::Irc if OAUTH_ONLY_COMMANDS.contains(&command.as_str()) => {
            Permission::RequiresAuthorization
        },
        AuthLevel::Irc => Permission::NotAvailable,
    }
}

/// `true` when `command` may run on `channel` given its tier.
pub fn is_allowed(channel: &ChannelRegistration, command: &str) -> bool {
    evaluate(channel.auth_level, command) == Permission::Allowed
}

/// Operator role derived from the static membership lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    Standard,
    Admin,
    SuperAdmin,
}

/// Static operator lists.
#[derive(Debug, Clone, Default)]
pub struct Roles {
    admins: HashSet<String>,
    superadmins: HashSet<String>,
}

impl Roles {
    pub fn new(
        admins: impl IntoIterator<Item = impl AsRef<str>>,
        superadmins: impl IntoIterator<Item = impl AsRef<str>>,
    ) -> Self {
        let normalize = |name: &str| ChannelRegistration::normalize_username(name);
        Self {
            admins: admins.into_iter().map(|n| normalize(n.as_ref())).collect(),
            superadmins: superadmins
                .into_iter()
                .map(|n| normalize(n.as_ref()))
                .collect(),
        }
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.admins
            .contains(&ChannelRegistration::normalize_username(username))
    }

    pub fn is_super_admin(&self, username: &str) -> bool {
        self.superadmins
            .contains(&ChannelRegistration::normalize_username(username))
    }

    /// Admins and superadmins both qualify.
    pub fn has_admin_privileges(&self, username: &str) -> bool {
        self.is_admin(username) || self.is_super_admin(username)
    }

    pub fn role_of(&self, username: &str) -> Role {
        if self.is_super_admin(username) {
            Role::SuperAdmin
        } else if self.is_admin(username) {
            Role::Admin
        } else {
            Role::Standard
        }
    }

    /// Superadmin names, sorted.
    pub fn superadmins(&self) -> Vec<String> {
        let mut names: Vec<_> = self.superadmins.iter().cloned().collect();
        names.sort();
        names
    }
}

/// Who may invoke a command.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommandRequirement {
    #[default]
    Anyone,
    /// Channel moderators, the owner, or operators.
    Moderator,
    /// The channel owner or operators.
    Owner,
    Admin,
    SuperAdmin,
}

/// Role check for `invoker` running a command on `channel`.
pub fn meets_requirement(
    roles: &Roles,
    invoker: &Invoker,
    channel: &str,
    requirement: CommandRequirement,
) -> bool {
    let is_owner =
        invoker.is_broadcaster || invoker.username == ChannelRegistration::normalize_username(channel);
    let operator = roles.has_admin_privileges(&invoker.username);
    match requirement {
        CommandRequirement::Anyone => true,
        CommandRequirement::Moderator => invoker.is_moderator || is_owner || operator,
        CommandRequirement::Owner => is_owner || operator,
        CommandRequirement::Admin => operator,
        CommandRequirement::SuperAdmin => roles.is_super_admin(&invoker.username),
    }
}
