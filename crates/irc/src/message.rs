/// IRC message parsing and serialization.
///
/// RFC 2812 framing with an optional IRCv3 tag section:
///   [`@`tags SPACE] [`:`prefix SPACE] command [SPACE params] [SPACE `:` trailing]
use std::fmt;

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    /// IRCv3 tags in wire order, values unescaped.
    pub tags: Vec<(String, String)>,
    /// Optional prefix (server name or `nick!user@host`).
    pub prefix: Option<String>,
    pub command: String,
    /// The last one may have been a trailing param (with spaces).
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("missing command")]
    MissingCommand,
}

impl Message {
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            command: command.into(),
            params,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn param(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(String::as_str)
    }

    /// Nickname part of a `nick!user@host` prefix.
    pub fn nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .map(|p| p.split_once('!').map_or(p, |(nick, _)| nick))
    }

    /// Parse one line (without the trailing `\r\n`).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let mut rest = input.trim_end_matches(['\r', '\n']);
        if rest.trim().is_empty() {
            return Err(ParseError::Empty);
        }

        let mut tags = Vec::new();
        if let Some(tagged) = rest.strip_prefix('@') {
            let (raw, after) = tagged.split_once(' ').ok_or(ParseError::MissingCommand)?;
            tags = raw
                .split(';')
                .filter(|t| !t.is_empty())
                .map(|t| match t.split_once('=') {
                    Some((k, v)) => (k.to_string(), unescape_tag(v)),
                    None => (t.to_string(), String::new()),
                })
                .collect();
            rest = after.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(prefixed) = rest.strip_prefix(':') {
            let (p, after) = prefixed.split_once(' ').ok_or(ParseError::MissingCommand)?;
            prefix = Some(p.to_string());
            rest = after.trim_start_matches(' ');
        }

        let (command, mut params_str) = match rest.split_once(' ') {
            Some((command, params)) => (command, Some(params)),
            None => (rest, None),
        };
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        while let Some(remaining) = params_str {
            if let Some(trailing) = remaining.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, next)) => {
                    if !param.is_empty() {
                        params.push(param.to_string());
                    }
                    params_str = Some(next);
                },
                None => {
                    if !remaining.is_empty() {
                        params.push(remaining.to_string());
                    }
                    params_str = None;
                },
            }
        }

        Ok(Self {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Serialize to the wire format (without trailing `\r\n`).
    pub fn to_wire(&self) -> String {
        let mut out = String::new();

        if !self.tags.is_empty() {
            out.push('@');
            for (i, (key, value)) in self.tags.iter().enumerate() {
                if i > 0 {
                    out.push(';');
                }
                out.push_str(key);
                if !value.is_empty() {
                    out.push('=');
                    escape_tag_into(value, &mut out);
                }
            }
            out.push(' ');
        }

        if let Some(prefix) = &self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }

        out.push_str(&self.command);

        if let Some((last, init)) = self.params.split_last() {
            for param in init {
                out.push(' ');
                out.push_str(param);
            }
            out.push(' ');
            if last.is_empty() || last.starts_with(':') || last.contains(' ') {
                out.push(':');
            }
            out.push_str(last);
        }

        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

fn unescape_tag(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {},
        }
    }
    out
}

fn escape_tag_into(value: &str, out: &mut String) {
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_command() {
        let msg = Message::parse("PING :tmi.twitch.tv").unwrap();
        assert!(msg.tags.is_empty());
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "PING");
        assert_eq!(msg.params, vec!["tmi.twitch.tv"]);
    }

    #[test]
    fn parse_numeric_welcome() {
        let msg = Message::parse(":tmi.twitch.tv 001 ladderbot :Welcome, GLHF!").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("tmi.twitch.tv"));
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, vec!["ladderbot", "Welcome, GLHF!"]);
    }

    #[test]
    fn parse_tagged_privmsg() {
        let line = "@badge-info=;badges=broadcaster/1,premium/1;display-name=Foo;id=b34ccfc7;mod=0 \
                    :foo!foo@foo.tmi.twitch.tv PRIVMSG #foo :!rank some one";
        let msg = Message::parse(line).unwrap();
        assert_eq!(msg.tag("display-name"), Some("Foo"));
        assert_eq!(msg.tag("badge-info"), Some(""));
        assert_eq!(msg.tag("badges"), Some("broadcaster/1,premium/1"));
        assert_eq!(msg.tag("id"), Some("b34ccfc7"));
        assert_eq!(msg.tag("missing"), None);
        assert_eq!(msg.nick(), Some("foo"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#foo", "!rank some one"]);
    }

    #[test]
    fn tag_values_are_unescaped() {
        let msg = Message::parse(r"@msg=a\sb\:c\\d\ne PRIVMSG #x :y").unwrap();
        assert_eq!(msg.tag("msg"), Some("a b;c\\d\ne"));
    }

    #[test]
    fn parse_rejects_empty_and_headless() {
        assert_eq!(Message::parse(""), Err(ParseError::Empty));
        assert_eq!(Message::parse("\r\n"), Err(ParseError::Empty));
        assert_eq!(Message::parse(":prefix-only"), Err(ParseError::MissingCommand));
        assert_eq!(Message::parse("@a=b"), Err(ParseError::MissingCommand));
    }

    #[test]
    fn parse_tolerates_extra_spaces() {
        let msg = Message::parse("JOIN  #foo").unwrap();
        assert_eq!(msg.params, vec!["#foo"]);
    }

    #[test]
    fn to_wire_with_reply_tag() {
        let msg = Message::new("PRIVMSG", vec!["#foo".into(), "hello there".into()])
            .with_tag("reply-parent-msg-id", "b34ccfc7");
        assert_eq!(
            msg.to_wire(),
            "@reply-parent-msg-id=b34ccfc7 PRIVMSG #foo :hello there"
        );
    }

    #[test]
    fn to_wire_escapes_tag_values() {
        let msg = Message::new("PRIVMSG", vec!["#x".into(), "y".into()]).with_tag("k", "a b;c");
        assert_eq!(msg.to_wire(), r"@k=a\sb\:c PRIVMSG #x y");
        assert_eq!(Message::parse(&msg.to_wire()).unwrap(), msg);
    }

    #[test]
    fn to_wire_marks_trailing_only_when_needed() {
        let join = Message::new("JOIN", vec!["#foo".into()]);
        assert_eq!(join.to_wire(), "JOIN #foo");
        let empty = Message::new("PRIVMSG", vec!["#foo".into(), String::new()]);
        assert_eq!(empty.to_wire(), "PRIVMSG #foo :");
        let colon = Message::new("PRIVMSG", vec!["#foo".into(), ":)".into()]);
        assert_eq!(colon.to_wire(), "PRIVMSG #foo ::)");
    }

    #[test]
    fn to_wire_without_params() {
        assert_eq!(Message::new("QUIT", vec![]).to_wire(), "QUIT");
    }
}
