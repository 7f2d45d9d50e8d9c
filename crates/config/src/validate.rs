//! Configuration validation engine.
//!
//! Detects unknown/misspelled fields and reports settings that would keep the
//! bot from connecting or refreshing tokens.

use std::{collections::HashMap, path::Path};

use crate::{env_subst::substitute_env, loader::parse_config, schema::LadderbotConfig};

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "credentials",
    /// "roles", "notifications", "network"
    pub category: &'static str,
    /// Dotted path, e.g. "bot.login"
    pub path: String,
    pub message: String,
}

impl Diagnostic {
    fn new(
        severity: Severity,
        category: &'static str,
        path: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result of validating a configuration file.
#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    let fields = |names: &[&'static str]| Struct(names.iter().map(|n| (*n, Leaf)).collect());

    Struct(HashMap::from([
        ("bot", fields(&["login", "token", "token_issued_at"])),
        (
            "oauth",
            fields(&["client_id", "client_secret", "token_url", "validate_url"]),
        ),
        ("roles", fields(&["admins", "superadmins"])),
        (
            "notifications",
            fields(&["webhook_url", "warning_days", "check_interval_secs"]),
        ),
        ("database", fields(&["path"])),
        ("irc", fields(&["host", "port"])),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }
    if b_len == 0 {
        return a.chars().count();
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

/// Closest candidate within `max_distance` edits.
fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    let mut best: Option<(&'a str, usize)> = None;
    for &candidate in candidates {
        let d = levenshtein(needle, candidate);
        if d > 0 && d <= max_distance && best.as_ref().is_none_or(|(_, bd)| d < *bd) {
            best = Some((candidate, d));
        }
    }
    best.map(|(s, _)| s)
}

// ── Core validation ─────────────────────────────────────────────────────────

/// Validate a config file at the given path, or discover the default config
/// file location if `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = match path {
        Some(p) => Some(p.to_path_buf()),
        None => crate::loader::find_config_file(),
    };

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                "no config file found; the bot needs at least [bot] login and token",
            )],
            config_path: None,
        };
    };

    let mut result = match std::fs::read_to_string(actual_path) {
        Ok(content) => validate_str(&substitute_env(&content), actual_path),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("failed to read config file: {e}"),
            )],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path.clone());
    result
}

/// Validate config text. The format is taken from `path`'s extension; the
/// file itself is not read.
#[must_use]
pub fn validate_str(raw: &str, path: &Path) -> ValidationResult {
    let mut diagnostics = Vec::new();

    // 1. Syntax
    let value = match parse_value(raw, path) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic::new(
                Severity::Error,
                "syntax",
                "",
                format!("syntax error: {e}"),
            ));
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    // 2. Unknown fields
    check_unknown_fields(&value, &build_schema_map(), "", &mut diagnostics);

    // 3. Types, then semantics on a successful parse
    match parse_config(raw, path) {
        Ok(config) => check_semantics(&config, &mut diagnostics),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "type-error",
            "",
            format!("type error: {e}"),
        )),
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn parse_value(raw: &str, path: &Path) -> anyhow::Result<serde_json::Value> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => {
            let v: toml::Value = toml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "yaml" | "yml" => {
            let v: serde_yaml::Value = serde_yaml::from_str(raw)?;
            Ok(serde_json::to_value(v)?)
        },
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}

fn check_unknown_fields(
    value: &serde_json::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (serde_json::Value::Object(map), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };
    let known: Vec<&str> = fields.keys().copied().collect();

    for (key, child) in map {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match fields.get(key.as_str()) {
            Some(child_schema) => check_unknown_fields(child, child_schema, &path, diagnostics),
            None => {
                let message = match suggest(key, &known, 3) {
                    Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
                    None => "unknown field".to_string(),
                };
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    "unknown-field",
                    path,
                    message,
                ));
            },
        }
    }
}

fn check_semantics(config: &LadderbotConfig, diagnostics: &mut Vec<Diagnostic>) {
    use secrecy::ExposeSecret;

    if config.bot.login.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "credentials",
            "bot.login",
            "bot login is required",
        ));
    }

    let token_missing = config
        .bot
        .token
        .as_ref()
        .is_none_or(|t| t.expose_secret().trim().is_empty());
    if token_missing {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "credentials",
            "bot.token",
            "shared chat token is required to join IRC-only channels",
        ));
    }

    if config.bot.token_issued_at.is_none() && !token_missing {
        diagnostics.push(Diagnostic::new(
            Severity::Info,
            "credentials",
            "bot.token_issued_at",
            "issue time unknown; token expiry is estimated from first use",
        ));
    }

    let secret_missing = config
        .oauth
        .client_secret
        .as_ref()
        .is_none_or(|s| s.expose_secret().is_empty());
    if config.oauth.client_id.is_empty() || secret_missing {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "credentials",
            "oauth",
            "client_id/client_secret unset; authorized channels cannot refresh tokens",
        ));
    }

    for (path, value) in [
        ("oauth.token_url", &config.oauth.token_url),
        ("oauth.validate_url", &config.oauth.validate_url),
    ] {
        check_http_url(path, value, diagnostics);
    }

    if config.roles.superadmins.is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "roles",
            "roles.superadmins",
            "no superadmins configured; the bot joins no channel unless one is registered",
        ));
    }

    for name in &config.roles.admins {
        if config
            .roles
            .superadmins
            .iter()
            .any(|s| s.eq_ignore_ascii_case(name))
        {
            diagnostics.push(Diagnostic::new(
                Severity::Info,
                "roles",
                "roles.admins",
                format!("\"{name}\" is also a superadmin"),
            ));
        }
    }

    if let Some(url) = &config.notifications.webhook_url {
        check_http_url("notifications.webhook_url", url, diagnostics);
    }
    if config.notifications.check_interval_secs == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "notifications",
            "notifications.check_interval_secs",
            "check interval must be positive",
        ));
    }
    if config.notifications.warning_days == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Warning,
            "notifications",
            "notifications.warning_days",
            "warning window is zero; expiry warnings are effectively disabled",
        ));
    }

    if config.irc.host.trim().is_empty() {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "network",
            "irc.host",
            "chat host is required",
        ));
    }
    if config.irc.port == 0 {
        diagnostics.push(Diagnostic::new(
            Severity::Error,
            "network",
            "irc.port",
            "chat port must be non-zero",
        ));
    }
}

fn check_http_url(path: &str, value: &str, diagnostics: &mut Vec<Diagnostic>) {
    match url::Url::parse(value) {
        Ok(u) if matches!(u.scheme(), "http" | "https") => {},
        Ok(u) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "network",
            path,
            format!("unsupported URL scheme \"{}\"", u.scheme()),
        )),
        Err(e) => diagnostics.push(Diagnostic::new(
            Severity::Error,
            "network",
            path,
            format!("invalid URL: {e}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"
[bot]
login = "ladderbot"
token = "abc"
token_issued_at = 1700000000

[oauth]
client_id = "cid"
client_secret = "cs"

[roles]
superadmins = ["owner"]
"#;

    fn toml(raw: &str) -> ValidationResult {
        validate_str(raw, Path::new("ladderbot.toml"))
    }

    fn find<'a>(result: &'a ValidationResult, path: &str) -> Option<&'a Diagnostic> {
        result.diagnostics.iter().find(|d| d.path == path)
    }

    #[test]
    fn valid_config_has_no_diagnostics() {
        let result = toml(VALID);
        assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);
    }

    #[test]
    fn syntax_error_stops_early() {
        let result = toml("[bot\nlogin = ");
        assert_eq!(result.count(Severity::Error), 1);
        assert_eq!(result.diagnostics[0].category, "syntax");
    }

    #[test]
    fn misspelled_field_gets_suggestion() {
        let result = toml(&format!("{VALID}\n[irc]\nhots = \"x\"\n"));
        let diag = find(&result, "irc.hots").expect("unknown field reported");
        assert_eq!(diag.category, "unknown-field");
        assert!(diag.message.contains("\"host\""), "{}", diag.message);
    }

    #[test]
    fn unknown_top_level_section() {
        let result = toml(&format!("{VALID}\n[rolez]\n"));
        let diag = find(&result, "rolez").expect("unknown section reported");
        assert!(diag.message.contains("\"roles\""));
    }

    #[test]
    fn missing_credentials_are_errors() {
        let result = toml("[roles]\nsuperadmins = [\"owner\"]\n");
        assert!(result.has_errors());
        assert!(find(&result, "bot.login").is_some());
        assert!(find(&result, "bot.token").is_some());
        assert_eq!(find(&result, "oauth").map(|d| d.severity), Some(Severity::Warning));
    }

    #[test]
    fn type_error_reported() {
        let result = toml(&format!("{VALID}\n[irc]\nport = \"six\"\n"));
        assert!(result.diagnostics.iter().any(|d| d.category == "type-error"));
    }

    #[test]
    fn bad_webhook_url() {
        let result = toml(&format!(
            "{VALID}\n[notifications]\nwebhook_url = \"ftp://example.com\"\n"
        ));
        let diag = find(&result, "notifications.webhook_url").expect("scheme reported");
        assert_eq!(diag.severity, Severity::Error);
    }

    #[test]
    fn admin_also_superadmin_is_info() {
        let raw = VALID.replace(
            "superadmins = [\"owner\"]",
            "superadmins = [\"owner\"]\nadmins = [\"Owner\", \"mod\"]",
        );
        let result = toml(&raw);
        let diag = find(&result, "roles.admins").expect("overlap reported");
        assert_eq!(diag.severity, Severity::Info);
        assert!(!result.has_errors());
    }

    #[test]
    fn yaml_is_validated_too() {
        let result = validate_str(
            "bot:\n  login: b\n  token: t\n  tokn: x\n",
            Path::new("ladderbot.yaml"),
        );
        assert!(find(&result, "bot.tokn").is_some());
    }

    #[test]
    fn validate_reads_file() {
        let dir = tempfile::tempdir().unwrap_or_else(|e| panic!("{e}"));
        let path = dir.path().join("ladderbot.toml");
        std::fs::write(&path, VALID).unwrap_or_else(|e| panic!("{e}"));
        let result = validate(Some(&path));
        assert_eq!(result.config_path.as_deref(), Some(path.as_path()));
        assert!(!result.has_errors());
    }

    #[test]
    fn levenshtein_basics() {
        assert_eq!(levenshtein("", "abc"), 3);
        assert_eq!(levenshtein("login", "login"), 0);
        assert_eq!(levenshtein("logn", "login"), 1);
    }
}
