mod identity;
mod observability;
mod persistence;
mod server;
mod walk;

pub use identity::*;
pub use observability::*;
pub use persistence::*;
pub use server::*;
pub use walk::*;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub walk: WalkConfig,
    #[serde(default)]
    pub identity: IdentityConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: &str, message: String| {
            errors.push(ConfigError {
                severity,
                field: field.into(),
                message,
            });
        };

        if self.server.port == 0 {
            push(ConfigSeverity::Error, "server.port", "port must be greater than 0".into());
        }
        if self.server.host.is_empty() {
            push(ConfigSeverity::Error, "server.host", "host must not be empty".into());
        }
        if self.server.outbound_queue == 0 {
            push(
                ConfigSeverity::Error,
                "server.outbound_queue",
                "outbound queue must hold at least one message".into(),
            );
        }

        if self.walk.max_circle_size == 0 {
            push(
                ConfigSeverity::Error,
                "walk.max_circle_size",
                "every walk would be rejected with a zero-sized circle".into(),
            );
        }
        if self.walk.path_retention == 0 {
            push(
                ConfigSeverity::Error,
                "walk.path_retention",
                "path retention must be at least 1".into(),
            );
        }
        if self.walk.proximity == ProximityMode::Radius && self.walk.arrival_radius_m <= 0.0 {
            push(
                ConfigSeverity::Error,
                "walk.arrival_radius_m",
                "radius must be positive when proximity = \"radius\"".into(),
            );
        }

        // Member ids must be unique and friend references must resolve.
        let mut seen = HashSet::new();
        for (i, member) in self.identity.members.iter().enumerate() {
            if member.id.is_empty() {
                push(
                    ConfigSeverity::Error,
                    &format!("identity.members[{i}].id"),
                    "id must not be empty".into(),
                );
            }
            if !seen.insert(member.id.as_str()) {
                push(
                    ConfigSeverity::Error,
                    &format!("identity.members[{i}].id"),
                    format!("duplicate member id '{}'", member.id),
                );
            }
            if member.token_env.is_none() && member.token_sha256.is_none() {
                push(
                    ConfigSeverity::Warning,
                    &format!("identity.members[{i}]"),
                    format!("member '{}' has no credential and can never sign in", member.id),
                );
            }
        }
        for (i, member) in self.identity.members.iter().enumerate() {
            for friend in &member.friends {
                if !seen.contains(friend.as_str()) {
                    push(
                        ConfigSeverity::Warning,
                        &format!("identity.members[{i}].friends"),
                        format!("unknown friend id '{friend}'"),
                    );
                }
            }
        }

        if !(0.0..=1.0).contains(&self.observability.sample_rate) {
            push(
                ConfigSeverity::Error,
                "observability.sample_rate",
                "sample_rate must be within 0.0..=1.0".into(),
            );
        }

        errors
    }
}
