//! AppState construction extracted from `main.rs`.
//!
//! Shared by `serve` and the integration tests so both boot the same
//! engine without binding a listener.

use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use sha2::{Digest, Sha256};

use st_domain::config::{Config, ConfigSeverity};
use st_presence::collaborators::{NullPersistence, PersistenceStore};
use st_presence::persistence::JsonlPersistence;
use st_presence::{Collaborators, PresenceEngine};

use crate::collaborators::{RosterIdentityProvider, RosterRelationshipStore};
use crate::state::AppState;

/// Validate config, wire the collaborators, and return a ready
/// [`AppState`].
pub fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Persistence ──────────────────────────────────────────────────
    let persistence: Arc<dyn PersistenceStore> = if config.persistence.enabled {
        let store = JsonlPersistence::new(&config.persistence.state_path).with_context(|| {
            format!(
                "initializing persistence at {}",
                config.persistence.state_path.display()
            )
        })?;
        Arc::new(store)
    } else {
        tracing::info!("persistence disabled");
        Arc::new(NullPersistence)
    };

    // ── Engine ───────────────────────────────────────────────────────
    let engine = PresenceEngine::new(
        &config.walk,
        Collaborators {
            identity: Arc::new(RosterIdentityProvider::from_config(&config.identity)),
            relationships: Arc::new(RosterRelationshipStore::from_config(&config.identity)),
            persistence,
        },
    );
    tracing::info!(
        max_circle_size = config.walk.max_circle_size,
        path_retention = config.walk.path_retention,
        proximity = ?config.walk.proximity,
        "presence engine ready"
    );

    // ── API token (read once, hash for constant-time comparison) ────
    let api_token_hash = {
        let env_var = &config.server.api_token_env;
        match std::env::var(env_var).ok().filter(|t| !t.is_empty()) {
            Some(t) => {
                tracing::info!(source = %format!("env:{env_var}"), "API bearer-token auth enabled");
                Some(Sha256::digest(t.as_bytes()).to_vec())
            }
            None => {
                tracing::warn!("API bearer-token auth DISABLED, set the {env_var} env var");
                None
            }
        }
    };

    Ok(AppState {
        config,
        engine: Arc::new(engine),
        api_token_hash,
        started_at: Utc::now(),
    })
}
