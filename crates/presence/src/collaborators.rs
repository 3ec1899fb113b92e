//! Interfaces to the external systems the engine depends on.
//!
//! Accounts, relationship graphs, and durable history live outside the
//! engine.  The gateway wires concrete implementations in at startup.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use st_domain::error::Result;
use st_domain::geo::{GeoPoint, PathPoint};
use st_domain::identity::Identity;
use st_domain::walk::EmergencyAlert;

use crate::walk::WalkSnapshot;

/// Resolves a bearer credential to a member identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Returns `Error::Auth` when the credential is not recognised.
    async fn resolve(&self, credential: &str) -> Result<Identity>;
}

/// Read-only view of the member relationship graph.
#[async_trait]
pub trait RelationshipStore: Send + Sync {
    async fn friends_of(&self, identity_id: &str) -> Result<HashSet<String>>;

    /// Display name for a member id, when known.
    async fn display_name(&self, identity_id: &str) -> Result<Option<String>>;
}

/// One append-only record handed to the persistence collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum PersistenceRecord {
    WalkStarted {
        session: WalkSnapshot,
    },
    PathPoint {
        session_id: String,
        walker_id: String,
        point: PathPoint,
    },
    WalkEnded {
        session: WalkSnapshot,
    },
    Alert {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        identity_id: String,
        alert: EmergencyAlert,
    },
    Presence {
        identity_id: String,
        online: bool,
        at: DateTime<Utc>,
    },
    /// General (non-walk) location of a member.
    Location {
        identity_id: String,
        point: GeoPoint,
        at: DateTime<Utc>,
    },
}

impl PersistenceRecord {
    pub fn name(&self) -> &'static str {
        match self {
            PersistenceRecord::WalkStarted { .. } => "walk_started",
            PersistenceRecord::PathPoint { .. } => "path_point",
            PersistenceRecord::WalkEnded { .. } => "walk_ended",
            PersistenceRecord::Alert { .. } => "alert",
            PersistenceRecord::Presence { .. } => "presence",
            PersistenceRecord::Location { .. } => "location",
        }
    }
}

/// Best-effort durable sink.  Failures are logged by the caller and never
/// roll back in-memory state.
#[async_trait]
pub trait PersistenceStore: Send + Sync {
    async fn append(&self, record: PersistenceRecord) -> Result<()>;
}

/// Store used when persistence is disabled.
pub struct NullPersistence;

#[async_trait]
impl PersistenceStore for NullPersistence {
    async fn append(&self, _record: PersistenceRecord) -> Result<()> {
        Ok(())
    }
}
