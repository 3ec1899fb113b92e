use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Member roster (static identity provider + relationship graph)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Statically configured members.  Accounts and friend graphs normally live
/// in an external store; this roster backs the built-in collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IdentityConfig {
    #[serde(default)]
    pub members: Vec<MemberEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberEntry {
    pub id: String,
    pub display_name: String,
    /// Environment variable holding this member's bearer credential.
    #[serde(default)]
    pub token_env: Option<String>,
    /// Hex SHA-256 of the credential, for deployments that do not pass
    /// secrets through the environment.
    #[serde(default)]
    pub token_sha256: Option<String>,
    /// Friend ids.  Friendship is symmetric: listing it on either side is
    /// enough.
    #[serde(default)]
    pub friends: Vec<String>,
}
