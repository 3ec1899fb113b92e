//! Config-backed identity provider and relationship store.
//!
//! Both are built once from the `[identity]` roster at startup.  Real
//! deployments would put an account service behind the same traits.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use st_domain::config::IdentityConfig;
use st_domain::error::{Error, Result};
use st_domain::identity::Identity;
use st_presence::collaborators::{IdentityProvider, RelationshipStore};

/// Resolves bearer credentials against the SHA-256 digests of the roster.
pub struct RosterIdentityProvider {
    credentials: Vec<([u8; 32], Identity)>,
}

impl RosterIdentityProvider {
    /// Read each member's credential from `token_env` (preferred) or
    /// `token_sha256`.  Members with neither cannot sign in.
    pub fn from_config(cfg: &IdentityConfig) -> Self {
        let mut credentials = Vec::new();
        for member in &cfg.members {
            let from_env = member
                .token_env
                .as_deref()
                .and_then(|var| std::env::var(var).ok())
                .filter(|t| !t.is_empty())
                .map(|t| digest(&t));
            let from_hash = || {
                let raw = member.token_sha256.as_deref()?;
                match hex::decode(raw.trim()) {
                    Ok(bytes) if bytes.len() == 32 => {
                        let mut out = [0u8; 32];
                        out.copy_from_slice(&bytes);
                        Some(out)
                    }
                    _ => {
                        tracing::warn!(member = %member.id, "token_sha256 is not a 32-byte hex digest");
                        None
                    }
                }
            };

            match from_env.or_else(from_hash) {
                Some(hash) => credentials.push((
                    hash,
                    Identity::member(member.id.clone(), member.display_name.clone()),
                )),
                None => tracing::warn!(member = %member.id, "member has no usable credential"),
            }
        }
        tracing::info!(members = credentials.len(), "identity roster loaded");
        Self { credentials }
    }
}

fn digest(token: &str) -> [u8; 32] {
    Sha256::digest(token.as_bytes()).into()
}

#[async_trait]
impl IdentityProvider for RosterIdentityProvider {
    async fn resolve(&self, credential: &str) -> Result<Identity> {
        let provided = digest(credential);
        // Compare against every entry so timing does not reveal position.
        let mut found = None;
        for (hash, identity) in &self.credentials {
            if bool::from(hash[..].ct_eq(&provided[..])) && found.is_none() {
                found = Some(identity);
            }
        }
        found
            .cloned()
            .ok_or_else(|| Error::Auth("unrecognised credential".into()))
    }
}

/// Symmetric friend graph from the roster.
pub struct RosterRelationshipStore {
    friends: HashMap<String, HashSet<String>>,
    names: HashMap<String, String>,
}

impl RosterRelationshipStore {
    pub fn from_config(cfg: &IdentityConfig) -> Self {
        let mut friends: HashMap<String, HashSet<String>> = HashMap::new();
        let mut names = HashMap::new();
        for member in &cfg.members {
            names.insert(member.id.clone(), member.display_name.clone());
            for friend in &member.friends {
                if friend == &member.id {
                    continue;
                }
                friends
                    .entry(member.id.clone())
                    .or_default()
                    .insert(friend.clone());
                friends
                    .entry(friend.clone())
                    .or_default()
                    .insert(member.id.clone());
            }
        }
        Self { friends, names }
    }
}

#[async_trait]
impl RelationshipStore for RosterRelationshipStore {
    async fn friends_of(&self, identity_id: &str) -> Result<HashSet<String>> {
        Ok(self.friends.get(identity_id).cloned().unwrap_or_default())
    }

    async fn display_name(&self, identity_id: &str) -> Result<Option<String>> {
        Ok(self.names.get(identity_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use st_domain::config::MemberEntry;

    fn roster() -> IdentityConfig {
        IdentityConfig {
            members: vec![
                MemberEntry {
                    id: "ava".into(),
                    display_name: "Ava".into(),
                    token_env: None,
                    token_sha256: Some(hex::encode(digest("ava-secret"))),
                    friends: vec!["ben".into()],
                },
                MemberEntry {
                    id: "ben".into(),
                    display_name: "Ben".into(),
                    token_env: None,
                    token_sha256: Some("not-hex".into()),
                    friends: vec![],
                },
            ],
        }
    }

    #[tokio::test]
    async fn resolves_known_credential_only() {
        let provider = RosterIdentityProvider::from_config(&roster());
        let ava = provider.resolve("ava-secret").await.unwrap();
        assert_eq!(ava, Identity::member("ava", "Ava"));

        let err = provider.resolve("guess").await.unwrap_err();
        assert!(matches!(err, Error::Auth(_)));
    }

    #[tokio::test]
    async fn friendship_is_symmetric() {
        let store = RosterRelationshipStore::from_config(&roster());
        assert!(store.friends_of("ava").await.unwrap().contains("ben"));
        assert!(store.friends_of("ben").await.unwrap().contains("ava"));
        assert!(store.friends_of("zed").await.unwrap().is_empty());
        assert_eq!(store.display_name("ben").await.unwrap().as_deref(), Some("Ben"));
    }
}
