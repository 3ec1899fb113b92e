//! Connection-time identity resolution.
//!
//! A missing credential degrades to a guest scoped to the connection.  A
//! credential that is present but rejected never falls back to guest.

use std::sync::Arc;

use st_domain::error::{Error, Result};
use st_domain::identity::Identity;

use crate::collaborators::IdentityProvider;

#[derive(Clone)]
pub struct IdentityResolver {
    provider: Arc<dyn IdentityProvider>,
}

impl IdentityResolver {
    pub fn new(provider: Arc<dyn IdentityProvider>) -> Self {
        Self { provider }
    }

    pub async fn resolve_connection(
        &self,
        connection_id: &str,
        credential: Option<&str>,
        guest_name: Option<&str>,
    ) -> Result<Identity> {
        let Some(credential) = credential.map(str::trim).filter(|c| !c.is_empty()) else {
            return Ok(Identity::guest(connection_id, guest_name));
        };

        let identity = self.provider.resolve(credential).await.map_err(|e| match e {
            Error::Auth(_) => e,
            other => Error::Auth(other.to_string()),
        })?;

        if !identity.is_member() {
            return Err(Error::Auth("identity provider returned a non-member identity".into()));
        }
        Ok(identity)
    }
}
