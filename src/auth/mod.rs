//! Tenant authentication.
//!
//! # Data Flow
//! ```text
//! [[userlist]] config → UserList (immutable)
//! Session start → Authenticator::authenticate(user, proof) → TenantIdentity
//!     → SessionContext (attribution only, never routing)
//! ```
//!
//! # Design Decisions
//! - The wire-level challenge/response is the codec's business; the proof
//!   handed in here is the cleartext secret the codec recovered
//! - Secrets never appear in `Debug` output or logs
//! - Unknown users and wrong secrets are distinct errors internally; callers
//!   decide how much of that to reveal to clients

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::config::schema::UserConfig;

/// Authenticated tenant, as attached to a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct TenantIdentity {
    pub user: String,
}

impl fmt::Display for TenantIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.user)
    }
}

/// A tenant credential.
#[derive(Clone)]
pub struct Tenant {
    user: String,
    secret: String,
}

impl Tenant {
    pub fn new(user: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            secret: secret.into(),
        }
    }

    pub fn user(&self) -> &str {
        &self.user
    }

    fn verify(&self, proof: &[u8]) -> bool {
        constant_time_eq(self.secret.as_bytes(), proof)
    }
}

impl fmt::Debug for Tenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tenant")
            .field("user", &self.user)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("bad credentials for user '{0}'")]
    BadCredentials(String),
}

/// Verifies a session's credentials before its first borrow.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, user: &str, proof: &[u8]) -> Result<TenantIdentity, AuthError>;
}

/// Static credential list loaded from configuration.
#[derive(Debug, Clone, Default)]
pub struct UserList {
    tenants: HashMap<String, Tenant>,
}

impl UserList {
    pub fn new(tenants: impl IntoIterator<Item = Tenant>) -> Self {
        Self {
            tenants: tenants.into_iter().map(|t| (t.user.clone(), t)).collect(),
        }
    }

    pub fn from_config(users: &[UserConfig]) -> Self {
        Self::new(users.iter().map(|u| Tenant::new(u.user.clone(), u.password.clone())))
    }

    pub fn len(&self) -> usize {
        self.tenants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tenants.is_empty()
    }
}

impl Authenticator for UserList {
    fn authenticate(&self, user: &str, proof: &[u8]) -> Result<TenantIdentity, AuthError> {
        let tenant = self
            .tenants
            .get(user)
            .ok_or_else(|| AuthError::UnknownUser(user.to_string()))?;
        if !tenant.verify(proof) {
            tracing::warn!(user = %user, "Authentication failed");
            return Err(AuthError::BadCredentials(user.to_string()));
        }
        Ok(TenantIdentity {
            user: tenant.user.clone(),
        })
    }
}

/// Compare without short-circuiting on the first differing byte.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
