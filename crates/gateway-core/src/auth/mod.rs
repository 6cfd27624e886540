//! Bearer token authentication and scope authorization.
//!
//! # Flow
//!
//! ```text
//!   Authorization: Bearer <jwt>
//!        │
//!        ├──> Header shape check ─────────── MissingOrMalformed (401)
//!        │
//!        ├──> HS256 signature, exp, iss ──── InvalidToken (401)
//!        │    (single opaque failure)
//!        │
//!        ├──> Principal { sub, tenant_id, scopes }
//!        │
//!        ├──> ScopeHierarchy::grants ─────── InsufficientScope (403)
//!        │
//!        └──> context.tenant_id = principal.tenant_id
//! ```
//!
//! Verification is CPU-bound and never suspends. Failures are not retried.
//!
//! When authentication is disabled the authenticator synthesizes a wildcard principal
//! for the caller's tenant. Configuration validation refuses that mode in production.

pub mod scopes;

use crate::{
    config::AuthConfig,
    context::{RequestContext, DEFAULT_TENANT},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use scopes::{ScopeHierarchy, WILDCARD_SCOPE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use thiserror::Error;

pub use scopes::default_scope_table;

/// Authentication and authorization failures.
///
/// `InvalidToken` covers every verification sub-check; callers never learn which
/// one failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum AuthError {
    #[error("Missing or malformed Authorization header")]
    MissingOrMalformed,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Insufficient scope")]
    InsufficientScope { required: Vec<String>, held: Vec<String> },
}

impl AuthError {
    /// True for failures where the caller is known but lacks permission.
    #[must_use]
    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::InsufficientScope { .. })
    }
}

/// The authenticated identity for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub tenant_id: String,
    pub scopes: BTreeSet<String>,
}

impl Principal {
    #[must_use]
    pub fn held_scopes(&self) -> Vec<String> {
        self.scopes.iter().cloned().collect()
    }
}

/// Token claims accepted by the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub scopes: Vec<String>,
    pub exp: u64,
    pub iss: String,
}

/// Verifies bearer tokens and checks scopes against the hierarchy.
pub struct Authenticator {
    enabled: bool,
    decoding_key: DecodingKey,
    validation: Validation,
    hierarchy: ScopeHierarchy,
}

impl Authenticator {
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "iss", "sub"]);
        validation.leeway = config.leeway_seconds;
        validation.validate_exp = true;
        validation.validate_aud = false;

        Self {
            enabled: config.enabled,
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            validation,
            hierarchy: ScopeHierarchy::new(&config.scope_hierarchy),
        }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn hierarchy(&self) -> &ScopeHierarchy {
        &self.hierarchy
    }

    /// Authenticates a request and checks `required` scopes.
    ///
    /// On success the context's tenant is replaced by the principal's tenant.
    ///
    /// # Errors
    ///
    /// - [`AuthError::MissingOrMalformed`] if the header is absent or not `Bearer <token>`
    /// - [`AuthError::InvalidToken`] if signature, expiry, issuer or claims fail to verify
    /// - [`AuthError::InsufficientScope`] if any required scope is not granted
    pub fn authenticate(
        &self,
        authorization: Option<&str>,
        context: &mut RequestContext,
        required: &[String],
    ) -> Result<Principal, AuthError> {
        let principal = if self.enabled {
            self.verify(authorization)?
        } else {
            Principal {
                user_id: "anonymous".to_string(),
                tenant_id: context.tenant_id.clone(),
                scopes: BTreeSet::from([WILDCARD_SCOPE.to_string()]),
            }
        };

        self.authorize(&principal, required)?;
        context.assign_tenant(principal.tenant_id.clone());

        Ok(principal)
    }

    /// Verifies the bearer token and builds a principal, without scope checks.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::MissingOrMalformed`] or [`AuthError::InvalidToken`].
    pub fn verify(&self, authorization: Option<&str>) -> Result<Principal, AuthError> {
        let token = bearer_token(authorization).ok_or(AuthError::MissingOrMalformed)?;

        let data =
            decode::<Claims>(token, &self.decoding_key, &self.validation).map_err(|e| {
                tracing::debug!(reason = ?e.kind(), "token verification failed");
                AuthError::InvalidToken
            })?;

        let claims = data.claims;
        if claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        Ok(Principal {
            user_id: claims.sub,
            tenant_id: claims
                .tenant_id
                .filter(|tenant| !tenant.is_empty())
                .unwrap_or_else(|| DEFAULT_TENANT.to_string()),
            scopes: claims.scopes.into_iter().collect(),
        })
    }

    /// Checks that `principal` holds or implies every scope in `required`.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InsufficientScope`] carrying both the required and held scopes.
    pub fn authorize(&self, principal: &Principal, required: &[String]) -> Result<(), AuthError> {
        let missing = self.hierarchy.missing(&principal.scopes, required);
        if missing.is_empty() {
            return Ok(());
        }

        tracing::debug!(
            user_id = %principal.user_id,
            tenant_id = %principal.tenant_id,
            missing = ?missing,
            "scope check failed"
        );

        Err(AuthError::InsufficientScope {
            required: required.to_vec(),
            held: principal.held_scopes(),
        })
    }
}

/// Extracts the token from `Bearer <token>`.
///
/// The scheme is matched exactly and the token must be a single non-empty word.
fn bearer_token(authorization: Option<&str>) -> Option<&str> {
    let token = authorization?.strip_prefix("Bearer ")?;
    if token.is_empty() || token.contains(char::is_whitespace) {
        return None;
    }
    Some(token)
}
