//! Bearer token minting for tests.

use gateway_core::auth::Claims;
use jsonwebtoken::{encode, errors::Error, get_current_timestamp, EncodingKey, Header};

pub const TEST_SECRET: &str = "integration-test-secret";
pub const TEST_ISSUER: &str = "https://id.integration.test";

/// Signs HS256 tokens for a fixed secret and issuer.
#[derive(Debug, Clone)]
pub struct TokenFactory {
    secret: String,
    issuer: String,
}

impl Default for TokenFactory {
    fn default() -> Self {
        Self::new(TEST_SECRET, TEST_ISSUER)
    }
}

impl TokenFactory {
    #[must_use]
    pub fn new(secret: &str, issuer: &str) -> Self {
        Self { secret: secret.to_string(), issuer: issuer.to_string() }
    }

    /// Mints a token valid for ten minutes.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn mint(&self, user: &str, tenant: &str, scopes: &[&str]) -> Result<String, Error> {
        self.mint_with_expiry(user, tenant, scopes, get_current_timestamp() + 600)
    }

    /// Mints a token that expired an hour ago.
    ///
    /// # Errors
    ///
    /// Returns an error if signing fails.
    pub fn mint_expired(&self, user: &str, tenant: &str, scopes: &[&str]) -> Result<String, Error> {
        self.mint_with_expiry(user, tenant, scopes, get_current_timestamp().saturating_sub(3600))
    }

    fn mint_with_expiry(
        &self,
        user: &str,
        tenant: &str,
        scopes: &[&str],
        exp: u64,
    ) -> Result<String, Error> {
        let claims = Claims {
            sub: user.to_string(),
            tenant_id: Some(tenant.to_string()),
            scopes: scopes.iter().map(|scope| (*scope).to_string()).collect(),
            exp,
            iss: self.issuer.clone(),
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(self.secret.as_bytes()))
    }
}
