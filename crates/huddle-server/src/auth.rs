//! Session token verification.
//!
//! Clients authenticate with the HS256 JWT issued by the CRUD service at
//! login. The token carries the user ID and display name, so admission needs
//! no storage lookup.

use async_trait::async_trait;
use huddle_core::{AuthError, Authenticator};
use huddle_protocol::UserProfile;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Session token claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// User ID.
    pub sub: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Expiry, seconds since the epoch.
    pub exp: i64,
}

/// Verifies session tokens signed with a shared secret.
pub struct JwtAuthenticator {
    key: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    /// Create an authenticator for tokens signed with `secret`.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp", "sub"]);

        Self {
            key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

#[async_trait]
impl Authenticator for JwtAuthenticator {
    async fn verify_credential(&self, raw: &str) -> Result<UserProfile, AuthError> {
        let token = decode::<Claims>(raw, &self.key, &self.validation)
            .map_err(|e| AuthError::Invalid(e.to_string()))?;
        let claims = token.claims;

        if claims.sub.trim().is_empty() || claims.name.trim().is_empty() {
            return Err(AuthError::UnknownUser(claims.sub));
        }

        Ok(UserProfile::new(claims.sub, claims.name))
    }
}

/// Sign a session token, as the CRUD service does at login.
#[cfg(test)]
pub(crate) fn issue_token(secret: &[u8], user: &str, name: &str, ttl_secs: i64) -> String {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let claims = Claims {
        sub: user.to_string(),
        name: name.to_string(),
        exp: chrono::Utc::now().timestamp() + ttl_secs,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret)).unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[tokio::test]
    async fn test_valid_token() {
        let auth = JwtAuthenticator::new(SECRET);
        let token = issue_token(SECRET, "u-1", "Alice", 600);

        let profile = auth.verify_credential(&token).await.unwrap();
        assert_eq!(profile, UserProfile::new("u-1", "Alice"));
    }

    #[tokio::test]
    async fn test_wrong_secret() {
        let auth = JwtAuthenticator::new(SECRET);
        let token = issue_token(b"other-secret", "u-1", "Alice", 600);

        assert!(matches!(
            auth.verify_credential(&token).await,
            Err(AuthError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_expired_token() {
        let auth = JwtAuthenticator::new(SECRET);
        let token = issue_token(SECRET, "u-1", "Alice", -3600);

        assert!(matches!(
            auth.verify_credential(&token).await,
            Err(AuthError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_garbage_token() {
        let auth = JwtAuthenticator::new(SECRET);
        assert!(matches!(
            auth.verify_credential("not.a.jwt").await,
            Err(AuthError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_token_without_user() {
        let auth = JwtAuthenticator::new(SECRET);
        let token = issue_token(SECRET, "u-1", "", 600);

        assert!(matches!(
            auth.verify_credential(&token).await,
            Err(AuthError::UnknownUser(_))
        ));
    }
}
