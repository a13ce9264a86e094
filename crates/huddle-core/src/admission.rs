//! Session admission.
//!
//! The gate turns a raw credential into a [`ConnectionHandle`]. It validates
//! only; registering the handle is the caller's job.

use crate::connection::{ConnectionHandle, Outbox, DEFAULT_OUTBOX_CAPACITY};
use async_trait::async_trait;
use huddle_protocol::UserProfile;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Credential verification failures.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No credential was presented.
    #[error("Missing credential")]
    Missing,

    /// Signature, format or expiry check failed.
    #[error("Invalid credential: {0}")]
    Invalid(String),

    /// The credential names a user that does not exist.
    #[error("Unknown user: {0}")]
    UnknownUser(String),
}

/// Admission failures.
#[derive(Debug, Error)]
pub enum AdmissionError {
    /// The connection must be refused.
    #[error("Unauthenticated: {0}")]
    Unauthenticated(#[from] AuthError),
}

/// Verifies credentials and resolves them to a user profile.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Verify a raw credential.
    async fn verify_credential(&self, raw: &str) -> Result<UserProfile, AuthError>;
}

/// An admitted connection: its handle and the queue its writer drains.
#[derive(Debug)]
pub struct Admission {
    /// The handle to register.
    pub handle: ConnectionHandle,
    /// Events queued for this connection.
    pub outbox: Outbox,
}

/// Validates new connections before they reach the registry.
#[derive(Clone)]
pub struct AdmissionGate {
    authenticator: Arc<dyn Authenticator>,
    outbox_capacity: usize,
}

impl AdmissionGate {
    /// Create a gate with the default outbound queue capacity.
    #[must_use]
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            outbox_capacity: DEFAULT_OUTBOX_CAPACITY,
        }
    }

    /// Set the outbound queue capacity of admitted handles.
    #[must_use]
    pub fn with_outbox_capacity(mut self, capacity: usize) -> Self {
        self.outbox_capacity = capacity.max(1);
        self
    }

    /// Validate `credential` and build a handle for its user.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::Unauthenticated`] if the credential is
    /// missing, empty, invalid, or names an unknown user.
    pub async fn admit(&self, credential: Option<&str>) -> Result<Admission, AdmissionError> {
        let raw = credential
            .map(str::trim)
            .filter(|raw| !raw.is_empty())
            .ok_or(AuthError::Missing)?;

        let profile = self.authenticator.verify_credential(raw).await?;
        let (handle, outbox) = ConnectionHandle::new(profile, self.outbox_capacity);

        debug!(connection = %handle.id(), user = %handle.user_id(), "Connection admitted");

        Ok(Admission { handle, outbox })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct StaticTokens(HashMap<&'static str, UserProfile>);

    #[async_trait]
    impl Authenticator for StaticTokens {
        async fn verify_credential(&self, raw: &str) -> Result<UserProfile, AuthError> {
            if raw == "deleted-user" {
                return Err(AuthError::UnknownUser("zed".to_string()));
            }
            self.0
                .get(raw)
                .cloned()
                .ok_or_else(|| AuthError::Invalid("bad signature".to_string()))
        }
    }

    fn gate() -> AdmissionGate {
        let mut tokens = HashMap::new();
        tokens.insert("token-alice", UserProfile::new("alice", "Alice"));
        AdmissionGate::new(Arc::new(StaticTokens(tokens))).with_outbox_capacity(2)
    }

    #[tokio::test]
    async fn test_admit_valid_credential() {
        let admission = gate().admit(Some("token-alice")).await.unwrap();
        assert_eq!(admission.handle.user_id().as_str(), "alice");
        assert_eq!(admission.handle.profile().name, "Alice");
    }

    #[tokio::test]
    async fn test_reject_missing_credential() {
        for credential in [None, Some(""), Some("   ")] {
            let result = gate().admit(credential).await;
            assert!(matches!(
                result,
                Err(AdmissionError::Unauthenticated(AuthError::Missing))
            ));
        }
    }

    #[tokio::test]
    async fn test_reject_invalid_or_unknown() {
        assert!(matches!(
            gate().admit(Some("forged")).await,
            Err(AdmissionError::Unauthenticated(AuthError::Invalid(_)))
        ));
        assert!(matches!(
            gate().admit(Some("deleted-user")).await,
            Err(AdmissionError::Unauthenticated(AuthError::UnknownUser(_)))
        ));
    }
}
