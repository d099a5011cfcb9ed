use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use uuid::Uuid;

use super::{Identity, IdentityError, IdentityProvider, IssuedSession};

/// Caps every call into `inner` at `timeout`. An elapsed call is reported as
/// [`IdentityError::Unavailable`], which the HTTP layer answers with 503.
pub struct BoundedIdentityProvider {
    inner: Arc<dyn IdentityProvider>,
    timeout: Duration,
}

impl BoundedIdentityProvider {
    pub fn new(inner: Arc<dyn IdentityProvider>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, IdentityError>
    where
        F: Future<Output = Result<T, IdentityError>>,
    {
        tokio::time::timeout(self.timeout, call).await.unwrap_or_else(|_| {
            counter!("invite_store_timeouts_total", "operation" => operation).increment(1);
            tracing::warn!(
                operation,
                timeout_ms = self.timeout.as_millis() as u64,
                "Identity provider call timed out"
            );
            Err(IdentityError::Unavailable(format!("{operation} timed out")))
        })
    }
}

#[async_trait]
impl IdentityProvider for BoundedIdentityProvider {
    async fn current_session(&self, session_token: &str) -> Result<Option<Identity>, IdentityError> {
        self.bounded("current_session", self.inner.current_session(session_token))
            .await
    }

    async fn create_identity(&self, email: &str, credential: &str) -> Result<Identity, IdentityError> {
        self.bounded("create_identity", self.inner.create_identity(email, credential))
            .await
    }

    async fn find_identity_by_email(&self, email: &str) -> Result<Option<Identity>, IdentityError> {
        self.bounded("find_identity_by_email", self.inner.find_identity_by_email(email))
            .await
    }

    async fn delete_identity(&self, identity_id: Uuid) -> Result<(), IdentityError> {
        self.bounded("delete_identity", self.inner.delete_identity(identity_id))
            .await
    }

    async fn sign_in(&self, email: &str, credential: &str) -> Result<IssuedSession, IdentityError> {
        self.bounded("sign_in", self.inner.sign_in(email, credential))
            .await
    }
}
