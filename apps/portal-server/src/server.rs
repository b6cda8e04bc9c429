use std::future::Future;
use std::sync::Arc;

use chrono::Duration;
use portal_authz::ActorContext;
use portal_storage::{Store, StoreError, StoreTx, User, UserId};

use crate::auth::{Argon2Credentials, CredentialService, JwtTokenService, TokenService};
use crate::blobs::{validate_image, BlobRef, BlobStore, LocalBlobStore};
use crate::config::ServerConfig;
use crate::error::{ServiceError, StoreResultExt};

/// The portal service: one instance shared by every request.
#[derive(Clone)]
pub struct PortalServer {
    pub store: Arc<dyn Store>,
    pub credentials: Arc<dyn CredentialService>,
    pub tokens: Arc<dyn TokenService>,
    pub blobs: Arc<dyn BlobStore>,
    pub config: ServerConfig,
}

impl PortalServer {
    /// Wire the default collaborators (argon2, HS256 tokens, local blobs) from `config`.
    pub fn new(store: Arc<dyn Store>, config: ServerConfig) -> Self {
        let tokens = JwtTokenService::new(
            config.jwt_secret.as_bytes(),
            Duration::hours(config.token_ttl_hours),
        );
        let blobs = LocalBlobStore::new(config.upload_dir.clone());
        Self {
            store,
            credentials: Arc::new(Argon2Credentials::default()),
            tokens: Arc::new(tokens),
            blobs: Arc::new(blobs),
            config,
        }
    }

    pub fn with_services(
        store: Arc<dyn Store>,
        credentials: Arc<dyn CredentialService>,
        tokens: Arc<dyn TokenService>,
        blobs: Arc<dyn BlobStore>,
        config: ServerConfig,
    ) -> Self {
        Self {
            store,
            credentials,
            tokens,
            blobs,
            config,
        }
    }

    /// Resolve a bearer token to the user it was issued for.
    ///
    /// Only the signature and expiry are checked here; handlers reload the
    /// user, so a deleted account fails with `NotFound` there.
    pub fn authenticate(&self, bearer: &str) -> Result<UserId, ServiceError> {
        let token = bearer.strip_prefix("Bearer ").unwrap_or(bearer).trim();
        let claims = self.tokens.verify(token)?;
        tracing::debug!(user_id = %claims.sub, "bearer token accepted");
        Ok(claims.sub)
    }

    /// Load the acting user outside any transaction.
    pub(crate) async fn actor(
        &self,
        actor_id: &UserId,
    ) -> Result<(User, ActorContext), ServiceError> {
        let user = self.store.get_user(actor_id).await.entity("user")?;
        let ctx = ActorContext::from(&user);
        Ok((user, ctx))
    }

    /// Validate and store an uploaded image.
    pub(crate) async fn store_image(&self, bytes: &[u8]) -> Result<BlobRef, ServiceError> {
        let kind = validate_image(bytes, self.config.avatar_max_bytes)?;
        Ok(self.blobs.store(bytes, kind.extension()).await?)
    }

    /// Store a new avatar (or none) through `set`, which returns the previous
    /// blob name. The replaced blob is discarded; so is the new one if `set` fails.
    pub(crate) async fn replace_avatar<F, Fut>(
        &self,
        bytes: Option<&[u8]>,
        what: &str,
        set: F,
    ) -> Result<(), ServiceError>
    where
        F: FnOnce(Option<String>) -> Fut,
        Fut: Future<Output = Result<Option<String>, StoreError>>,
    {
        let new = match bytes {
            Some(bytes) => Some(self.store_image(bytes).await?.into_string()),
            None => None,
        };
        match set(new.clone()).await {
            Ok(previous) => {
                self.discard_blob(previous).await;
                Ok(())
            }
            Err(e) => {
                self.discard_blob(new).await;
                Err::<(), _>(e).entity(what)
            }
        }
    }

    /// Delete a blob whose record is gone. Failures are logged, not returned.
    pub(crate) async fn discard_blob(&self, name: Option<String>) {
        let Some(name) = name else {
            return;
        };
        let blob = BlobRef::from(name);
        if let Err(e) = self.blobs.delete(&blob).await {
            tracing::warn!(blob = %blob.as_str(), error = %e, "failed to delete blob");
        }
    }
}

/// Commit on success, roll back on failure.
pub(crate) async fn finish<T>(
    tx: Box<dyn StoreTx>,
    result: Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            tracing::warn!(error = %e, "transaction rolled back");
            if let Err(rb) = tx.rollback().await {
                tracing::warn!(error = %rb, "rollback failed");
            }
            Err(e)
        }
    }
}
